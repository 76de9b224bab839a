//! Runtime-mode bitmask (`spec.md` §6).

use bitflags::bitflags;

bitflags! {
    /// The combination of capabilities the engine boots with. `spec.md`
    /// §6: "hydra-context implies vulkan-context implies core" — enforced
    /// by [`RuntimeMode::normalize`], not by the bit layout itself.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
    pub struct RuntimeMode: u32 {
        /// Mandatory baseline: worker threads, task manager, module registry.
        const CORE = 1 << 0;
        /// A Vulkan device context is available.
        const VULKAN = 1 << 1;
        /// The higher-level rendering context ("hydra") is available.
        const HYDRA = 1 << 2;
        /// No on-screen presentation; render to off-screen targets only.
        const OFFSCREEN = 1 << 3;
        /// Do not drive the render loop; host pumps frames manually.
        const PASSIVE = 1 << 4;
        /// No interactive device access at all (headless tooling).
        const OFFLINE = 1 << 5;
        /// Release build: disable validation-only modules.
        const RELEASE = 1 << 6;
        /// No asset packer/cooker support compiled in.
        const PACKER_LESS = 1 << 7;
    }
}

impl RuntimeMode {
    /// Apply the implication rules from `spec.md` §6 and return the
    /// closed-over mode: `HYDRA` pulls in `VULKAN`, which pulls in
    /// `CORE`.
    #[must_use]
    pub fn normalize(self) -> Self {
        let mut mode = self | Self::CORE;
        if mode.contains(Self::HYDRA) {
            mode |= Self::VULKAN;
        }
        mode
    }
}

impl Default for RuntimeMode {
    fn default() -> Self {
        Self::CORE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hydra_implies_vulkan_and_core() {
        let mode = RuntimeMode::HYDRA.normalize();
        assert!(mode.contains(RuntimeMode::HYDRA));
        assert!(mode.contains(RuntimeMode::VULKAN));
        assert!(mode.contains(RuntimeMode::CORE));
    }

    #[test]
    fn core_is_always_present() {
        let mode = RuntimeMode::OFFSCREEN.normalize();
        assert!(mode.contains(RuntimeMode::CORE));
        assert!(!mode.contains(RuntimeMode::VULKAN));
    }
}
