//! GPU→CPU single-shot synchronization (`spec.md` §3 "Fence").

use crate::driver::{DriverError, FenceHandle, GpuDriver};
use std::sync::Arc;

/// A single-shot GPU→CPU synchronization primitive. States are
/// unsignaled/signaled; the GPU queue completing work transitions it to
/// signaled, and the host can reset it back to unsignaled.
///
/// Owns its driver handle and destroys it on drop, the same RAII
/// discipline the teacher's `render::vulkan::sync::Fence` used.
pub struct Fence {
    driver: Arc<dyn GpuDriver>,
    handle: FenceHandle,
}

impl std::fmt::Debug for Fence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fence").field("handle", &self.handle).finish_non_exhaustive()
    }
}

impl Fence {
    /// Create a new fence, optionally pre-signaled.
    pub fn new(driver: Arc<dyn GpuDriver>, signaled: bool) -> Result<Self, DriverError> {
        let handle = driver.create_fence(signaled)?;
        Ok(Self { driver, handle })
    }

    /// Wrap an existing driver handle without creating a new one. Used
    /// when a fence's ownership is being transferred (e.g. into a
    /// [`crate::drd::DeferredResourceDestructor`] entry).
    #[must_use]
    pub fn from_handle(driver: Arc<dyn GpuDriver>, handle: FenceHandle) -> Self {
        Self { driver, handle }
    }

    /// The underlying driver handle.
    #[must_use]
    pub const fn handle(&self) -> FenceHandle {
        self.handle
    }

    /// Is this fence currently signaled?
    #[must_use]
    pub fn is_signaled(&self) -> bool {
        self.driver.is_fence_signaled(self.handle)
    }

    /// Block until the fence signals or `timeout_ns` elapses. Returns
    /// `true` if the fence signaled before the timeout.
    pub fn wait(&self, timeout_ns: u64) -> bool {
        self.driver.wait_fence(self.handle, timeout_ns)
    }

    /// Reset the fence to unsignaled.
    pub fn reset(&self) {
        self.driver.reset_fence(self.handle);
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        self.driver.destroy_fence(self.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::FakeDriver;

    #[test]
    fn starts_unsignaled_unless_requested() {
        let driver: Arc<dyn GpuDriver> = Arc::new(FakeDriver::new());
        let fence = Fence::new(driver, false).unwrap();
        assert!(!fence.is_signaled());
    }

    #[test]
    fn signaling_is_observable() {
        let fake = Arc::new(FakeDriver::new());
        let driver: Arc<dyn GpuDriver> = fake.clone();
        let fence = Fence::new(driver, false).unwrap();
        fake.signal(fence.handle());
        assert!(fence.is_signaled());
        assert!(fence.wait(0));
        fence.reset();
        assert!(!fence.is_signaled());
    }
}
