//! Engine modules and the module registry (`spec.md` §4.H, §9).
//!
//! A module is a plug-in collaborator the core drives through a fixed
//! set of lifecycle callbacks during boot and shutdown. Modules never
//! own the engine; each gets a weak, non-owning handle back to it,
//! initialized once the engine itself has finished booting.

use crate::core_context::CoreContext;
use std::sync::Weak;
use thiserror::Error;

/// A non-owning reference back to the engine, handed to every module
/// during registration. `spec.md` §9: weak so a module can outlive a
/// torn-down engine without becoming a dangling owner.
pub type EngineHandle = Weak<CoreContext>;

/// Errors from registering modules.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Two modules were registered under the same name.
    #[error("a module named \"{0}\" is already registered")]
    DuplicateName(String),
}

/// The lifecycle callbacks the core invokes on every registered module,
/// in the order listed here, across boot and shutdown. Every method has
/// a default no-op body: most modules only care about one or two
/// stages.
pub trait EngineModule: Send + Sync {
    /// Stable, unique name used for duplicate-registration detection
    /// and diagnostics.
    fn name(&self) -> &str;

    /// Called before the core context itself has been constructed.
    /// Modules may validate their own configuration here.
    fn on_pre_boot_step(&mut self) {}

    /// Called once the core context exists, but before the resource
    /// index has loaded. `handle` is already valid for
    /// `Weak::upgrade`.
    fn on_context_initialized(&mut self, _handle: &EngineHandle) {}

    /// Called once the resource index has finished loading.
    fn on_resource_index_loaded(&mut self) {}

    /// Called once every module has completed the previous three
    /// stages and the engine is fully booted.
    fn on_engine_boot_complete(&mut self) {}

    /// Called when shutdown begins, before any module's resources are
    /// torn down.
    fn on_start_shutdown(&mut self) {}

    /// Called as the final teardown step for this module.
    fn on_shutdown(&mut self) {}
}

/// Holds every registered [`EngineModule`] and drives their lifecycle
/// callbacks in registration order.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: Vec<Box<dyn EngineModule>>,
}

impl ModuleRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module. Fails if a module with the same name is
    /// already registered.
    pub fn register(&mut self, module: Box<dyn EngineModule>) -> Result<(), RegistryError> {
        if self.modules.iter().any(|existing| existing.name() == module.name()) {
            return Err(RegistryError::DuplicateName(module.name().to_string()));
        }
        self.modules.push(module);
        Ok(())
    }

    /// Number of registered modules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Whether no modules are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub(crate) fn for_each_mut(&mut self, mut f: impl FnMut(&mut dyn EngineModule)) {
        for module in &mut self.modules {
            f(module.as_mut());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Probe {
        name: &'static str,
        booted: bool,
    }

    impl EngineModule for Probe {
        fn name(&self) -> &str {
            self.name
        }

        fn on_engine_boot_complete(&mut self) {
            self.booted = true;
        }
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut registry = ModuleRegistry::new();
        registry
            .register(Box::new(Probe {
                name: "physics",
                booted: false,
            }))
            .unwrap();
        let err = registry
            .register(Box::new(Probe {
                name: "physics",
                booted: false,
            }))
            .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateName("physics".to_string()));
    }

    #[test]
    fn lifecycle_callbacks_reach_every_module() {
        let mut registry = ModuleRegistry::new();
        registry
            .register(Box::new(Probe {
                name: "a",
                booted: false,
            }))
            .unwrap();
        registry
            .register(Box::new(Probe {
                name: "b",
                booted: false,
            }))
            .unwrap();
        registry.for_each_mut(|module| module.on_engine_boot_complete());
        assert_eq!(registry.len(), 2);
    }
}
