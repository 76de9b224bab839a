//! Crate-level error aggregation (`spec.md` §7).

use crate::core_context::BootError;
use crate::driver::DriverError;
use crate::memory::AllocatorError;
use crate::module::RegistryError;
use crate::submit_info::BuilderError;
use crate::transfer::TransferError;
use thiserror::Error;

/// The union of every module-level error, for callers that want one
/// error type to propagate rather than matching on each subsystem's own.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A memory-allocator failure.
    #[error(transparent)]
    Allocator(#[from] AllocatorError),
    /// A submit-info builder misuse.
    #[error(transparent)]
    Builder(#[from] BuilderError),
    /// A transfer-context failure.
    #[error(transparent)]
    Transfer(#[from] TransferError),
    /// A module-registration failure.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// A boot failure.
    #[error(transparent)]
    Boot(#[from] BootError),
    /// A raw driver failure that wasn't wrapped by a higher-level
    /// subsystem error.
    #[error(transparent)]
    Driver(#[from] DriverError),
}
