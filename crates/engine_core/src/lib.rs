//! # engine_core
//!
//! Core scaffolding for a Vulkan-based rendering engine: GPU memory
//! suballocation, per-thread command-pool management, deferred resource
//! destruction, deferred queue submission, and the worker-thread
//! lifecycle that ties them together.
//!
//! The Vulkan driver itself is out of scope: every subsystem here talks
//! to the GPU only through the [`driver::GpuDriver`] trait, so the
//! crate is fully exercised by its test suite without a real device. A
//! host application supplies a real driver backend (typically `ash`)
//! and consumes [`core_context::CoreContext`] as its boot/teardown
//! entry point.
//!
//! ## Layout
//!
//! - [`driver`] — the opaque GPU boundary and its test double.
//! - [`memory`] — the chunked suballocator.
//! - [`sync`] — fence/semaphore RAII wrappers.
//! - [`queue`] — named queues and submission serialization.
//! - [`command_pool`] — per-thread, per-queue command pools.
//! - [`drd`] — deferred resource destruction.
//! - [`dqe`] — deferred queue execution.
//! - [`submit_info`] — the submission-record builder.
//! - [`transfer`] — batched buffer uploads.
//! - [`task`] — the task-manager interface and a reference pool.
//! - [`module`] — the plug-in module system.
//! - [`core_context`] — boot, teardown, and the lifecycle state machine.

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod command_pool;
pub mod config;
pub mod core_context;
pub mod driver;
pub mod dqe;
pub mod drd;
pub mod error;
pub mod foundation;
pub mod memory;
pub mod module;
pub mod queue;
pub mod runtime_mode;
pub mod submit_info;
pub mod sync;
pub mod task;
pub mod transfer;

pub use error::EngineError;

/// Common imports for host applications embedding this crate.
pub mod prelude {
    pub use crate::core_context::{BootConfig, BootError, CoreContext, LifecycleState};
    pub use crate::driver::GpuDriver;
    pub use crate::dqe::DeferredQueueExecution;
    pub use crate::drd::DeferredResourceDestructor;
    pub use crate::memory::{Allocation, AllocationKind, Allocator};
    pub use crate::module::{EngineHandle, EngineModule, ModuleRegistry};
    pub use crate::queue::{QueueId, QueueRegistry};
    pub use crate::runtime_mode::RuntimeMode;
    pub use crate::submit_info::{SubmitInfoBuilder, SubmitRecord};
    pub use crate::task::TaskManager;
    pub use crate::transfer::{CompletionChain, TransferContext, TransferError};
    pub use crate::EngineError;
}
