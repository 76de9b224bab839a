//! Synchronization primitives: fences and semaphores (`spec.md` §3).
//!
//! RAII wrappers in the same spirit as the Vulkan-tutorial style
//! `Semaphore`/`Fence` wrappers this crate's predecessor used, adapted
//! to go through the [`crate::driver::GpuDriver`] trait instead of a
//! concrete `ash::Device`.

mod fence;
mod semaphore;

pub use fence::Fence;
pub use semaphore::Semaphore;
