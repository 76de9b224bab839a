//! GPU memory suballocation.
//!
//! A device-memory block is carved into fixed-size chunks, each of
//! which is independently suballocated with a first-fit free list.
//! Requests at or above the chunk size bypass chunking and get a
//! dedicated block instead. See the module-level docs on [`Allocator`]
//! for the full contract.

mod allocator;
mod block;
mod chain;
mod chunk;
mod handle;

pub use allocator::{AllocatorError, Allocator, CHUNK_SIZE};
pub use block::DeviceMemoryBlock;
pub use handle::Allocation;

/// The kind of resource an allocation backs. Determines which chain it
/// is routed to; `Normal` and `OptimalImage` share a chain since most
/// drivers report the same buffer/image granularity for both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocationKind {
    /// A regular, long-lived buffer or linear image.
    Normal,
    /// A long-lived optimally-tiled image.
    OptimalImage,
    /// A short-lived buffer, reclaimed within a few frames.
    ShortLived,
    /// A short-lived optimally-tiled image.
    ShortLivedOptimalImage,
    /// Host-visible memory intended to stay persistently mapped.
    MappedMemory,
}

impl AllocationKind {
    /// Whether allocations of this kind should come from host-visible,
    /// persistently mapped memory.
    #[must_use]
    pub const fn is_mapped(self) -> bool {
        matches!(self, Self::MappedMemory)
    }
}
