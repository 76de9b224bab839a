//! Allocation handles (`spec.md` §3 "Allocation handle").

use super::chain::{Chain, ChunkKey};
use super::AllocationKind;
use crate::driver::{DeviceMemoryHandle, GpuDriver};
use std::sync::{Arc, Mutex};

enum Inner {
    /// Allocations `>= CHUNK_SIZE`: their own dedicated block,
    /// returned to the driver directly on drop.
    Dedicated {
        driver: Arc<dyn GpuDriver>,
        memory: DeviceMemoryHandle,
    },
    /// A range inside one chunk of a shared chain, returned to the
    /// chunk's free list on drop. `chunk_key` is a stable slotmap key,
    /// not a `Vec` position, so it stays valid across sibling chunks
    /// being removed by [`Chain::flush_empty`].
    Shared {
        chain: Arc<Mutex<Chain>>,
        chunk_key: ChunkKey,
        memory: DeviceMemoryHandle,
        offset: u64,
    },
}

/// The result of a successful [`super::Allocator::allocate`] call.
/// Dropping it returns the range to its owning chain (or frees the
/// dedicated block), satisfying `spec.md` §3's "owns a drop action"
/// invariant. Rust's ownership model means this handle can never be
/// freed twice by construction, which is the strongest possible
/// reading of `spec.md` §4.A's "free is infallible and asserts on
/// double-free" policy.
pub struct Allocation {
    inner: Inner,
    size: u64,
    kind: AllocationKind,
    memory_type_index: u32,
}

impl Allocation {
    pub(super) fn dedicated(
        driver: Arc<dyn GpuDriver>,
        memory: DeviceMemoryHandle,
        size: u64,
        kind: AllocationKind,
        memory_type_index: u32,
    ) -> Self {
        Self {
            inner: Inner::Dedicated { driver, memory },
            size,
            kind,
            memory_type_index,
        }
    }

    pub(super) fn shared(
        chain: Arc<Mutex<Chain>>,
        chunk_key: ChunkKey,
        memory: DeviceMemoryHandle,
        offset: u64,
        size: u64,
        kind: AllocationKind,
        memory_type_index: u32,
    ) -> Self {
        Self {
            inner: Inner::Shared {
                chain,
                chunk_key,
                memory,
                offset,
            },
            size,
            kind,
            memory_type_index,
        }
    }

    /// Whether this allocation owns a dedicated device-memory block
    /// rather than sharing a chunk.
    #[must_use]
    pub const fn is_dedicated(&self) -> bool {
        matches!(self.inner, Inner::Dedicated { .. })
    }

    /// Offset into the backing device-memory block.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        match self.inner {
            Inner::Dedicated { .. } => 0,
            Inner::Shared { offset, .. } => offset,
        }
    }

    /// Size requested for this allocation.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// The device-memory handle this allocation lives in.
    #[must_use]
    pub const fn memory(&self) -> DeviceMemoryHandle {
        match self.inner {
            Inner::Dedicated { memory, .. } | Inner::Shared { memory, .. } => memory,
        }
    }

    /// The allocation kind requested.
    #[must_use]
    pub const fn kind(&self) -> AllocationKind {
        self.kind
    }

    /// The memory-type index this allocation was made from.
    #[must_use]
    pub const fn memory_type_index(&self) -> u32 {
        self.memory_type_index
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        match &self.inner {
            Inner::Dedicated { driver, memory } => driver.free_memory(*memory),
            Inner::Shared {
                chain,
                chunk_key,
                offset,
                ..
            } => {
                let mut chain = chain.lock().unwrap();
                chain.chunks[*chunk_key].free(*offset, self.size);
            }
        }
    }
}
