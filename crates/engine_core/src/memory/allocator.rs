//! The GPU memory suballocator (`spec.md` §4.A).

use super::chain::{Chain, ChainGroup, ChainKey};
use super::handle::Allocation;
use super::AllocationKind;
use crate::driver::{GpuDriver, MemoryBlockRequest};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Chunk size `spec.md` §3 fixes at "~8 MiB". Requests at or above this
/// size bypass chunking entirely and get a dedicated block.
pub const CHUNK_SIZE: u64 = 8 * 1024 * 1024;

/// Errors the allocator can surface.
#[derive(Error, Debug)]
pub enum AllocatorError {
    /// The driver rejected the underlying block allocation.
    #[error("out of device memory: requested {requested} bytes for memory type {memory_type_index}")]
    OutOfMemory {
        /// Bytes requested.
        requested: u64,
        /// Memory-type index the request targeted.
        memory_type_index: u32,
    },
}

/// Suballocates GPU device memory in amortized constant time, bucketed
/// by `(allocation-kind, memory-type)`. See `spec.md` §4.A for the full
/// contract.
pub struct Allocator {
    driver: Arc<dyn GpuDriver>,
    chains: Mutex<HashMap<ChainKey, Arc<Mutex<Chain>>>>,
}

impl Allocator {
    /// Create an allocator backed by the given driver.
    #[must_use]
    pub fn new(driver: Arc<dyn GpuDriver>) -> Self {
        Self {
            driver,
            chains: Mutex::new(HashMap::new()),
        }
    }

    fn chain_for(&self, kind: AllocationKind, memory_type_index: u32) -> Arc<Mutex<Chain>> {
        let key = ChainKey {
            group: ChainGroup::of(kind),
            memory_type_index,
        };
        self.chains
            .lock()
            .unwrap()
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(Chain::new())))
            .clone()
    }

    /// Satisfy an allocation request. Requests `>= CHUNK_SIZE` always
    /// get a dedicated, non-shared block; smaller requests route
    /// through the `(kind, memory_type_index)` chain, reusing an
    /// existing chunk via first-fit or creating a new one.
    pub fn allocate(
        &self,
        size: u64,
        alignment: u64,
        memory_type_index: u32,
        kind: AllocationKind,
    ) -> Result<Allocation, AllocatorError> {
        if size >= CHUNK_SIZE {
            let memory = self
                .driver
                .allocate_memory(MemoryBlockRequest {
                    size,
                    memory_type_index,
                    host_visible: kind.is_mapped(),
                })
                .map_err(|_| AllocatorError::OutOfMemory {
                    requested: size,
                    memory_type_index,
                })?;
            log::debug!(
                "allocator: dedicated block of {size} bytes (memory type {memory_type_index}, kind {kind:?})"
            );
            return Ok(Allocation::dedicated(
                self.driver.clone(),
                memory,
                size,
                kind,
                memory_type_index,
            ));
        }

        let chain_arc = self.chain_for(kind, memory_type_index);
        let mut chain = chain_arc.lock().unwrap();

        if let Some((chunk_key, offset)) = chain.try_allocate_existing(size, alignment) {
            let memory = chain.chunks[chunk_key].block().handle();
            drop(chain);
            return Ok(Allocation::shared(
                chain_arc,
                chunk_key,
                memory,
                offset,
                size,
                kind,
                memory_type_index,
            ));
        }

        let block_handle = self
            .driver
            .allocate_memory(MemoryBlockRequest {
                size: CHUNK_SIZE,
                memory_type_index,
                host_visible: kind.is_mapped(),
            })
            .map_err(|_| AllocatorError::OutOfMemory {
                requested: CHUNK_SIZE,
                memory_type_index,
            })?;
        let block = super::block::DeviceMemoryBlock::new(
            self.driver.clone(),
            block_handle,
            CHUNK_SIZE,
            memory_type_index,
            kind.is_mapped(),
        );
        let (chunk_key, offset) = chain.push_chunk_and_allocate(block, size, alignment);
        log::debug!(
            "allocator: created chunk {chunk_key:?} in chain (kind {kind:?}, memory type {memory_type_index})"
        );
        drop(chain);
        Ok(Allocation::shared(
            chain_arc,
            chunk_key,
            block_handle,
            offset,
            size,
            kind,
            memory_type_index,
        ))
    }

    /// Release a previously allocated range or dedicated block.
    /// `spec.md` §4.A: "non-shared allocations destroy the backing
    /// block immediately. Shared allocations return the range to the
    /// chunk's free list." Both are implemented by `Allocation`'s
    /// `Drop`, so this is just an explicit, more readable spelling of
    /// `drop(allocation)` for callers that want the symmetry with
    /// `allocate`.
    pub fn free(&self, allocation: Allocation) {
        drop(allocation);
    }

    /// Release every chunk that is currently empty across every chain.
    /// `spec.md` §4.A: invoked by the deferred destructor at
    /// end-of-frame.
    pub fn flush_empty_allocations(&self) {
        let chains = self.chains.lock().unwrap();
        for chain in chains.values() {
            chain.lock().unwrap().flush_empty();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::FakeDriver;

    fn allocator() -> Allocator {
        Allocator::new(Arc::new(FakeDriver::new()))
    }

    #[test]
    fn small_allocation_is_aligned_and_in_bounds() {
        let allocator = allocator();
        let allocation = allocator
            .allocate(1024, 256, 0, AllocationKind::Normal)
            .unwrap();
        assert_eq!(allocation.offset() % 256, 0);
        assert!(allocation.offset() + allocation.size() <= CHUNK_SIZE);
        assert!(!allocation.is_dedicated());
    }

    #[test]
    fn freeing_and_reallocating_can_reuse_the_range() {
        let allocator = allocator();
        let first = allocator
            .allocate(1024, 256, 0, AllocationKind::Normal)
            .unwrap();
        let first_offset = first.offset();
        allocator.free(first);
        let second = allocator
            .allocate(1024, 256, 0, AllocationKind::Normal)
            .unwrap();
        assert_eq!(first_offset, second.offset());
    }

    #[test]
    fn oversize_request_gets_a_dedicated_block() {
        let allocator = allocator();
        let allocation = allocator
            .allocate(16 * 1024 * 1024, 1, 0, AllocationKind::Normal)
            .unwrap();
        assert!(allocation.is_dedicated());
    }

    #[test]
    fn normal_and_optimal_image_share_a_chain() {
        let allocator = allocator();
        let a = allocator
            .allocate(1024, 1, 0, AllocationKind::Normal)
            .unwrap();
        let b = allocator
            .allocate(1024, 1, 0, AllocationKind::OptimalImage)
            .unwrap();
        // Both land in the same chunk of the same chain: the second
        // allocation's memory handle matches the first's.
        assert_eq!(a.memory(), b.memory());
    }

    #[test]
    fn short_lived_allocations_do_not_share_with_normal() {
        let allocator = allocator();
        let normal = allocator
            .allocate(1024, 1, 0, AllocationKind::Normal)
            .unwrap();
        let short_lived = allocator
            .allocate(1024, 1, 0, AllocationKind::ShortLived)
            .unwrap();
        assert_ne!(normal.memory(), short_lived.memory());
    }

    #[test]
    fn flush_empty_allocations_releases_empty_chunks() {
        let allocator = allocator();
        let allocation = allocator
            .allocate(1024, 1, 0, AllocationKind::Normal)
            .unwrap();
        let memory = allocation.memory();
        allocator.free(allocation);
        allocator.flush_empty_allocations();
        // Re-allocating the same kind/type now creates a brand new
        // chunk, since the old one was flushed away.
        let next = allocator
            .allocate(1024, 1, 0, AllocationKind::Normal)
            .unwrap();
        assert_ne!(memory, next.memory());
    }

    #[test]
    fn surviving_allocation_keeps_its_chunk_after_a_sibling_is_flushed() {
        let allocator = allocator();
        // a1 lands in chunk0, a2 spills into a second chunk of the same
        // chain once chunk0 is full.
        let a1 = allocator
            .allocate(5 * 1024 * 1024, 1, 0, AllocationKind::Normal)
            .unwrap();
        let a2 = allocator
            .allocate(5 * 1024 * 1024, 1, 0, AllocationKind::Normal)
            .unwrap();
        assert_ne!(a1.memory(), a2.memory());

        // Freeing a1 empties chunk0; flushing removes it, which used to
        // shift a Vec-indexed chunk1 down to index 0.
        allocator.free(a1);
        allocator.flush_empty_allocations();

        // a2's chunk must still be reachable under its own key, not
        // whatever chunk now occupies the old Vec slot.
        drop(a2);
    }

    #[test]
    fn out_of_memory_surfaces_as_allocator_error() {
        let fake = FakeDriver::new();
        fake.fail_next_allocation();
        let allocator = Allocator::new(Arc::new(fake));
        let result = allocator.allocate(1024, 1, 0, AllocationKind::Normal);
        assert!(matches!(result, Err(AllocatorError::OutOfMemory { .. })));
    }
}
