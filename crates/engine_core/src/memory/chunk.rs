//! Suballocation chunks (`spec.md` §3 "Suballocation chunk", §4.A).

use super::block::DeviceMemoryBlock;

/// A fixed-size slice of a [`DeviceMemoryBlock`], managed by its own
/// free list. `spec.md` §3: "allocations from a chunk never cross chunk
/// boundaries."
pub struct Chunk {
    block: DeviceMemoryBlock,
    /// Free byte ranges as `(offset, size)`, sorted by offset and kept
    /// coalesced so an empty chunk always has exactly one range
    /// spanning the whole chunk (invariant 2 in `spec.md` §8).
    free_ranges: Vec<(u64, u64)>,
}

fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two() || alignment == 0);
    if alignment <= 1 {
        value
    } else {
        (value + alignment - 1) & !(alignment - 1)
    }
}

impl Chunk {
    /// Wrap a freshly allocated block as an entirely-free chunk.
    #[must_use]
    pub fn new(block: DeviceMemoryBlock) -> Self {
        let size = block.size();
        Self {
            block,
            free_ranges: vec![(0, size)],
        }
    }

    /// The block backing this chunk.
    #[must_use]
    pub const fn block(&self) -> &DeviceMemoryBlock {
        &self.block
    }

    /// Total size of the chunk.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.block.size()
    }

    /// Whether the chunk has no live allocations — i.e. its free-range
    /// list covers the whole chunk.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.free_ranges.len() == 1 && self.free_ranges[0] == (0, self.size())
    }

    /// First-fit search for a range satisfying `size`/`alignment`.
    /// Splits the found range and returns the aligned offset.
    pub fn try_allocate(&mut self, size: u64, alignment: u64) -> Option<u64> {
        for i in 0..self.free_ranges.len() {
            let (range_offset, range_size) = self.free_ranges[i];
            let aligned_offset = align_up(range_offset, alignment);
            let padding = aligned_offset - range_offset;
            if padding + size > range_size {
                continue;
            }
            let range_end = range_offset + range_size;
            self.free_ranges.remove(i);
            // Leading remainder (alignment padding).
            if padding > 0 {
                self.free_ranges.push((range_offset, padding));
            }
            // Trailing remainder.
            let used_end = aligned_offset + size;
            if used_end < range_end {
                self.free_ranges.push((used_end, range_end - used_end));
            }
            self.free_ranges.sort_unstable_by_key(|r| r.0);
            return Some(aligned_offset);
        }
        None
    }

    /// Return a previously allocated range to the free list, coalescing
    /// it with adjacent free ranges.
    pub fn free(&mut self, offset: u64, size: u64) {
        self.free_ranges.push((offset, size));
        self.free_ranges.sort_unstable_by_key(|r| r.0);
        let mut merged: Vec<(u64, u64)> = Vec::with_capacity(self.free_ranges.len());
        for &(start, len) in &self.free_ranges {
            if let Some(last) = merged.last_mut() {
                let (last_start, last_len): &mut (u64, u64) = last;
                if *last_start + *last_len == start {
                    *last_len += len;
                    continue;
                }
            }
            merged.push((start, len));
        }
        self.free_ranges = merged;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::FakeDriver;
    use crate::driver::{GpuDriver, MemoryBlockRequest};
    use std::sync::Arc;

    fn chunk_of(size: u64) -> Chunk {
        let driver: Arc<dyn GpuDriver> = Arc::new(FakeDriver::new());
        let handle = driver
            .allocate_memory(MemoryBlockRequest {
                size,
                memory_type_index: 0,
                host_visible: false,
            })
            .unwrap();
        Chunk::new(DeviceMemoryBlock::new(driver, handle, size, 0, false))
    }

    #[test]
    fn allocation_is_aligned_and_in_bounds() {
        let mut chunk = chunk_of(8 * 1024 * 1024);
        let offset = chunk.try_allocate(1024, 256).unwrap();
        assert_eq!(offset % 256, 0);
        assert!(offset + 1024 <= chunk.size());
    }

    #[test]
    fn freeing_everything_restores_emptiness() {
        let mut chunk = chunk_of(4096);
        let a = chunk.try_allocate(1024, 64).unwrap();
        let b = chunk.try_allocate(1024, 64).unwrap();
        assert!(!chunk.is_empty());
        chunk.free(a, 1024);
        chunk.free(b, 1024);
        assert!(chunk.is_empty());
    }

    #[test]
    fn exhausted_chunk_rejects_further_allocations() {
        let mut chunk = chunk_of(1024);
        assert!(chunk.try_allocate(1024, 1).is_some());
        assert!(chunk.try_allocate(1, 1).is_none());
    }

    #[test]
    fn repeated_allocate_free_can_reuse_the_same_range() {
        let mut chunk = chunk_of(4096);
        let first = chunk.try_allocate(1024, 256).unwrap();
        chunk.free(first, 1024);
        let second = chunk.try_allocate(1024, 256).unwrap();
        assert_eq!(first, second);
    }
}
