//! Chunk chains (`spec.md` §3 "Chain", §4.A).

use super::block::DeviceMemoryBlock;
use super::chunk::Chunk;
use super::AllocationKind;
use slotmap::{DefaultKey, SlotMap};

/// Stable handle to a chunk within a [`Chain`]. Unlike a `Vec` index,
/// this survives other chunks being removed by [`Chain::flush_empty`],
/// which is why [`super::handle::Allocation`] stores one instead of a
/// raw position.
pub(crate) type ChunkKey = DefaultKey;

/// Groups of [`AllocationKind`] that share a chain. `spec.md` §4.A:
/// "kinds {normal, optimal-image} share a chain to reduce
/// fragmentation" unless the driver's buffer/image granularity forces a
/// split; short-lived allocations always get their own chains so they
/// can be reclaimed quickly without fragmenting long-lived chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum ChainGroup {
    /// `Normal` and `OptimalImage`.
    General,
    /// `ShortLived`.
    ShortLived,
    /// `ShortLivedOptimalImage`.
    ShortLivedOptimalImage,
    /// `MappedMemory`.
    Mapped,
}

impl ChainGroup {
    pub(crate) fn of(kind: AllocationKind) -> Self {
        match kind {
            AllocationKind::Normal | AllocationKind::OptimalImage => Self::General,
            AllocationKind::ShortLived => Self::ShortLived,
            AllocationKind::ShortLivedOptimalImage => Self::ShortLivedOptimalImage,
            AllocationKind::MappedMemory => Self::Mapped,
        }
    }
}

/// Key identifying one chain: a group of allocation kinds plus the
/// physical-device memory-type index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ChainKey {
    pub group: ChainGroup,
    pub memory_type_index: u32,
}

/// All chunks for one `(allocation-kind-group, memory-type)` pair.
/// Chunks are keyed by a stable [`ChunkKey`] rather than a `Vec`
/// position, since [`Chain::flush_empty`] removes chunks out of order
/// and a live [`super::handle::Allocation`] must keep pointing at the
/// right one regardless of what else gets flushed around it.
pub(crate) struct Chain {
    pub chunks: SlotMap<ChunkKey, Chunk>,
}

impl Chain {
    pub(crate) fn new() -> Self {
        Self {
            chunks: SlotMap::new(),
        }
    }

    /// First-fit across existing chunks only; does not create a new one.
    pub(crate) fn try_allocate_existing(
        &mut self,
        size: u64,
        alignment: u64,
    ) -> Option<(ChunkKey, u64)> {
        for (key, chunk) in self.chunks.iter_mut() {
            if let Some(offset) = chunk.try_allocate(size, alignment) {
                return Some((key, offset));
            }
        }
        None
    }

    /// Insert a freshly created chunk and allocate from it. Panics if
    /// the request doesn't fit a fresh chunk, which would indicate a
    /// caller bug (requests `>= CHUNK_SIZE` must go through the
    /// dedicated-block path instead).
    pub(crate) fn push_chunk_and_allocate(
        &mut self,
        block: DeviceMemoryBlock,
        size: u64,
        alignment: u64,
    ) -> (ChunkKey, u64) {
        let mut chunk = Chunk::new(block);
        let offset = chunk
            .try_allocate(size, alignment)
            .expect("a fresh chunk must satisfy a sub-chunk-size request");
        let key = self.chunks.insert(chunk);
        (key, offset)
    }

    /// Release every empty chunk back to the driver, in place. Chunks
    /// still holding live allocations keep their key; only a key's
    /// slot, never its position, can be invalidated.
    pub(crate) fn flush_empty(&mut self) {
        self.chunks.retain(|_, chunk| !chunk.is_empty());
    }
}
