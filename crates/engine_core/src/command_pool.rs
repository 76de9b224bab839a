//! Per-thread, per-queue command pool management (`spec.md` §4.B).
//!
//! Command buffers are never recorded or submitted from more than one
//! thread, so pools are partitioned by `(thread, queue)`. Pools are
//! recycled in bulk by "flipping": instead of resetting each pool the
//! instant its command buffers retire, the manager keeps the current
//! flip's pools live until the *next* flip starts, then resets the
//! previous flip's pools for reuse. This keeps at most two flips' worth
//! of pools alive at once while letting outstanding work from the
//! previous flip still be referenced safely.

use crate::driver::{CommandBufferHandle, CommandPoolHandle, DriverError, GpuDriver};
use crate::queue::QueueId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::ThreadId;

/// Monotonically increasing flip counter. Command pools are scoped to
/// the flip they were allocated during.
pub type FlipId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Key {
    thread: ThreadId,
    queue: QueueId,
}

struct Pool {
    handle: CommandPoolHandle,
    flip: FlipId,
}

/// Owns every `(thread, queue)` command pool and the flip counter that
/// scopes them. Shared across threads: pool lookup takes a read lock,
/// pool creation and flipping take a write lock, matching `spec.md`
/// §5's "readers don't block readers" concurrency model.
pub struct CommandPoolManager {
    driver: Arc<dyn GpuDriver>,
    pools: RwLock<HashMap<Key, Pool>>,
    current_flip: AtomicU64,
}

impl CommandPoolManager {
    /// Create a manager with no pools yet allocated, starting at flip 0.
    #[must_use]
    pub fn new(driver: Arc<dyn GpuDriver>) -> Self {
        Self {
            driver,
            pools: RwLock::new(HashMap::new()),
            current_flip: AtomicU64::new(0),
        }
    }

    /// The flip currently in progress.
    #[must_use]
    pub fn current_flip(&self) -> FlipId {
        self.current_flip.load(Ordering::Acquire)
    }

    /// Allocate a primary command buffer for use on `queue` from the
    /// calling thread's pool for the current flip, creating the pool
    /// (and a fresh one if the previous flip's pool is stale) as
    /// needed.
    pub fn allocate_command_buffer(
        &self,
        queue_family: u32,
        queue: QueueId,
    ) -> Result<CommandBufferHandle, DriverError> {
        let key = Key {
            thread: std::thread::current().id(),
            queue,
        };
        let flip = self.current_flip();

        {
            let pools = self.pools.read().unwrap();
            if let Some(pool) = pools.get(&key) {
                if pool.flip == flip {
                    return self.driver.allocate_command_buffer(pool.handle);
                }
            }
        }

        let mut pools = self.pools.write().unwrap();
        match pools.get(&key) {
            Some(pool) if pool.flip == flip => self.driver.allocate_command_buffer(pool.handle),
            Some(pool) => {
                // Stale pool from an earlier flip: reset and reuse its
                // handle rather than creating a brand new one.
                self.driver.reset_command_pool(pool.handle);
                let handle = pool.handle;
                pools.insert(key, Pool { handle, flip });
                self.driver.allocate_command_buffer(handle)
            }
            None => {
                let handle = self.driver.create_command_pool(queue_family)?;
                pools.insert(key, Pool { handle, flip });
                self.driver.allocate_command_buffer(handle)
            }
        }
    }

    /// Advance the flip counter. Pools allocated during the flip that
    /// just ended are left untouched until something next requests a
    /// command buffer from them, at which point they're reset lazily.
    /// `spec.md` §4.B: "flipping does not itself reset any pool; it
    /// only changes which flip new allocations are scoped to."
    pub fn flip(&self) -> FlipId {
        self.current_flip.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Number of distinct `(thread, queue)` pools currently tracked.
    #[must_use]
    pub fn pool_count(&self) -> usize {
        self.pools.read().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::FakeDriver;

    fn manager() -> CommandPoolManager {
        CommandPoolManager::new(Arc::new(FakeDriver::new()))
    }

    #[test]
    fn first_allocation_creates_a_pool() {
        let manager = manager();
        manager
            .allocate_command_buffer(0, QueueId::Graphics)
            .unwrap();
        assert_eq!(manager.pool_count(), 1);
    }

    #[test]
    fn same_thread_and_queue_reuse_the_pool_within_a_flip() {
        let manager = manager();
        manager
            .allocate_command_buffer(0, QueueId::Graphics)
            .unwrap();
        manager
            .allocate_command_buffer(0, QueueId::Graphics)
            .unwrap();
        assert_eq!(manager.pool_count(), 1);
    }

    #[test]
    fn distinct_queues_get_distinct_pools() {
        let manager = manager();
        manager
            .allocate_command_buffer(0, QueueId::Graphics)
            .unwrap();
        manager
            .allocate_command_buffer(1, QueueId::Transfer)
            .unwrap();
        assert_eq!(manager.pool_count(), 2);
    }

    #[test]
    fn flip_advances_the_counter_without_creating_new_pools() {
        let manager = manager();
        manager
            .allocate_command_buffer(0, QueueId::Graphics)
            .unwrap();
        assert_eq!(manager.flip(), 1);
        assert_eq!(manager.pool_count(), 1);
        manager
            .allocate_command_buffer(0, QueueId::Graphics)
            .unwrap();
        // The stale pool from flip 0 is reused, not duplicated.
        assert_eq!(manager.pool_count(), 1);
    }
}
