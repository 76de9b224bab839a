//! Named queues and queue serialization (`spec.md` §3, §6).

use crate::driver::QueueHandle;
use std::collections::HashMap;
use std::sync::Mutex;

/// A stable identifier for a GPU queue. `spec.md` §6 names five queues
/// by string id; rather than stringly-typing every call site, the five
/// well-known ones get variants and anything else falls back to
/// `Custom`, preserving the "modules and client code select queues by
/// this id" contract for plug-in collaborators that add their own
/// queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueId {
    /// The graphics queue.
    Graphics,
    /// The primary transfer queue.
    Transfer,
    /// A secondary, lower-priority transfer queue.
    SlowTransfer,
    /// The compute queue.
    Compute,
    /// The sparse-binding queue.
    SparseBinding,
    /// A queue identified by a module-supplied name, interned by the
    /// [`QueueRegistry`].
    Custom(u32),
}

impl QueueId {
    /// The five names `spec.md` §6 publishes.
    pub const NAMED: [&'static str; 5] =
        ["graphics", "transfer", "slow_transfer", "compute", "sparse_binding"];

    /// Resolve a well-known name to its `QueueId`, if it is one of the
    /// five named queues.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "graphics" => Some(Self::Graphics),
            "transfer" => Some(Self::Transfer),
            "slow_transfer" => Some(Self::SlowTransfer),
            "compute" => Some(Self::Compute),
            "sparse_binding" => Some(Self::SparseBinding),
            _ => None,
        }
    }
}

/// A Vulkan queue family: a capability class that partitions queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueFamily(pub u32);

/// A single GPU queue. `spec.md` §3: "each queue is externally
/// serialized — at most one host submission is in flight at a time per
/// queue", so every `Queue` owns the lock that enforces that.
pub struct Queue {
    id: QueueId,
    family: QueueFamily,
    handle: QueueHandle,
    submission_lock: Mutex<()>,
}

impl Queue {
    /// Wrap a driver queue handle under the given id and family.
    #[must_use]
    pub fn new(id: QueueId, family: QueueFamily, handle: QueueHandle) -> Self {
        Self {
            id,
            family,
            handle,
            submission_lock: Mutex::new(()),
        }
    }

    /// The queue's stable id.
    #[must_use]
    pub const fn id(&self) -> QueueId {
        self.id
    }

    /// The queue family this queue belongs to.
    #[must_use]
    pub const fn family(&self) -> QueueFamily {
        self.family
    }

    /// The underlying driver handle.
    #[must_use]
    pub const fn handle(&self) -> QueueHandle {
        self.handle
    }

    /// Run `f` while holding this queue's submission lock, serializing
    /// it against every other submission to the same queue.
    pub fn with_exclusive_submission<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.submission_lock.lock().unwrap();
        f()
    }
}

/// Registry of all queues the engine knows about, keyed by [`QueueId`].
/// Owns the `Custom` name interning table.
pub struct QueueRegistry {
    queues: HashMap<QueueId, Queue>,
    custom_names: Mutex<HashMap<String, u32>>,
    next_custom: std::sync::atomic::AtomicU32,
}

impl QueueRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            queues: HashMap::new(),
            custom_names: Mutex::new(HashMap::new()),
            next_custom: std::sync::atomic::AtomicU32::new(0),
        }
    }

    /// Register a queue under its id. Replaces any previous queue with
    /// the same id.
    pub fn insert(&mut self, queue: Queue) {
        self.queues.insert(queue.id(), queue);
    }

    /// Look up a queue by id.
    #[must_use]
    pub fn get(&self, id: QueueId) -> Option<&Queue> {
        self.queues.get(&id)
    }

    /// Find a registered queue belonging to `family`. Used to resolve a
    /// queue-family ownership-transfer target (a `QueueFamily`) into a
    /// concrete queue to submit the acquire/release on.
    #[must_use]
    pub fn id_for_family(&self, family: QueueFamily) -> Option<QueueId> {
        self.queues
            .values()
            .find(|queue| queue.family() == family)
            .map(Queue::id)
    }

    /// Intern a module-supplied queue name into a stable [`QueueId::Custom`].
    pub fn intern_custom(&self, name: &str) -> QueueId {
        let mut names = self.custom_names.lock().unwrap();
        if let Some(&id) = names.get(name) {
            return QueueId::Custom(id);
        }
        let id = self
            .next_custom
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        names.insert(name.to_string(), id);
        QueueId::Custom(id)
    }
}

impl Default for QueueRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::FakeDriver;
    use crate::driver::GpuDriver;
    use ash::vk::Handle;

    fn fake_queue(id: QueueId, driver: &FakeDriver) -> Queue {
        let _ = driver;
        Queue::new(id, QueueFamily(0), ash::vk::Queue::from_raw(1))
    }

    #[test]
    fn named_queues_round_trip() {
        for name in QueueId::NAMED {
            assert!(QueueId::from_name(name).is_some());
        }
        assert!(QueueId::from_name("bogus").is_none());
    }

    #[test]
    fn custom_names_intern_stably() {
        let registry = QueueRegistry::new();
        let a = registry.intern_custom("physics-upload");
        let b = registry.intern_custom("physics-upload");
        let c = registry.intern_custom("other");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn id_for_family_finds_the_matching_queue() {
        let mut registry = QueueRegistry::new();
        registry.insert(Queue::new(QueueId::Graphics, QueueFamily(0), ash::vk::Queue::from_raw(1)));
        registry.insert(Queue::new(QueueId::Transfer, QueueFamily(1), ash::vk::Queue::from_raw(2)));
        assert_eq!(registry.id_for_family(QueueFamily(1)), Some(QueueId::Transfer));
        assert_eq!(registry.id_for_family(QueueFamily(9)), None);
    }

    #[test]
    fn queue_serializes_submissions() {
        let driver = FakeDriver::new();
        let queue = fake_queue(QueueId::Graphics, &driver);
        let result = queue.with_exclusive_submission(|| 42);
        assert_eq!(result, 42);
    }
}
