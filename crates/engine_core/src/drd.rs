//! Deferred resource destruction (`spec.md` §4.C).
//!
//! GPU resources can't be destroyed the instant their last reference
//! drops: the GPU might still be reading them. Every destruction is
//! postponed behind a fence and only actually run once that fence
//! signals, which `update` drives forward once per frame.

use crate::queue::QueueFamily;
use crate::sync::Fence;
use std::collections::VecDeque;
use std::sync::Arc;

type Destroy = Box<dyn FnOnce() + Send>;

/// A resource destruction postponed behind a fence. `spec.md` §3 "DRD
/// entry": `(fence, owned resources, queue-family tag, optional
/// sub-list)`. The sub-list holds resources rolled in from the
/// no-fence-yet pending list by [`DeferredResourceDestructor::postpone_destruction_inclusive`].
struct Entry {
    fence: Arc<Fence>,
    queue_family: QueueFamily,
    resources: Vec<Destroy>,
    sublist: Vec<Destroy>,
}

impl Entry {
    fn run(self) {
        for destroy in self.resources {
            destroy();
        }
        for destroy in self.sublist {
            destroy();
        }
    }
}

/// Runs postponed destructions once their guarding fence signals.
/// Entries are processed in FIFO order; `spec.md` §4.C: "a later entry
/// never runs before an earlier one on the same fence," which holds
/// automatically from FIFO draining plus fences only ever becoming
/// *more* signaled over time.
#[derive(Default)]
pub struct DeferredResourceDestructor {
    pending: VecDeque<Entry>,
    /// Resources postponed with no fence yet, each tagged with the
    /// queue family they belong to. `spec.md` §4.C: "enqueue into a
    /// pending list until an inclusive postponement rolls them in."
    pending_no_fence: Vec<(QueueFamily, Destroy)>,
}

impl DeferredResourceDestructor {
    /// Create an empty destructor.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            pending_no_fence: Vec::new(),
        }
    }

    /// Postpone `destroy` until `fence` signals. If `fence` is already
    /// signaled, `destroy` runs immediately instead of being enqueued.
    pub fn postpone(
        &mut self,
        queue_family: QueueFamily,
        fence: Arc<Fence>,
        destroy: impl FnOnce() + Send + 'static,
    ) {
        if fence.is_signaled() {
            destroy();
            return;
        }
        self.pending.push_back(Entry {
            fence,
            queue_family,
            resources: vec![Box::new(destroy)],
            sublist: Vec::new(),
        });
    }

    /// Enqueue `destroy` into the no-fence-yet pending list, tagged
    /// with `queue_family`. It runs only once a later
    /// [`Self::postpone_destruction_inclusive`] call for the same
    /// queue family rolls it into a real, fenced entry.
    pub fn postpone_to_next_fence(
        &mut self,
        queue_family: QueueFamily,
        destroy: impl FnOnce() + Send + 'static,
    ) {
        self.pending_no_fence.push((queue_family, Box::new(destroy)));
    }

    /// Create a new entry behind `fence` for `destroy`, whose sub-list
    /// absorbs every item currently in the no-fence-yet pending list
    /// that matches `queue_family`. Items for other queue families are
    /// left in the pending list untouched. If `fence` is already
    /// signaled, `destroy` and the absorbed sub-list run immediately.
    pub fn postpone_destruction_inclusive(
        &mut self,
        queue_family: QueueFamily,
        fence: Arc<Fence>,
        destroy: impl FnOnce() + Send + 'static,
    ) {
        let mut sublist = Vec::new();
        let mut remaining = Vec::new();
        for (family, boxed) in self.pending_no_fence.drain(..) {
            if family == queue_family {
                sublist.push(boxed);
            } else {
                remaining.push((family, boxed));
            }
        }
        self.pending_no_fence = remaining;

        if fence.is_signaled() {
            destroy();
            for absorbed in sublist {
                absorbed();
            }
            return;
        }

        self.pending.push_back(Entry {
            fence,
            queue_family,
            resources: vec![Box::new(destroy)],
            sublist,
        });
    }

    /// Append another destructor's fenced entries onto this one,
    /// preserving FIFO order. Neither destructor may have un-fenced
    /// items waiting in its no-fence-yet pending list at the time of
    /// append, since those can't be safely spliced without knowing
    /// which later `postpone_destruction_inclusive` call they belong
    /// to.
    pub fn append(&mut self, other: &mut Self) {
        debug_assert!(
            self.pending_no_fence.is_empty(),
            "append target has un-fenced pending items"
        );
        debug_assert!(
            other.pending_no_fence.is_empty(),
            "append source has un-fenced pending items"
        );
        self.pending.append(&mut other.pending);
    }

    /// Run every entry whose fence has signaled, in FIFO order,
    /// stopping at the first unsignaled fence so ordering is preserved.
    /// Call once per frame.
    pub fn update(&mut self) {
        while let Some(entry) = self.pending.front() {
            if !entry.fence.is_signaled() {
                break;
            }
            let entry = self.pending.pop_front().unwrap();
            entry.run();
        }
    }

    /// Number of fenced destructions still waiting on a fence.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Number of destructions waiting in the no-fence-yet pending list.
    #[must_use]
    pub fn pending_no_fence_count(&self) -> usize {
        self.pending_no_fence.len()
    }
}

impl Drop for DeferredResourceDestructor {
    /// Busy-waits for every remaining fence to signal so no resource
    /// leaks past the destructor's own lifetime. `spec.md` §4.C: "the
    /// destructor must not be dropped with outstanding work; it waits."
    fn drop(&mut self) {
        while let Some(entry) = self.pending.pop_front() {
            entry.fence.wait(u64::MAX);
            entry.run();
        }
    }
}
