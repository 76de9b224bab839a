//! Pollable completion handles for transfer operations.
//!
//! Shaped after the `Arc<Mutex<Option<Result<T, E>>>>` completion
//! pattern used by this codebase's async-operation plumbing elsewhere,
//! but polled rather than awaited: the transfer context's concurrency
//! model is a worker-thread pool, not an async runtime, so there is no
//! executor to hand a `Future` to.

use std::sync::{Arc, Mutex};

/// A transfer was cancelled before it completed, typically because
/// [`super::context::TransferContext::remove_operations_for`] tore it
/// down while it was still in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

struct Shared<T> {
    result: Mutex<Option<Result<T, Cancelled>>>,
}

/// The producing side of a [`CompletionChain`]. Held by whatever task
/// actually performs the copy.
pub struct CompletionSender<T> {
    shared: Arc<Shared<T>>,
}

impl<T> CompletionSender<T> {
    /// Record the operation's result. No-op if the handle was already
    /// cancelled or already completed.
    pub fn complete(self, value: T) {
        let mut slot = self.shared.result.lock().unwrap();
        if slot.is_none() {
            *slot = Some(Ok(value));
        }
    }

    /// Mark the operation as cancelled.
    pub fn cancel(self) {
        let mut slot = self.shared.result.lock().unwrap();
        if slot.is_none() {
            *slot = Some(Err(Cancelled));
        }
    }
}

/// A handle client code polls to learn whether a deferred transfer has
/// finished. Cloning shares the same underlying slot.
#[derive(Clone)]
pub struct CompletionChain<T> {
    shared: Arc<Shared<T>>,
}

impl<T> CompletionChain<T> {
    /// Create a linked sender/chain pair for one operation.
    #[must_use]
    pub fn new() -> (CompletionSender<T>, Self) {
        let shared = Arc::new(Shared {
            result: Mutex::new(None),
        });
        (
            CompletionSender {
                shared: shared.clone(),
            },
            Self { shared },
        )
    }

    /// Non-blocking check: has the operation finished (successfully or
    /// via cancellation)?
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.shared.result.lock().unwrap().is_some()
    }

    /// Take the result if it is ready, leaving the slot empty. Returns
    /// `None` if the operation hasn't finished yet.
    pub fn try_take(&self) -> Option<Result<T, Cancelled>> {
        self.shared.result.lock().unwrap().take()
    }
}

impl<T> Default for CompletionChain<T> {
    fn default() -> Self {
        Self::new().1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_is_observable_after_complete() {
        let (sender, chain) = CompletionChain::new();
        assert!(!chain.is_ready());
        sender.complete(42u32);
        assert!(chain.is_ready());
        assert_eq!(chain.try_take(), Some(Ok(42)));
    }

    #[test]
    fn cancellation_is_observable() {
        let (sender, chain) = CompletionChain::<u32>::new();
        sender.cancel();
        assert_eq!(chain.try_take(), Some(Err(Cancelled)));
    }

    #[test]
    fn try_take_only_returns_once() {
        let (sender, chain) = CompletionChain::new();
        sender.complete(1u32);
        assert!(chain.try_take().is_some());
        assert!(chain.try_take().is_none());
    }
}
