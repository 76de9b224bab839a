//! A single pending transfer operation (`spec.md` §3 "Transfer-context
//! operation").

use crate::driver::BufferHandle;
use crate::queue::QueueFamily;
use crate::transfer::completion::CompletionSender;

/// One buffer upload queued on a [`super::context::TransferContext`].
/// Carries its own payload so the context can memcpy it into a staging
/// buffer without the caller needing to keep the source alive.
pub struct Operation {
    /// Destination buffer.
    pub destination: BufferHandle,
    /// Byte offset into the destination buffer.
    pub destination_offset: u64,
    /// Data to copy, owned so it survives until the copy actually runs.
    pub data: Vec<u8>,
    /// Queue family the destination is currently owned by, if it needs
    /// to be released from there before the transfer queue can touch
    /// it. `None` means the destination is already owned by the
    /// transfer queue (a fresh resource, typically).
    pub source_family: Option<QueueFamily>,
    /// Queue family that will use the destination after the transfer,
    /// if ownership needs to move there via an acquire/release barrier
    /// pair. `None` means no ownership transfer is needed (the
    /// transfer queue and the consuming queue share a family).
    pub target_family: Option<QueueFamily>,
    /// Completion sender, consumed once the copy has been recorded.
    pub(crate) completion: Option<CompletionSender<()>>,
}

impl Operation {
    /// Start building an operation with no ownership transfer and no
    /// completion notification.
    #[must_use]
    pub fn new(destination: BufferHandle, destination_offset: u64, data: Vec<u8>) -> Self {
        Self {
            destination,
            destination_offset,
            data,
            source_family: None,
            target_family: None,
            completion: None,
        }
    }

    /// Record that `destination` must be released from `family` before
    /// the transfer queue can copy into it.
    #[must_use]
    pub fn with_source_family(mut self, family: QueueFamily) -> Self {
        self.source_family = Some(family);
        self
    }

    /// Request a queue-family ownership transfer to `family` once the
    /// copy completes.
    #[must_use]
    pub fn with_target_family(mut self, family: QueueFamily) -> Self {
        self.target_family = Some(family);
        self
    }
}
