//! The submission-record builder (`spec.md` §4.E).
//!
//! A `SubmitInfoBuilder` walks an ordered set of phases — wait, then
//! either execute (regular submission) or bind (sparse-resource
//! submission), then signal, then an optional `signal_fence` — and
//! accumulates one or more [`SubmitRecord`]s. A builder is not limited
//! to a single record: calling a phase method that regresses past where
//! the builder already is (for example `wait` again after `execute` has
//! run) implicitly cuts the record in progress and starts a fresh one,
//! and `sync` does the same thing explicitly. `finish`/`deferred_submit`
//! hand over every record the builder accumulated, in order.

use crate::driver::{CommandBufferHandle, FenceHandle, SemaphoreHandle};
use crate::queue::QueueId;
use ash::vk::PipelineStageFlags;
use thiserror::Error;

/// Errors from misusing the builder's phase order.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuilderError {
    /// A phase method was called while the builder was in a phase that
    /// doesn't support it, and the call wasn't a regression a new record
    /// could absorb (for example, signaling before any work was
    /// executed in the current record).
    #[error("submit-info builder received {method} while in phase {phase:?}")]
    WrongPhase {
        /// The phase the builder was actually in.
        phase: Phase,
        /// The method that was called.
        method: &'static str,
    },
    /// `execute` was called on a sparse-binding record, or `bind` was
    /// called on a regular one.
    #[error("sparse/regular submission mismatch: record is sparse = {record_is_sparse}")]
    SparseMismatch {
        /// Whether the record in progress is a sparse-binding record.
        record_is_sparse: bool,
    },
}

/// The builder's current phase within its in-progress record. Phases
/// are visited in order; `Signal` may be skipped entirely (a record can
/// have no signals). `Done` means a fence was attached: `spec.md` §4.E
/// "after a fence is attached, any subsequent operation starts a new
/// record," so every phase method treats `Done` as an automatic cut.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Accepting `wait` calls, or ready to move to execute/bind.
    Wait,
    /// Accepting `execute` or `bind` calls, or ready to move to signal.
    ExecuteOrBind,
    /// Accepting `signal` or `signal_fence` calls.
    Signal,
    /// `signal_fence` was called; the next phase method starts a new
    /// record.
    Done,
}

impl Phase {
    const fn rank(self) -> u8 {
        match self {
            Self::Wait => 0,
            Self::ExecuteOrBind => 1,
            Self::Signal => 2,
            Self::Done => 3,
        }
    }
}

/// A sparse-image bind operation, recorded opaquely: this crate only
/// schedules sparse binds, it never constructs the underlying
/// `VkSparseImageMemoryBind` payload itself.
#[derive(Debug, Clone, Copy)]
pub struct SparseBind {
    /// Offset into the image's mip/array resource the bind covers.
    pub resource_offset: u64,
    /// Size of the bound region in bytes.
    pub size: u64,
}

/// A fully built submission: everything a queue submit or a deferred
/// run needs. See `spec.md` §3 "Submission record".
#[derive(Debug, Clone)]
pub struct SubmitRecord {
    /// The queue this record targets.
    pub queue: QueueId,
    /// Whether this is a sparse-binding submission rather than a
    /// regular command-buffer submission.
    pub sparse: bool,
    /// Semaphores to wait on before executing, paired with the
    /// pipeline stage at which the wait applies.
    pub waits: Vec<(SemaphoreHandle, PipelineStageFlags)>,
    /// Command buffers to execute, in order. Empty for sparse records.
    pub command_buffers: Vec<CommandBufferHandle>,
    /// Sparse binds to perform, in order. Empty for regular records.
    pub sparse_binds: Vec<SparseBind>,
    /// Semaphores to signal once the submission completes.
    pub signals: Vec<SemaphoreHandle>,
    /// Fence to signal once the submission completes, if any.
    pub fence: Option<FenceHandle>,
}

/// Fluent builder for a sequence of [`SubmitRecord`]s on one queue.
#[derive(Debug)]
pub struct SubmitInfoBuilder {
    queue: QueueId,
    sparse: bool,
    /// Records already cut, oldest first.
    records: Vec<SubmitRecord>,
    /// The record still being assembled.
    current: SubmitRecord,
    phase: Phase,
}

impl SubmitInfoBuilder {
    /// Start building a regular (non-sparse) submission for `queue`.
    #[must_use]
    pub fn on(queue: QueueId) -> Self {
        Self {
            queue,
            sparse: false,
            records: Vec::new(),
            current: Self::blank_record(queue, false),
            phase: Phase::Wait,
        }
    }

    /// Start building a sparse-binding submission for `queue`.
    #[must_use]
    pub fn sparse_bind_on(queue: QueueId) -> Self {
        Self {
            queue,
            sparse: true,
            records: Vec::new(),
            current: Self::blank_record(queue, true),
            phase: Phase::Wait,
        }
    }

    fn blank_record(queue: QueueId, sparse: bool) -> SubmitRecord {
        SubmitRecord {
            queue,
            sparse,
            waits: Vec::new(),
            command_buffers: Vec::new(),
            sparse_binds: Vec::new(),
            signals: Vec::new(),
            fence: None,
        }
    }

    /// Push the in-progress record and start a fresh, empty one.
    fn cut(&mut self) {
        let finished = std::mem::replace(&mut self.current, Self::blank_record(self.queue, self.sparse));
        self.records.push(finished);
        self.phase = Phase::Wait;
    }

    /// Make the builder ready to accept a call requiring one of
    /// `allowed` phases. If the builder already moved past every phase
    /// in `allowed` — including having a fence attached, which accepts
    /// nothing further — `spec.md` §4.E treats that as a regression and
    /// the in-progress record is cut before the call is validated.
    fn transition(&mut self, method_rank: u8, allowed: &[Phase], method: &'static str) -> Result<(), BuilderError> {
        if self.phase == Phase::Done || method_rank < self.phase.rank() {
            self.cut();
        }
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(BuilderError::WrongPhase {
                phase: self.phase,
                method,
            })
        }
    }

    /// Add a wait. Calling this after the in-progress record has moved
    /// on to execute/bind, signal, or a fence implicitly cuts that
    /// record and starts a new one in the wait phase.
    pub fn wait(mut self, semaphore: SemaphoreHandle, stage: PipelineStageFlags) -> Result<Self, BuilderError> {
        self.transition(Phase::Wait.rank(), &[Phase::Wait], "wait")?;
        self.current.waits.push((semaphore, stage));
        Ok(self)
    }

    /// Move past the wait phase and add a command buffer to execute.
    /// Only valid for non-sparse records.
    pub fn execute(mut self, command_buffer: CommandBufferHandle) -> Result<Self, BuilderError> {
        if self.sparse {
            return Err(BuilderError::SparseMismatch {
                record_is_sparse: true,
            });
        }
        self.transition(
            Phase::ExecuteOrBind.rank(),
            &[Phase::Wait, Phase::ExecuteOrBind],
            "execute",
        )?;
        self.phase = Phase::ExecuteOrBind;
        self.current.command_buffers.push(command_buffer);
        Ok(self)
    }

    /// Move past the wait phase and add a sparse bind. Only valid for
    /// sparse records.
    pub fn bind(mut self, bind: SparseBind) -> Result<Self, BuilderError> {
        if !self.sparse {
            return Err(BuilderError::SparseMismatch {
                record_is_sparse: false,
            });
        }
        self.transition(
            Phase::ExecuteOrBind.rank(),
            &[Phase::Wait, Phase::ExecuteOrBind],
            "bind",
        )?;
        self.phase = Phase::ExecuteOrBind;
        self.current.sparse_binds.push(bind);
        Ok(self)
    }

    /// Move past execute/bind and add a signal semaphore.
    pub fn signal(mut self, semaphore: SemaphoreHandle) -> Result<Self, BuilderError> {
        self.transition(
            Phase::Signal.rank(),
            &[Phase::ExecuteOrBind, Phase::Signal],
            "signal",
        )?;
        self.phase = Phase::Signal;
        self.current.signals.push(semaphore);
        Ok(self)
    }

    /// Attach the fence that will signal when the in-progress record
    /// completes. `spec.md` §4.E: this terminates the record — any
    /// further phase method call on this builder cuts it and starts a
    /// new one.
    pub fn signal_fence(mut self, fence: FenceHandle) -> Result<Self, BuilderError> {
        self.transition(
            Phase::Done.rank(),
            &[Phase::ExecuteOrBind, Phase::Signal],
            "signal_fence",
        )?;
        self.current.fence = Some(fence);
        self.phase = Phase::Done;
        Ok(self)
    }

    /// Explicitly cut the in-progress record and start a new one, even
    /// if no fence was attached. `spec.md` §4.E: `sync` is the record
    /// cut, distinct from `signal_fence` attaching a fence.
    #[must_use]
    pub fn sync(mut self) -> Self {
        self.cut();
        self
    }

    /// Finish the builder, returning every record it accumulated, in
    /// order — the in-progress one included even if it never reached
    /// `signal_fence`. A builder that never regressed and was never cut
    /// yields exactly one record.
    #[must_use]
    pub fn finish(mut self) -> Vec<SubmitRecord> {
        self.records.push(self.current);
        self.records
    }

    /// Finish the builder and hand every record it accumulated to `dqe`
    /// for deferred submission instead of submitting inline, per
    /// `spec.md` §4.E "a record built this way is never submitted
    /// inline." Consecutive records are separated by `dqe.defer_sync()`
    /// so a later record's run never starts before an earlier one's
    /// fully drains; a single-record builder (the common case) incurs
    /// no extra barrier.
    pub fn deferred_submit(self, dqe: &mut crate::dqe::DeferredQueueExecution) {
        let records = self.finish();
        let last = records.len().saturating_sub(1);
        for (index, record) in records.into_iter().enumerate() {
            dqe.defer_execution(record);
            if index != last {
                dqe.defer_sync();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{Queue, QueueFamily, QueueRegistry};
    use ash::vk::Handle;

    fn sem(raw: u64) -> SemaphoreHandle {
        ash::vk::Semaphore::from_raw(raw)
    }

    fn cmd(raw: u64) -> CommandBufferHandle {
        ash::vk::CommandBuffer::from_raw(raw)
    }

    fn fence(raw: u64) -> FenceHandle {
        ash::vk::Fence::from_raw(raw)
    }

    #[test]
    fn happy_path_builds_a_single_full_record() {
        let records = SubmitInfoBuilder::on(QueueId::Graphics)
            .wait(sem(1), PipelineStageFlags::TOP_OF_PIPE)
            .unwrap()
            .execute(cmd(1))
            .unwrap()
            .signal(sem(2))
            .unwrap()
            .finish();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.waits.len(), 1);
        assert_eq!(record.command_buffers.len(), 1);
        assert_eq!(record.signals.len(), 1);
        assert!(record.fence.is_none());
    }

    #[test]
    fn execute_on_a_sparse_record_is_rejected() {
        let err = SubmitInfoBuilder::sparse_bind_on(QueueId::SparseBinding)
            .execute(cmd(1))
            .unwrap_err();
        assert!(matches!(err, BuilderError::SparseMismatch { .. }));
    }

    #[test]
    fn bind_on_a_regular_record_is_rejected() {
        let err = SubmitInfoBuilder::on(QueueId::Graphics)
            .bind(SparseBind {
                resource_offset: 0,
                size: 1,
            })
            .unwrap_err();
        assert!(matches!(err, BuilderError::SparseMismatch { .. }));
    }

    #[test]
    fn signal_before_execute_is_a_phase_error() {
        let err = SubmitInfoBuilder::on(QueueId::Graphics)
            .signal(sem(1))
            .unwrap_err();
        assert!(matches!(err, BuilderError::WrongPhase { .. }));
    }

    #[test]
    fn signal_fence_is_terminal_until_the_next_call_cuts_a_new_record() {
        let builder = SubmitInfoBuilder::on(QueueId::Graphics)
            .execute(cmd(1))
            .unwrap()
            .signal_fence(fence(1))
            .unwrap();
        let records = builder.finish();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].fence, Some(fence(1)));
    }

    #[test]
    fn a_second_wait_after_signal_fence_implicitly_starts_a_new_record() {
        // S6: wait -> execute -> signal_fence -> wait must yield two
        // records, the second one not yet having its own fence.
        let records = SubmitInfoBuilder::on(QueueId::Graphics)
            .wait(sem(1), PipelineStageFlags::TOP_OF_PIPE)
            .unwrap()
            .execute(cmd(1))
            .unwrap()
            .signal_fence(fence(1))
            .unwrap()
            .wait(sem(2), PipelineStageFlags::TOP_OF_PIPE)
            .unwrap()
            .finish();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].fence, Some(fence(1)));
        assert!(records[1].fence.is_none());
        assert_eq!(records[1].waits.len(), 1);
    }

    #[test]
    fn a_second_execute_after_signal_implicitly_starts_a_new_record() {
        let records = SubmitInfoBuilder::on(QueueId::Graphics)
            .execute(cmd(1))
            .unwrap()
            .signal(sem(1))
            .unwrap()
            .execute(cmd(2))
            .unwrap()
            .finish();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].command_buffers, vec![cmd(1)]);
        assert_eq!(records[0].signals, vec![sem(1)]);
        assert_eq!(records[1].command_buffers, vec![cmd(2)]);
    }

    #[test]
    fn sync_cuts_even_with_no_fence_attached() {
        let records = SubmitInfoBuilder::on(QueueId::Graphics)
            .execute(cmd(1))
            .unwrap()
            .sync()
            .execute(cmd(2))
            .unwrap()
            .finish();
        assert_eq!(records.len(), 2);
        assert!(records[0].fence.is_none());
        assert_eq!(records[0].command_buffers, vec![cmd(1)]);
        assert_eq!(records[1].command_buffers, vec![cmd(2)]);
    }

    #[test]
    fn deferred_submit_separates_multiple_records_with_a_sync_barrier() {
        let driver = std::sync::Arc::new(crate::driver::fake::FakeDriver::new());
        let mut dqe = crate::dqe::DeferredQueueExecution::new(driver);
        let mut registry = QueueRegistry::new();
        registry.insert(Queue::new(
            QueueId::Graphics,
            QueueFamily(0),
            ash::vk::Queue::from_raw(1),
        ));
        SubmitInfoBuilder::on(QueueId::Graphics)
            .execute(cmd(1))
            .unwrap()
            .sync()
            .execute(cmd(2))
            .unwrap()
            .deferred_submit(&mut dqe);
        assert_eq!(dqe.pending_count(), 2);
        dqe.execute(&registry).unwrap();
        assert_eq!(dqe.pending_count(), 0);
    }
}
