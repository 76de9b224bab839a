//! Deferred queue execution (`spec.md` §4.D).
//!
//! Submissions accumulate through a frame rather than hitting the
//! driver immediately, so independent systems can each append work
//! without coordinating submission order by hand. The accumulated work
//! is a sequence of "runs" separated by `defer_sync` barriers: within a
//! run, a queue's own records stay in append order but different queues
//! are free to interleave; across a barrier, every run before it is
//! fully drained before the next one starts.

use crate::driver::{DriverError, GpuDriver};
use crate::queue::{Queue, QueueId, QueueRegistry};
use crate::submit_info::SubmitRecord;
use std::collections::HashMap;
use std::sync::Arc;

/// One run's worth of per-queue submission records, in append order.
type Run = HashMap<QueueId, Vec<SubmitRecord>>;

/// Accumulates submissions across one or more runs and flushes them to
/// the driver in run order, honoring `spec.md` §8 invariant 7: "between
/// any two successive `defer_sync` calls, a queue's deferred closures
/// execute in enqueue order."
pub struct DeferredQueueExecution {
    driver: Arc<dyn GpuDriver>,
    /// Completed runs, oldest first, followed by the still-open current
    /// run as the last element. There is always at least one run.
    runs: Vec<Run>,
}

impl DeferredQueueExecution {
    /// Create an empty execution queue backed by `driver`, with one
    /// open run.
    #[must_use]
    pub fn new(driver: Arc<dyn GpuDriver>) -> Self {
        Self {
            driver,
            runs: vec![Run::new()],
        }
    }

    /// Queue a submission onto the current run, for `record.queue`.
    pub fn defer_execution(&mut self, record: SubmitRecord) {
        self.current_run_mut()
            .entry(record.queue)
            .or_default()
            .push(record);
    }

    /// Finalize the current run and begin a new, empty one. Every
    /// record deferred before this call fully completes, across every
    /// queue, before any record deferred after it is submitted.
    pub fn defer_sync(&mut self) {
        self.runs.push(Run::new());
    }

    fn current_run_mut(&mut self) -> &mut Run {
        self.runs.last_mut().expect("at least one run always exists")
    }

    /// Number of records queued for the next `execute`, across every
    /// run.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.runs
            .iter()
            .flat_map(Run::values)
            .map(Vec::len)
            .sum()
    }

    /// Submit every queued run to the driver, in run order. Within a
    /// run, each queue's records submit in append order; queues within
    /// the same run are independent of one another. Clears every run
    /// on success, leaving a single fresh open run.
    pub fn execute(&mut self, registry: &QueueRegistry) -> Result<(), DriverError> {
        for run in &self.runs {
            for (queue_id, records) in run {
                let Some(queue) = registry.get(*queue_id) else {
                    continue;
                };
                self.submit_in_order(queue, records)?;
            }
        }

        self.runs = vec![Run::new()];
        Ok(())
    }

    fn submit_in_order(&self, queue: &Queue, records: &[SubmitRecord]) -> Result<(), DriverError> {
        queue.with_exclusive_submission(|| {
            for record in records {
                let wait: Vec<_> = record.waits.iter().map(|(s, _)| *s).collect();
                self.driver.submit(
                    queue.handle(),
                    &record.command_buffers,
                    &wait,
                    &record.signals,
                    record.fence,
                )?;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::FakeDriver;
    use crate::queue::QueueFamily;
    use ash::vk::Handle;

    fn registry_with(ids: &[QueueId]) -> QueueRegistry {
        let mut registry = QueueRegistry::new();
        for (i, &id) in ids.iter().enumerate() {
            registry.insert(Queue::new(
                id,
                QueueFamily(0),
                ash::vk::Queue::from_raw(i as u64 + 1),
            ));
        }
        registry
    }

    fn empty_record(queue: QueueId) -> SubmitRecord {
        SubmitRecord {
            queue,
            sparse: false,
            waits: Vec::new(),
            command_buffers: Vec::new(),
            sparse_binds: Vec::new(),
            signals: Vec::new(),
            fence: None,
        }
    }

    #[test]
    fn execute_drains_every_run() {
        let driver = Arc::new(FakeDriver::new());
        let mut dqe = DeferredQueueExecution::new(driver);
        dqe.defer_execution(empty_record(QueueId::Graphics));
        assert_eq!(dqe.pending_count(), 1);
        dqe.execute(&registry_with(&[QueueId::Graphics])).unwrap();
        assert_eq!(dqe.pending_count(), 0);
    }

    #[test]
    fn steps_for_an_unregistered_queue_are_skipped_harmlessly() {
        let driver = Arc::new(FakeDriver::new());
        let mut dqe = DeferredQueueExecution::new(driver);
        dqe.defer_execution(empty_record(QueueId::Compute));
        let registry = QueueRegistry::new();
        assert!(dqe.execute(&registry).is_ok());
    }

    #[test]
    fn defer_sync_closes_the_current_run_and_opens_a_new_one() {
        let driver = Arc::new(FakeDriver::new());
        let mut dqe = DeferredQueueExecution::new(driver);
        dqe.defer_execution(empty_record(QueueId::Graphics));
        dqe.defer_sync();
        dqe.defer_execution(empty_record(QueueId::Graphics));
        assert_eq!(dqe.runs.len(), 2);
        assert_eq!(dqe.pending_count(), 2);
        dqe.execute(&registry_with(&[QueueId::Graphics])).unwrap();
        assert_eq!(dqe.pending_count(), 0);
        // executing leaves exactly one fresh open run behind.
        assert_eq!(dqe.runs.len(), 1);
    }

    #[test]
    fn records_on_the_same_queue_within_a_run_stay_in_append_order() {
        // S5: enqueue a1, a2 on queue A with no sync between them; both
        // land in the same run's ordered list for that queue, so
        // `submit_in_order` submits a1 before a2.
        let driver = Arc::new(FakeDriver::new());
        let mut dqe = DeferredQueueExecution::new(driver);
        dqe.defer_execution(empty_record(QueueId::Graphics));
        dqe.defer_execution(empty_record(QueueId::Graphics));
        assert_eq!(dqe.runs[0][&QueueId::Graphics].len(), 2);
    }

    #[test]
    fn different_queues_in_the_same_run_are_independent_groups() {
        // S5: a1/a2 on queue A, b1 on queue B, no sync between them —
        // both land in the same (only) run, under separate queue keys.
        let driver = Arc::new(FakeDriver::new());
        let mut dqe = DeferredQueueExecution::new(driver);
        dqe.defer_execution(empty_record(QueueId::Graphics));
        dqe.defer_execution(empty_record(QueueId::Graphics));
        dqe.defer_execution(empty_record(QueueId::Compute));
        assert_eq!(dqe.runs.len(), 1);
        assert_eq!(dqe.runs[0][&QueueId::Graphics].len(), 2);
        assert_eq!(dqe.runs[0][&QueueId::Compute].len(), 1);
        dqe.execute(&registry_with(&[QueueId::Graphics, QueueId::Compute]))
            .unwrap();
    }
}
