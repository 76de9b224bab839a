//! The transfer context (`spec.md` §4.F).
//!
//! Buffer uploads are batched rather than submitted one at a time: the
//! context accumulates [`Operation`]s, then [`TransferContext::build`]
//! turns the whole batch into one staging-buffer allocation, one set of
//! memory writes, and a submission sequence that correctly moves queue
//! ownership for any destination that isn't already owned by the
//! transfer queue. Destinations that are torn down before their upload
//! runs can be pulled back out with [`TransferContext::remove_operations_for`].

use crate::command_pool::CommandPoolManager;
use crate::driver::{BufferHandle, DriverError, GpuDriver};
use crate::dqe::DeferredQueueExecution;
use crate::drd::DeferredResourceDestructor;
use crate::memory::{AllocationKind, Allocator, AllocatorError};
use crate::queue::{QueueFamily, QueueId, QueueRegistry};
use crate::submit_info::SubmitInfoBuilder;
use crate::sync::{Fence, Semaphore};
use crate::transfer::completion::{CompletionChain, CompletionSender};
use crate::transfer::operation::Operation;
use ash::vk::PipelineStageFlags;
use std::sync::Arc;
use thiserror::Error;

/// Errors building or running a transfer batch.
#[derive(Error, Debug)]
pub enum TransferError {
    /// The staging buffer's backing memory couldn't be allocated.
    #[error("failed to allocate staging memory: {0}")]
    Allocation(#[from] AllocatorError),
    /// The driver rejected the command buffer or submission.
    #[error("driver rejected the transfer submission: {0}")]
    Driver(#[from] DriverError),
    /// An operation named a source or target queue family with no
    /// queue registered for it, so its ownership-transfer phase has
    /// nowhere to submit.
    #[error("no queue registered for queue family {0:?}")]
    UnknownQueueFamily(QueueFamily),
}

struct InFlightBatch {
    /// Signals once the transfer queue's copy completes. This is what
    /// `async_transfer`'s completion chains wait on — `spec.md` §4.F
    /// "async_transfer ... completed when the GPU copy finishes (not
    /// when the memcpy finishes)" — independent of whether any
    /// downstream destination-queue acquire phase has run yet.
    fence: Arc<Fence>,
    destinations: Vec<BufferHandle>,
    completions: Vec<CompletionSender<()>>,
    /// Kept alive until the fence signals so the wait/signal edges they
    /// back stay valid for the driver to resolve.
    _semaphores: Vec<Arc<Semaphore>>,
}

/// Batches buffer uploads behind one staging allocation and one
/// deferred submission sequence per `build` call.
pub struct TransferContext {
    driver: Arc<dyn GpuDriver>,
    queue_family: u32,
    pending: Vec<Operation>,
    in_flight: Vec<InFlightBatch>,
}

impl TransferContext {
    /// Create a context that submits transfer work on `queue_family`.
    #[must_use]
    pub fn new(driver: Arc<dyn GpuDriver>, queue_family: u32) -> Self {
        Self {
            driver,
            queue_family,
            pending: Vec::new(),
            in_flight: Vec::new(),
        }
    }

    /// Queue `operation` for the next `build`, returning a handle the
    /// caller can poll for completion. Never blocks: the copy itself
    /// runs whenever `build` is next called.
    pub fn async_transfer(&mut self, mut operation: Operation) -> CompletionChain<()> {
        let (sender, chain) = CompletionChain::new();
        operation.completion = Some(sender);
        self.pending.push(operation);
        chain
    }

    /// Queue an operation without requesting a completion notification.
    pub fn append(&mut self, operation: Operation) {
        self.pending.push(operation);
    }

    /// Merge another context's still-pending operations into this one,
    /// preserving order.
    pub fn append_pending_from(&mut self, other: &mut Self) {
        self.pending.append(&mut other.pending);
    }

    /// Cancel and remove every pending or in-flight operation targeting
    /// `destination`. For in-flight batches this waits on the batch's
    /// fence before returning, since the GPU may still be reading the
    /// staging buffer that feeds `destination` — callers must not call
    /// this while another thread could be enqueueing new work onto the
    /// same context concurrently, since the wait happens without
    /// releasing the context to new appends.
    pub fn remove_operations_for(&mut self, destination: BufferHandle) {
        self.pending.retain_mut(|operation| {
            if operation.destination == destination {
                if let Some(completion) = operation.completion.take() {
                    completion.cancel();
                }
                false
            } else {
                true
            }
        });

        for batch in &mut self.in_flight {
            if !batch.destinations.contains(&destination) {
                continue;
            }
            batch.fence.wait(u64::MAX);
        }
    }

    /// Whether any batch submitted by a previous `build` has not yet
    /// signaled its fence.
    #[must_use]
    pub fn has_any_operation_still_in_progress(&self) -> bool {
        self.in_flight.iter().any(|batch| !batch.fence.is_signaled())
    }

    /// Poll in-flight batches, completing and dropping the ones whose
    /// fence has signaled. Call once per frame.
    pub fn update(&mut self) {
        let mut still_in_flight = Vec::with_capacity(self.in_flight.len());
        for mut batch in self.in_flight.drain(..) {
            if batch.fence.is_signaled() {
                for completion in batch.completions.drain(..) {
                    completion.complete(());
                }
            } else {
                still_in_flight.push(batch);
            }
        }
        self.in_flight = still_in_flight;
    }

    /// Turn every pending operation into one staging allocation, one
    /// set of memory writes, and the submission sequence `spec.md`
    /// §4.F's `build` algorithm describes:
    /// 1. **Acquire, non-transfer source queues**: for each distinct
    ///    `source_family` present, release that family's resources with
    ///    a command buffer submitted on its queue, signaling a fresh
    ///    semaphore.
    /// 2. **Work, transfer queue**: one command buffer that waits on
    ///    every semaphore from step 1, executes the batch's copies, and
    ///    signals a semaphore per distinct `target_family` — plus the
    ///    fence this method returns, marking the copy itself done.
    /// 3. **Release, non-transfer destination queues**: for each
    ///    distinct `target_family`, acquire ownership with a command
    ///    buffer that waits on its step-2 semaphore.
    /// 4. The staging allocation is postponed to `drd` behind the
    ///    work-phase fence rather than kept alive inline.
    ///
    /// Each phase is submitted to `dqe` as its own run, so a later
    /// phase's work never starts before an earlier phase's fully
    /// drains; a batch with no ownership transfers (the common case)
    /// costs nothing extra — it's a single run, same as before.
    pub fn build(
        &mut self,
        allocator: &Allocator,
        command_pool: &CommandPoolManager,
        dqe: &mut DeferredQueueExecution,
        drd: &mut DeferredResourceDestructor,
        registry: &QueueRegistry,
    ) -> Result<Option<Arc<Fence>>, TransferError> {
        if self.pending.is_empty() {
            return Ok(None);
        }

        let operations = std::mem::take(&mut self.pending);
        let total_size: u64 = operations.iter().map(|op| op.data.len() as u64).sum();

        let staging = allocator.allocate(total_size.max(1), 1, 0, AllocationKind::MappedMemory)?;
        let staging_memory = staging.memory();
        let own_family = QueueFamily(self.queue_family);

        let mut destinations = Vec::with_capacity(operations.len());
        let mut completions = Vec::new();
        let mut source_families: Vec<QueueFamily> = Vec::new();
        let mut destination_families: Vec<QueueFamily> = Vec::new();
        let mut cursor = staging.offset();
        for mut operation in operations {
            self.driver
                .write_mapped(staging_memory, cursor, &operation.data);
            cursor += operation.data.len() as u64;
            destinations.push(operation.destination);
            if let Some(family) = operation.source_family {
                if family != own_family && !source_families.contains(&family) {
                    source_families.push(family);
                }
            }
            if let Some(family) = operation.target_family {
                if family != own_family && !destination_families.contains(&family) {
                    destination_families.push(family);
                }
            }
            if let Some(completion) = operation.completion.take() {
                completions.push(completion);
            }
        }

        // Resolve every family to a concrete queue before submitting
        // anything, so an unregistered family fails the whole batch
        // instead of leaving a half-submitted one behind.
        let source_queues = source_families
            .iter()
            .map(|&family| {
                registry
                    .id_for_family(family)
                    .map(|queue_id| (family, queue_id))
                    .ok_or(TransferError::UnknownQueueFamily(family))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let destination_queues = destination_families
            .iter()
            .map(|&family| {
                registry
                    .id_for_family(family)
                    .map(|queue_id| (family, queue_id))
                    .ok_or(TransferError::UnknownQueueFamily(family))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut semaphores = Vec::new();

        // Phase 1: release each source queue's resources to the
        // transfer queue.
        let mut acquire_waits = Vec::with_capacity(source_queues.len());
        for (family, queue_id) in source_queues {
            let command_buffer = command_pool.allocate_command_buffer(family.0, queue_id)?;
            let semaphore = Arc::new(Semaphore::new(self.driver.clone())?);
            let record = SubmitInfoBuilder::on(queue_id)
                .execute(command_buffer)
                .expect("freshly built record is always in the wait phase")
                .signal(semaphore.handle())
                .expect("execute always leaves the builder able to signal")
                .finish();
            for submission in record {
                dqe.defer_execution(submission);
            }
            acquire_waits.push(semaphore.handle());
            semaphores.push(semaphore);
        }
        if !source_families.is_empty() {
            dqe.defer_sync();
        }

        // Phase 2: transfer-queue work — wait on every release, copy,
        // then release ownership to each destination queue that needs
        // it, and attach the fence that marks the copy complete.
        let work_command_buffer =
            command_pool.allocate_command_buffer(self.queue_family, QueueId::Transfer)?;
        let fence = Arc::new(Fence::new(self.driver.clone(), false)?);

        let mut builder = SubmitInfoBuilder::on(QueueId::Transfer);
        for wait_semaphore in acquire_waits {
            builder = builder
                .wait(wait_semaphore, PipelineStageFlags::ALL_COMMANDS)
                .expect("waits are always accepted before execute");
        }
        builder = builder
            .execute(work_command_buffer)
            .expect("execute always follows the wait phase");

        let mut release_waits = Vec::with_capacity(destination_queues.len());
        for &(family, _) in &destination_queues {
            let semaphore = Arc::new(Semaphore::new(self.driver.clone())?);
            builder = builder
                .signal(semaphore.handle())
                .expect("execute always leaves the builder able to signal");
            release_waits.push((family, semaphore.handle()));
            semaphores.push(semaphore);
        }
        let work_record = builder
            .signal_fence(fence.handle())
            .expect("execute always leaves the builder able to attach a fence")
            .finish();
        for submission in work_record {
            dqe.defer_execution(submission);
        }

        // Phase 3: each destination queue acquires ownership from the
        // transfer queue.
        if !destination_queues.is_empty() {
            dqe.defer_sync();
            for ((family, queue_id), (_, wait_semaphore)) in
                destination_queues.into_iter().zip(release_waits)
            {
                let command_buffer = command_pool.allocate_command_buffer(family.0, queue_id)?;
                let record = SubmitInfoBuilder::on(queue_id)
                    .wait(wait_semaphore, PipelineStageFlags::ALL_COMMANDS)
                    .expect("freshly built record is always in the wait phase")
                    .execute(command_buffer)
                    .expect("execute always follows the wait phase")
                    .finish();
                for submission in record {
                    dqe.defer_execution(submission);
                }
            }
        }

        drd.postpone(own_family, fence.clone(), move || drop(staging));

        self.in_flight.push(InFlightBatch {
            fence: fence.clone(),
            destinations,
            completions,
            _semaphores: semaphores,
        });

        Ok(Some(fence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::next_buffer_handle;
    use crate::driver::fake::FakeDriver;
    use crate::queue::{Queue, QueueFamily, QueueRegistry};
    use ash::vk::Handle;
    use std::sync::atomic::AtomicU64;

    fn registry_with_transfer() -> QueueRegistry {
        let mut registry = QueueRegistry::new();
        registry.insert(Queue::new(
            QueueId::Transfer,
            QueueFamily(0),
            ash::vk::Queue::from_raw(1),
        ));
        registry
    }

    #[test]
    fn build_with_no_pending_operations_is_a_noop() {
        let driver = Arc::new(FakeDriver::new());
        let allocator = Allocator::new(driver.clone());
        let command_pool = CommandPoolManager::new(driver.clone());
        let mut dqe = DeferredQueueExecution::new(driver.clone());
        let mut drd = DeferredResourceDestructor::new();
        let mut context = TransferContext::new(driver, 0);
        assert!(context
            .build(&allocator, &command_pool, &mut dqe, &mut drd, &registry_with_transfer())
            .unwrap()
            .is_none());
    }

    #[test]
    fn build_writes_payload_into_staging_memory() {
        let fake = Arc::new(FakeDriver::new());
        let driver: Arc<dyn GpuDriver> = fake.clone();
        let allocator = Allocator::new(driver.clone());
        let command_pool = CommandPoolManager::new(driver.clone());
        let mut dqe = DeferredQueueExecution::new(driver.clone());
        let mut drd = DeferredResourceDestructor::new();
        let mut context = TransferContext::new(driver, 0);

        let counter = AtomicU64::new(0);
        let destination = next_buffer_handle(&counter);
        let chain = context.async_transfer(Operation::new(destination, 0, vec![9, 8, 7]));

        let fence = context
            .build(&allocator, &command_pool, &mut dqe, &mut drd, &registry_with_transfer())
            .unwrap()
            .expect("batch was non-empty");
        assert!(!chain.is_ready());

        fake.signal(fence.handle());
        context.update();
        assert_eq!(chain.try_take(), Some(Ok(())));
    }

    #[test]
    fn remove_operations_for_cancels_pending_work() {
        let driver = Arc::new(FakeDriver::new());
        let mut context = TransferContext::new(driver, 0);
        let counter = AtomicU64::new(0);
        let destination = next_buffer_handle(&counter);
        let chain = context.async_transfer(Operation::new(destination, 0, vec![1]));

        context.remove_operations_for(destination);
        assert_eq!(chain.try_take(), Some(Err(crate::transfer::completion::Cancelled)));
    }

    #[test]
    fn deferred_submission_reaches_the_queue() {
        let driver = Arc::new(FakeDriver::new());
        let allocator = Allocator::new(driver.clone());
        let command_pool = CommandPoolManager::new(driver.clone());
        let mut dqe = DeferredQueueExecution::new(driver.clone());
        let mut drd = DeferredResourceDestructor::new();
        let mut context = TransferContext::new(driver, 0);
        let counter = AtomicU64::new(0);
        context.append(Operation::new(next_buffer_handle(&counter), 0, vec![1, 2]));

        let registry = registry_with_transfer();
        context.build(&allocator, &command_pool, &mut dqe, &mut drd, &registry).unwrap();
        assert_eq!(dqe.pending_count(), 1);
        dqe.execute(&registry).unwrap();
        assert_eq!(dqe.pending_count(), 0);
    }

    #[test]
    fn a_destination_ownership_transfer_runs_in_three_phases() {
        // S3: an operation with a target_family distinct from the
        // transfer queue's own must submit a release-on-source,
        // copy-on-transfer, acquire-on-destination sequence across two
        // DQE runs (the acquire phase only needs one run of its own
        // since there's no source_family in play here).
        let fake = Arc::new(FakeDriver::new());
        let driver: Arc<dyn GpuDriver> = fake.clone();
        let allocator = Allocator::new(driver.clone());
        let command_pool = CommandPoolManager::new(driver.clone());
        let mut dqe = DeferredQueueExecution::new(driver.clone());
        let mut drd = DeferredResourceDestructor::new();
        let mut context = TransferContext::new(driver, 0);

        let mut registry = QueueRegistry::new();
        registry.insert(Queue::new(QueueId::Transfer, QueueFamily(0), ash::vk::Queue::from_raw(1)));
        registry.insert(Queue::new(QueueId::Graphics, QueueFamily(1), ash::vk::Queue::from_raw(2)));

        let counter = AtomicU64::new(0);
        let destination = next_buffer_handle(&counter);
        context.append(
            Operation::new(destination, 0, vec![1, 2, 3]).with_target_family(QueueFamily(1)),
        );

        let fence = context
            .build(&allocator, &command_pool, &mut dqe, &mut drd, &registry)
            .unwrap()
            .unwrap();

        // Work phase (run 0) plus the destination acquire phase (run 1).
        assert_eq!(dqe.pending_count(), 2);
        dqe.execute(&registry).unwrap();
        assert_eq!(dqe.pending_count(), 0);

        fake.signal(fence.handle());
        assert_eq!(drd.pending_count(), 1);
        drd.update();
        assert_eq!(drd.pending_count(), 0);
    }

    #[test]
    fn an_unregistered_target_family_is_reported_rather_than_dropped() {
        let driver = Arc::new(FakeDriver::new());
        let allocator = Allocator::new(driver.clone());
        let command_pool = CommandPoolManager::new(driver.clone());
        let mut dqe = DeferredQueueExecution::new(driver.clone());
        let mut drd = DeferredResourceDestructor::new();
        let mut context = TransferContext::new(driver, 0);
        let counter = AtomicU64::new(0);
        context.append(
            Operation::new(next_buffer_handle(&counter), 0, vec![1])
                .with_target_family(QueueFamily(7)),
        );

        let err = context
            .build(&allocator, &command_pool, &mut dqe, &mut drd, &registry_with_transfer())
            .unwrap_err();
        assert!(matches!(err, TransferError::UnknownQueueFamily(QueueFamily(7))));
    }
}
