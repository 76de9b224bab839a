//! A work-stealing [`TaskManager`] implementation.
//!
//! One `crossbeam_deque::Worker` queue per thread feeds a global
//! injector; idle threads steal from the injector first, then from each
//! other's queues round-robin, the standard work-stealing shape.
//! Long-duration tasks bypass the pool entirely and run on their own
//! detached thread so they can't starve the queue behind them.

use super::TaskManager;
use crossbeam_deque::{Injector, Steal, Stealer, Worker};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

type Task = Box<dyn FnOnce() + Send + 'static>;

struct Shared {
    injector: Injector<Task>,
    stealers: Vec<Stealer<Task>>,
    stopping: AtomicBool,
    pending: AtomicUsize,
    idle: Condvar,
    idle_lock: Mutex<()>,
}

impl Shared {
    fn find_task(&self, local: &Worker<Task>) -> Option<Task> {
        local.pop().or_else(|| {
            std::iter::repeat_with(|| {
                self.injector
                    .steal_batch_and_pop(local)
                    .or_else(|| self.stealers.iter().map(Stealer::steal).collect())
            })
            .find(|s| !s.is_retry())
            .and_then(Steal::success)
        })
    }

    fn wake_one(&self) {
        let _guard = self.idle_lock.lock().unwrap();
        self.idle.notify_one();
    }
}

/// A work-stealing thread pool backing [`TaskManager`]. Owns its boot
/// timestamp rather than relying on a process-global clock, so two
/// pools in the same process (e.g. in tests) never interfere.
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
    started_at: Instant,
}

impl WorkerPool {
    /// Spawn a pool sized to the number of logical cores, leaving the
    /// calling thread free. `spec.md` §4.G: worker count defaults to
    /// hardware concurrency unless the host overrides it.
    #[must_use]
    pub fn new() -> Self {
        Self::with_worker_count(num_cpus::get().max(1))
    }

    /// Spawn a pool with an explicit worker count.
    #[must_use]
    pub fn with_worker_count(worker_count: usize) -> Self {
        let local_queues: Vec<Worker<Task>> = (0..worker_count).map(|_| Worker::new_fifo()).collect();
        let stealers = local_queues.iter().map(Worker::stealer).collect();

        let shared = Arc::new(Shared {
            injector: Injector::new(),
            stealers,
            stopping: AtomicBool::new(false),
            pending: AtomicUsize::new(0),
            idle: Condvar::new(),
            idle_lock: Mutex::new(()),
        });

        let workers = local_queues
            .into_iter()
            .enumerate()
            .map(|(index, local)| {
                let shared = shared.clone();
                std::thread::Builder::new()
                    .name(format!("engine-core-worker-{index}"))
                    .spawn(move || worker_loop(&shared, &local))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        log::debug!("worker pool started with {worker_count} threads");

        Self {
            shared,
            workers,
            started_at: Instant::now(),
        }
    }

    /// Time elapsed since the pool was created.
    #[must_use]
    pub fn uptime(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    /// Number of worker threads.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

fn worker_loop(shared: &Arc<Shared>, local: &Worker<Task>) {
    loop {
        if let Some(task) = shared.find_task(local) {
            task();
            shared.pending.fetch_sub(1, Ordering::AcqRel);
            continue;
        }
        if shared.stopping.load(Ordering::Acquire) {
            return;
        }
        let guard = shared.idle_lock.lock().unwrap();
        let _ = shared
            .idle
            .wait_timeout(guard, std::time::Duration::from_millis(5));
    }
}

impl TaskManager for WorkerPool {
    fn get_task(&self, task: Task) {
        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        self.shared.injector.push(task);
        self.shared.wake_one();
    }

    fn get_long_duration_task(&self, task: Task) {
        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        let shared = self.shared.clone();
        std::thread::spawn(move || {
            task();
            shared.pending.fetch_sub(1, Ordering::AcqRel);
        });
    }

    fn has_pending_tasks(&self) -> bool {
        self.shared.pending.load(Ordering::Acquire) > 0
    }

    fn run_a_task(&self) -> bool {
        match self.shared.injector.steal() {
            Steal::Success(task) => {
                task();
                self.shared.pending.fetch_sub(1, Ordering::AcqRel);
                true
            }
            _ => false,
        }
    }

    fn request_stop(&self) {
        self.shared.stopping.store(true, Ordering::Release);
        let _guard = self.shared.idle_lock.lock().unwrap();
        self.shared.idle.notify_all();
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.request_stop();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[test]
    fn scheduled_tasks_eventually_run() {
        let pool = WorkerPool::with_worker_count(2);
        let counter = Arc::new(AtomicU32::new(0));
        for _ in 0..16 {
            let counter = counter.clone();
            pool.get_task(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        let deadline = Instant::now() + Duration::from_secs(2);
        while counter.load(Ordering::SeqCst) < 16 && Instant::now() < deadline {
            std::thread::yield_now();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 16);
    }

    #[test]
    fn actively_wait_for_drains_the_condition() {
        let pool = WorkerPool::with_worker_count(1);
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();
        pool.get_task(Box::new(move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        }));
        pool.actively_wait_for(&mut || counter.load(Ordering::SeqCst) == 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn long_duration_tasks_run_off_the_pool() {
        let pool = WorkerPool::with_worker_count(1);
        assert!(!pool.has_pending_tasks());
        let (tx, rx) = std::sync::mpsc::channel();
        pool.get_long_duration_task(Box::new(move || {
            tx.send(()).unwrap();
        }));
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
    }
}
