//! The core context and engine lifecycle (`spec.md` §4.H, §9).

use crate::command_pool::{CommandPoolManager, FlipId};
use crate::dqe::DeferredQueueExecution;
use crate::drd::DeferredResourceDestructor;
use crate::foundation::time::Timer;
use crate::memory::Allocator;
use crate::module::{EngineHandle, ModuleRegistry, RegistryError};
use crate::queue::QueueRegistry;
use crate::runtime_mode::RuntimeMode;
use crate::task::TaskManager;
use crate::transfer::TransferContext;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use thiserror::Error;

/// Parameters that shape boot, externalizable so a host application can
/// load them from a config file via [`crate::config::Config`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootConfig {
    /// Worker-thread count for the default task pool. `0` means "use
    /// hardware concurrency".
    pub worker_threads: usize,
    /// The runtime-mode bitmask to boot under.
    pub runtime_mode: RuntimeMode,
    /// Queue family index used for the transfer context.
    pub transfer_queue_family: u32,
    /// Milliseconds a fence wait may block before the stall controller
    /// considers the wait hung and logs a warning.
    pub stall_warning_threshold_ms: u64,
}

impl crate::config::Config for BootConfig {}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            runtime_mode: RuntimeMode::default(),
            transfer_queue_family: 0,
            stall_warning_threshold_ms: 1000,
        }
    }
}

/// Errors that can abort boot. `spec.md` §4.H: a failed boot reverts
/// the context to [`LifecycleState::NeverStarted`] rather than leaving
/// it half-initialized.
#[derive(Error, Debug)]
pub enum BootError {
    /// A module failed registration, most likely a duplicate name.
    #[error("module registration failed: {0}")]
    ModuleRegistration(#[from] RegistryError),
    /// The resource index failed to load. The core itself doesn't load
    /// the index; it only models the boot-status contract a loader
    /// reports back through.
    #[error("resource index failed to load: {0}")]
    ResourceIndex(String),
}

/// The engine's lifecycle states. Replaces the five independent
/// booleans (`halted`, `should_stop`, `can_return`, `booted`,
/// `never_started`) with one state machine, so illegal combinations are
/// unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Boot has not yet been attempted.
    NeverStarted,
    /// Boot is in progress.
    Booting,
    /// Fully booted and running.
    Running,
    /// A stall has been requested; worker threads are winding down to
    /// the stall point.
    Stalling,
    /// Shutdown has begun.
    ShuttingDown,
    /// Fully torn down.
    Stopped,
}

struct LifecycleMachine {
    state: Mutex<LifecycleState>,
}

impl LifecycleMachine {
    fn new() -> Self {
        Self {
            state: Mutex::new(LifecycleState::NeverStarted),
        }
    }

    fn current(&self) -> LifecycleState {
        *self.state.lock().unwrap()
    }

    fn begin_boot(&self) {
        let mut state = self.state.lock().unwrap();
        debug_assert_eq!(*state, LifecycleState::NeverStarted);
        *state = LifecycleState::Booting;
    }

    fn finish_boot(&self) {
        let mut state = self.state.lock().unwrap();
        debug_assert_eq!(*state, LifecycleState::Booting);
        *state = LifecycleState::Running;
    }

    fn abort_boot(&self) {
        let mut state = self.state.lock().unwrap();
        *state = LifecycleState::NeverStarted;
    }

    fn begin_shutdown(&self) {
        let mut state = self.state.lock().unwrap();
        *state = LifecycleState::ShuttingDown;
    }

    fn finish_shutdown(&self) {
        let mut state = self.state.lock().unwrap();
        *state = LifecycleState::Stopped;
    }

    fn begin_stall(&self) {
        let mut state = self.state.lock().unwrap();
        if *state == LifecycleState::Running {
            *state = LifecycleState::Stalling;
        }
    }

    fn end_stall(&self) {
        let mut state = self.state.lock().unwrap();
        if *state == LifecycleState::Stalling {
            *state = LifecycleState::Running;
        }
    }
}

/// Everything the core subsystems need, owned in one place and shared
/// with modules through a [`Weak`] handle. `spec.md` §4.H.
pub struct CoreContext {
    lifecycle: LifecycleMachine,
    stall_requested: AtomicBool,
    config: BootConfig,
    pub driver: Arc<dyn crate::driver::GpuDriver>,
    pub tasks: Arc<dyn TaskManager>,
    pub allocator: Allocator,
    pub command_pools: CommandPoolManager,
    pub queues: QueueRegistry,
    pub dqe: Mutex<DeferredQueueExecution>,
    pub drd: Mutex<DeferredResourceDestructor>,
    pub transfer: Mutex<TransferContext>,
    pub modules: Mutex<ModuleRegistry>,
    frame_timer: Mutex<Timer>,
}

impl CoreContext {
    /// Run the boot sequence: construct every subsystem, register
    /// modules, then walk them through the pre-boot, context-init,
    /// resource-index, and boot-complete callbacks in order. Returns an
    /// `Arc` so [`EngineHandle`]s can be handed to modules.
    pub fn boot(
        config: BootConfig,
        driver: Arc<dyn crate::driver::GpuDriver>,
        tasks: Arc<dyn TaskManager>,
        queues: QueueRegistry,
        mut modules: ModuleRegistry,
        load_resource_index: impl FnOnce() -> Result<(), String>,
    ) -> Result<Arc<Self>, BootError> {
        let lifecycle = LifecycleMachine::new();
        lifecycle.begin_boot();

        modules.for_each_mut(|module| module.on_pre_boot_step());

        let context = Arc::new(Self {
            lifecycle,
            stall_requested: AtomicBool::new(false),
            transfer: Mutex::new(TransferContext::new(
                driver.clone(),
                config.transfer_queue_family,
            )),
            dqe: Mutex::new(DeferredQueueExecution::new(driver.clone())),
            drd: Mutex::new(DeferredResourceDestructor::new()),
            command_pools: CommandPoolManager::new(driver.clone()),
            allocator: Allocator::new(driver.clone()),
            driver,
            tasks,
            queues,
            modules: Mutex::new(modules),
            config,
            frame_timer: Mutex::new(Timer::new()),
        });

        let handle: EngineHandle = Arc::downgrade(&context);
        context
            .modules
            .lock()
            .unwrap()
            .for_each_mut(|module| module.on_context_initialized(&handle));

        if let Err(message) = load_resource_index() {
            context.lifecycle.abort_boot();
            return Err(BootError::ResourceIndex(message));
        }

        context
            .modules
            .lock()
            .unwrap()
            .for_each_mut(|module| module.on_resource_index_loaded());
        context
            .modules
            .lock()
            .unwrap()
            .for_each_mut(|module| module.on_engine_boot_complete());

        context.lifecycle.finish_boot();
        log::info!("engine boot complete");
        Ok(context)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn lifecycle_state(&self) -> LifecycleState {
        self.lifecycle.current()
    }

    /// The boot-time configuration this context was constructed with.
    #[must_use]
    pub const fn config(&self) -> &BootConfig {
        &self.config
    }

    /// Request that every worker thread wind down to a safe point and
    /// stop, other than the calling thread. `spec.md` §4.H "stall
    /// control": used before operations (like a swapchain resize) that
    /// need exclusive access to GPU resources. The reference
    /// [`crate::task::pool::WorkerPool`] has no notion of "current
    /// thread" to exempt, so this sets a cooperative flag instead of
    /// literally pausing threads; callers poll [`Self::is_stalled`] or
    /// have their own work loops check [`Self::stall_requested`].
    pub fn stall_all_threads_except(&self) {
        self.stall_requested.store(true, Ordering::Release);
        self.lifecycle.begin_stall();
    }

    /// Whether a stall is currently in effect.
    #[must_use]
    pub fn is_stalled(&self) -> bool {
        self.lifecycle.current() == LifecycleState::Stalling
    }

    /// Whether cooperative worker loops should yield back rather than
    /// pick up new work, per a previous [`Self::stall_all_threads_except`].
    #[must_use]
    pub fn stall_requested(&self) -> bool {
        self.stall_requested.load(Ordering::Acquire)
    }

    /// End a previously requested stall.
    pub fn resume_from_stall(&self) {
        self.stall_requested.store(false, Ordering::Release);
        self.lifecycle.end_stall();
    }

    /// Advance to the next frame: updates the frame timer and flips the
    /// command-pool manager so the flip just finished can start being
    /// recycled. `spec.md` §4.B/§4.H: the flip counter that scopes
    /// command pools is driven by the engine's own frame cadence.
    pub fn begin_frame(&self) -> FlipId {
        self.frame_timer.lock().unwrap().update();
        self.command_pools.flip()
    }

    /// Seconds elapsed since the previous [`Self::begin_frame`] call.
    #[must_use]
    pub fn delta_time(&self) -> f32 {
        self.frame_timer.lock().unwrap().delta_time()
    }

    /// Run the teardown sequence: notify modules shutdown has started,
    /// drain outstanding transfer/DQE/DRD work, then run each module's
    /// final shutdown callback. `spec.md` §4.H: teardown precedes
    /// destruction and must not be skipped even on a boot-failure path.
    pub fn teardown(self: &Arc<Self>) {
        self.lifecycle.begin_shutdown();
        self.modules
            .lock()
            .unwrap()
            .for_each_mut(|module| module.on_start_shutdown());

        self.tasks.request_stop();

        while self.transfer.lock().unwrap().has_any_operation_still_in_progress() {
            self.transfer.lock().unwrap().update();
        }
        self.dqe.lock().unwrap().execute(&self.queues).ok();
        self.drd.lock().unwrap().update();

        self.modules
            .lock()
            .unwrap()
            .for_each_mut(|module| module.on_shutdown());

        self.lifecycle.finish_shutdown();
        log::info!("engine teardown complete");
    }

    /// A weak, non-owning handle suitable for handing to a module.
    #[must_use]
    pub fn handle(self: &Arc<Self>) -> EngineHandle {
        Arc::downgrade(self)
    }
}

/// Resolve a weak [`EngineHandle`] back to a live context, if the
/// engine hasn't been torn down yet.
#[must_use]
pub fn upgrade(handle: &EngineHandle) -> Option<Arc<CoreContext>> {
    Weak::upgrade(handle)
}
