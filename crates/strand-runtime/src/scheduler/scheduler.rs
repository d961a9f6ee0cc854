//! Scheduler facade: startup, spawning and shutdown

use crate::config::SchedulerConfig;
use crate::scheduler::arena::TaskArena;
use crate::scheduler::context::{ContextRecord, ExecutionContext};
use crate::scheduler::driver::{Driver, DriverKind};
use crate::scheduler::queue::TaskQueue;
use crate::scheduler::registry::TaskRegistry;
use crate::scheduler::stats::{Counters, SchedulerStats};
use crate::scheduler::task::{self, TaskId, TaskState};
use crate::SchedulerError;
use std::iter;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use strand_io::{FsBackend, IoBackend};

/// State shared by the facade, the drivers and every task
pub(crate) struct Shared {
    pub(crate) config: SchedulerConfig,
    pub(crate) registry: TaskRegistry,
    pub(crate) ready: TaskQueue<ExecutionContext>,
    pub(crate) wait: TaskQueue<ExecutionContext>,
    pub(crate) disposal: TaskQueue<ContextRecord>,
    pub(crate) arena: TaskArena,
    pub(crate) counters: Arc<Counters>,
    pub(crate) backend: Arc<dyn IoBackend>,
    active: AtomicUsize,
    shutdown: AtomicBool,
    next_task_id: AtomicU64,
}

impl Shared {
    fn new(config: SchedulerConfig, backend: Arc<dyn IoBackend>) -> Self {
        Self {
            registry: TaskRegistry::with_capacity(config.registry_capacity),
            ready: TaskQueue::new("ready"),
            wait: TaskQueue::new("wait"),
            disposal: TaskQueue::new("disposal"),
            arena: TaskArena::new(),
            counters: Arc::new(Counters::default()),
            backend,
            active: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            next_task_id: AtomicU64::new(1),
            config,
        }
    }

    pub(crate) fn active_tasks(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub(crate) fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Create a task and queue it ready.
    ///
    /// Once shutdown has been requested only running tasks of this scheduler
    /// may spawn: they keep the active count above zero, so the drivers are
    /// guaranteed to still be alive to run the child.
    pub(crate) fn spawn_task(
        self: &Arc<Self>,
        entry: Box<dyn FnOnce() + Send + 'static>,
    ) -> Result<TaskId, SchedulerError> {
        // Reserve before checking the flag; drivers check the flag before
        // the count, so one side always sees the other.
        self.active.fetch_add(1, Ordering::SeqCst);
        if self.is_shutdown_requested() && !task::runs_inside(self) {
            self.active.fetch_sub(1, Ordering::SeqCst);
            return Err(SchedulerError::ShutDown);
        }

        let id = TaskId::from_u64(self.next_task_id.fetch_add(1, Ordering::Relaxed));
        let builder = thread::Builder::new()
            .name(format!("{}-task-{}", self.config.thread_name_prefix, id))
            .stack_size(self.config.task_stack_size);
        let shared = Arc::clone(self);
        let created = ExecutionContext::create(id, &self.counters, builder, move |stack| {
            task::run_task(shared, stack, entry)
        });

        let (context, carrier) = match created {
            Ok(created) => created,
            Err(err) => {
                self.active.fetch_sub(1, Ordering::SeqCst);
                tracing::warn!(task = %id, error = %err, "failed to allocate task stack");
                return Err(SchedulerError::Spawn(err));
            }
        };

        self.arena.insert(Arc::clone(context.stack()), carrier);
        Counters::bump(&self.counters.tasks_spawned);
        tracing::trace!(task = %id, "task spawned");
        self.ready.push_tail(context);
        Ok(id)
    }

    /// Account for a task reaching Completed.
    pub(crate) fn complete_task(&self, panicked: bool) {
        if panicked {
            Counters::bump(&self.counters.tasks_panicked);
        }
        Counters::bump(&self.counters.tasks_completed);
        let previous = self.active.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "active task count underflow");
    }

    pub(crate) fn stats(&self) -> SchedulerStats {
        let mut stats = SchedulerStats {
            active_tasks: self.active_tasks(),
            ready_depth: self.ready.len(),
            wait_depth: self.wait.len(),
            disposal_depth: self.disposal.len(),
            ..SchedulerStats::default()
        };
        self.counters.fill(&mut stats);
        stats
    }
}

/// Cooperative task scheduler.
///
/// Owns `compute_drivers` compute driver threads plus one I/O driver. Tasks
/// are plain closures; inside them, the functions of [`crate::task`] yield,
/// exit and perform blocking I/O.
pub struct Scheduler {
    shared: Arc<Shared>,
    drivers: Vec<Driver>,
    started: bool,
}

impl Scheduler {
    /// Start a scheduler with `compute_drivers` compute drivers over the real
    /// filesystem.
    pub fn new(compute_drivers: usize) -> Result<Self, SchedulerError> {
        Self::initialize(SchedulerConfig::new(compute_drivers))
    }

    /// Start a scheduler over the real filesystem.
    pub fn initialize(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        Self::with_backend(config, Arc::new(FsBackend::new()))
    }

    /// Start a scheduler whose blocking calls go to `backend`.
    ///
    /// Returns once every driver has registered. If any driver fails to start
    /// or register, the ones already running are stopped and the error is
    /// returned.
    pub fn with_backend(
        config: SchedulerConfig,
        backend: Arc<dyn IoBackend>,
    ) -> Result<Self, SchedulerError> {
        config.validate()?;
        let compute_drivers = config.compute_drivers;
        let shared = Arc::new(Shared::new(config, backend));

        let (ready_tx, ready_rx) = crossbeam::channel::unbounded();
        let kinds = (0..compute_drivers)
            .map(DriverKind::Compute)
            .chain(iter::once(DriverKind::Io));

        let mut drivers = Vec::with_capacity(compute_drivers + 1);
        for kind in kinds {
            match Driver::start(kind, Arc::clone(&shared), ready_tx.clone()) {
                Ok(driver) => drivers.push(driver),
                Err(err) => {
                    Self::abort_startup(&shared, &mut drivers);
                    return Err(err);
                }
            }
        }
        drop(ready_tx);

        for _ in 0..drivers.len() {
            let outcome = match ready_rx.recv() {
                Ok(registered) => registered,
                Err(_) => Err(SchedulerError::DriverPanicked(1)),
            };
            if let Err(err) = outcome {
                Self::abort_startup(&shared, &mut drivers);
                return Err(err);
            }
        }

        tracing::info!(
            compute_drivers,
            registered = shared.registry.len(),
            registry_capacity = shared.registry.capacity(),
            "scheduler initialized"
        );

        Ok(Self {
            shared,
            drivers,
            started: true,
        })
    }

    fn abort_startup(shared: &Shared, drivers: &mut [Driver]) {
        shared.request_shutdown();
        for driver in drivers.iter_mut() {
            if !driver.join() {
                tracing::error!(driver = %driver.kind(), "driver panicked during startup");
            }
        }
        shared.registry.clear();
    }

    /// Create a task running `entry` and queue it ready.
    ///
    /// Returns before the task runs. Returning from `entry` completes the
    /// task just like [`crate::task::exit`].
    pub fn spawn<F>(&self, entry: F) -> Result<TaskId, SchedulerError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.spawn_task(Box::new(entry))
    }

    /// A cloneable handle for spawning from other threads.
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Snapshot of the scheduler counters.
    pub fn stats(&self) -> SchedulerStats {
        self.shared.stats()
    }

    /// Tasks spawned and not yet completed.
    pub fn active_tasks(&self) -> usize {
        self.shared.active_tasks()
    }

    /// Logical state of a task whose stack is still held.
    pub fn task_state(&self, task: TaskId) -> Option<TaskState> {
        self.shared.arena.state(task)
    }

    pub fn compute_driver_count(&self) -> usize {
        self.shared.config.compute_drivers
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    pub fn backend(&self) -> &Arc<dyn IoBackend> {
        &self.shared.backend
    }

    /// Number of driver threads that have not exited.
    pub fn running_drivers(&self) -> usize {
        self.drivers.iter().filter(|driver| driver.is_running()).count()
    }

    /// Wait for every active task to complete, stop the drivers and release
    /// every driver context, disposal record and task stack.
    ///
    /// Blocks the calling thread; must not be called from inside a task.
    /// Returns the final statistics.
    pub fn shutdown(mut self) -> Result<SchedulerStats, SchedulerError> {
        self.shutdown_inner()
    }

    fn shutdown_inner(&mut self) -> Result<SchedulerStats, SchedulerError> {
        if !self.started {
            return Ok(self.shared.stats());
        }
        self.started = false;

        tracing::info!(
            active_tasks = self.shared.active_tasks(),
            stacks_held = self.shared.arena.len(),
            "shutting down"
        );
        self.shared.request_shutdown();

        let panicked = self
            .drivers
            .iter_mut()
            .map(|driver| driver.join())
            .filter(|joined| !joined)
            .count();
        if panicked > 0 {
            tracing::error!(panicked, "driver threads panicked; task stacks not released");
            return Err(SchedulerError::DriverPanicked(panicked));
        }

        debug_assert!(self.shared.ready.is_empty(), "ready queue not empty after shutdown");
        debug_assert!(self.shared.wait.is_empty(), "wait queue not empty after shutdown");

        let driver_contexts = self.shared.registry.clear();
        let records = self.shared.disposal.drain();
        for record in &records {
            tracing::trace!(task = %record.task(), point = ?record.point(), "releasing context record");
        }
        let records = records.len();
        let stacks = self.shared.arena.release_all();
        tracing::debug!(driver_contexts, records, stacks, "released scheduler resources");

        let stats = self.shared.stats();
        tracing::info!(
            tasks_completed = stats.tasks_completed,
            resumptions = stats.resumptions,
            "scheduler shut down"
        );
        Ok(stats)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown_inner() {
            tracing::error!(error = %err, "scheduler shutdown failed");
        }
    }
}

/// Cloneable spawning handle.
///
/// Spawning through a handle fails with [`SchedulerError::ShutDown`] once
/// shutdown has been requested, unless the caller is itself a running task
/// of the same scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    shared: Arc<Shared>,
}

impl SchedulerHandle {
    pub fn spawn<F>(&self, entry: F) -> Result<TaskId, SchedulerError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.spawn_task(Box::new(entry))
    }

    pub fn stats(&self) -> SchedulerStats {
        self.shared.stats()
    }

    pub fn active_tasks(&self) -> usize {
        self.shared.active_tasks()
    }
}
