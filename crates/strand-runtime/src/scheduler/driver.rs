//! Driver threads
//!
//! Compute drivers pop the ready queue; the single I/O driver pops the wait
//! queue. Both run the same loop: switch into the popped context, and when
//! control comes back, retire the vacated record to the task's arena slot.
//! A completed task's last record moves to the disposal queue until
//! shutdown, or is freed with the stack when completed tasks are reaped.
//! Because wait-queue contexts were captured right before a blocking call,
//! switching into one runs that call with the I/O driver as carrier.

use crate::scheduler::context::{ExecutionContext, LoopContext, Suspension};
use crate::scheduler::queue::TaskQueue;
use crate::scheduler::scheduler::Shared;
use crate::scheduler::stats::Counters;
use crate::scheduler::TaskState;
use crate::SchedulerError;
use crossbeam::channel::Sender;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Which queue a driver serves
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DriverKind {
    /// Runs ready tasks; the index tells compute drivers apart
    Compute(usize),
    /// Runs the blocking phase of I/O calls
    Io,
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverKind::Compute(index) => write!(f, "compute-{}", index),
            DriverKind::Io => f.write_str("io"),
        }
    }
}

/// Handle to a running driver thread
pub(crate) struct Driver {
    kind: DriverKind,
    handle: Option<JoinHandle<()>>,
}

impl Driver {
    /// Start the driver thread. It reports its registration outcome on `ready`.
    pub(crate) fn start(
        kind: DriverKind,
        shared: Arc<Shared>,
        ready: Sender<Result<(), SchedulerError>>,
    ) -> Result<Self, SchedulerError> {
        let name = format!("{}-{}", shared.config.thread_name_prefix, kind);
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || Driver::run_loop(kind, shared, ready))
            .map_err(SchedulerError::Spawn)?;

        Ok(Self {
            kind,
            handle: Some(handle),
        })
    }

    pub(crate) fn kind(&self) -> DriverKind {
        self.kind
    }

    /// Wait for the driver thread to exit. Returns false if it panicked.
    pub(crate) fn join(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => handle.join().is_ok(),
            None => true,
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    fn run_loop(
        kind: DriverKind,
        shared: Arc<Shared>,
        ready: Sender<Result<(), SchedulerError>>,
    ) {
        let context = Arc::new(LoopContext::for_current_thread(kind, &shared.counters));
        let registered = shared.registry.register(Arc::clone(&context));
        let failed = registered.is_err();
        let _ = ready.send(registered);
        drop(ready);
        if failed {
            tracing::error!(driver = %kind, "driver could not register");
            return;
        }

        let queue = shared.queue_for(kind);
        tracing::debug!(driver = %kind, queue = queue.name(), "driver started");

        loop {
            if shared.is_shutdown_requested() && shared.active_tasks() == 0 {
                break;
            }

            match queue.pop_head() {
                Some(next) => Self::dispatch(&shared, &context, next),
                None => thread::sleep(shared.config.idle_backoff),
            }
        }

        tracing::debug!(driver = %kind, "driver stopped");
    }

    /// Switch into `next` and retire it once control returns.
    fn dispatch(shared: &Shared, context: &LoopContext, next: ExecutionContext) {
        let task = next.task();
        tracing::trace!(
            driver = %context.kind(),
            task = %task,
            point = ?next.point(),
            "switching into task"
        );
        Counters::bump(&shared.counters.resumptions);
        next.stack().set_state(match context.kind() {
            DriverKind::Compute(_) => TaskState::Running,
            DriverKind::Io => TaskState::RunningOnIo,
        });

        let handback = next.resume_from(context);
        debug_assert_eq!(handback.task, task, "control returned from another task");
        tracing::trace!(
            driver = %context.kind(),
            task = %task,
            suspension = ?handback.suspension,
            "task switched back"
        );

        shared.arena.retire(next.vacate());
        if let Suspension::Completed(completion) = handback.suspension {
            tracing::debug!(driver = %context.kind(), task = %task, ?completion, "task completed");
            if shared.config.reap_completed {
                shared.arena.reap(task);
            } else if let Some(record) = shared.arena.take_retired(task) {
                shared.disposal.push_tail(record);
            }
        }
    }
}

impl Shared {
    pub(crate) fn queue_for(&self, kind: DriverKind) -> &TaskQueue<ExecutionContext> {
        match kind {
            DriverKind::Compute(_) => &self.ready,
            DriverKind::Io => &self.wait,
        }
    }
}
