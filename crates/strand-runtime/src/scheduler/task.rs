//! Task-side operations
//!
//! These functions are only meaningful on a task's own stack. Each one looks
//! up the running task through a thread-local set when the task first starts,
//! and fails with [`SchedulerError::NotInTask`] anywhere else.

use crate::scheduler::context::{
    Completion, ExecutionContext, IoOp, LoopContext, Resume, ResumePoint, Suspension, TaskStack,
};
use crate::scheduler::driver::DriverKind;
use crate::scheduler::queue::TaskQueue;
use crate::scheduler::scheduler::Shared;
use crate::scheduler::stats::Counters;
use crate::SchedulerError;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::convert::Infallible;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;
use std::thread::ThreadId;
use strand_io::{Fd, IoBackend};

/// Unique identifier for a task, scoped to one scheduler
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    /// Create a TaskId from a u64 value
    pub fn from_u64(id: u64) -> Self {
        TaskId(id)
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Logical state of a task
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    /// Queued on the ready queue
    Ready = 0,
    /// Running on a compute driver
    Running = 1,
    /// Queued on the wait queue before a blocking call
    WaitingIo = 2,
    /// Running its blocking call with the I/O driver as carrier
    RunningOnIo = 3,
    /// Finished; its stack is held until shutdown
    Completed = 4,
}

impl TaskState {
    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => TaskState::Ready,
            1 => TaskState::Running,
            2 => TaskState::WaitingIo,
            3 => TaskState::RunningOnIo,
            _ => TaskState::Completed,
        }
    }
}

/// Unwind payload that tears down an exited task's stack on release.
struct ExitSignal;

/// The running task, as seen from its own stack
struct CurrentTask {
    shared: Arc<Shared>,
    stack: Arc<TaskStack>,
    carrier: Cell<ThreadId>,
    finished: Cell<bool>,
}

thread_local! {
    static CURRENT: RefCell<Option<Rc<CurrentTask>>> = const { RefCell::new(None) };
}

fn current() -> Result<Rc<CurrentTask>, SchedulerError> {
    CURRENT
        .with(|current| current.borrow().clone())
        .ok_or(SchedulerError::NotInTask)
}

/// Whether the caller is a running task of the scheduler owning `shared`
pub(crate) fn runs_inside(shared: &Arc<Shared>) -> bool {
    CURRENT.with(|current| {
        current
            .borrow()
            .as_ref()
            .map(|task| Arc::ptr_eq(&task.shared, shared))
            .unwrap_or(false)
    })
}

impl CurrentTask {
    /// Loop context of the driver currently carrying this task
    fn carrier_context(&self) -> Result<Arc<LoopContext>, SchedulerError> {
        self.shared
            .registry
            .lookup(self.carrier.get())
            .ok_or(SchedulerError::UnknownDriver)
    }

    /// Queue a continuation at `point` on `queue` and switch back to the
    /// carrier. Returns once some driver resumes the continuation.
    fn suspend(
        &self,
        point: ResumePoint,
        queue: &TaskQueue<ExecutionContext>,
        state: TaskState,
        suspension: Suspension,
    ) -> Result<(), SchedulerError> {
        let driver = self.carrier_context()?;
        let continuation = self.stack.capture(point);
        self.stack.set_state(state);
        queue.push_tail(continuation);

        match self.stack.switch_to(&driver, suspension) {
            Resume::Carry(carrier) => {
                self.carrier.set(carrier);
                Ok(())
            }
            Resume::Terminate => Err(SchedulerError::ShutDown),
        }
    }

    fn carried_by(&self, kind: DriverKind) -> bool {
        self.carrier_context()
            .map(|driver| driver.kind() == kind)
            .unwrap_or(false)
    }

    /// Mark the task completed and hand control back for good. Only the
    /// first call has any effect.
    fn finish(&self, completion: Completion) {
        if self.finished.replace(true) {
            return;
        }
        let driver = self.carrier_context();
        self.stack.set_state(TaskState::Completed);
        self.shared.complete_task(completion == Completion::Panicked);

        match driver {
            Ok(driver) => self.stack.leave(&driver, completion),
            Err(_) => tracing::error!(
                task = %self.stack.task(),
                "completed task has no registered carrier"
            ),
        }
    }
}

/// Body of every task's carrier thread.
pub(crate) fn run_task(
    shared: Arc<Shared>,
    stack: Arc<TaskStack>,
    entry: Box<dyn FnOnce() + Send + 'static>,
) {
    let carrier = match stack.await_first_resume() {
        Resume::Carry(carrier) => carrier,
        Resume::Terminate => return,
    };
    let task = stack.task();
    let current = Rc::new(CurrentTask {
        shared,
        stack,
        carrier: Cell::new(carrier),
        finished: Cell::new(false),
    });
    CURRENT.with(|slot| *slot.borrow_mut() = Some(Rc::clone(&current)));

    let outcome = panic::catch_unwind(AssertUnwindSafe(entry));
    CURRENT.with(|slot| slot.borrow_mut().take());

    // An exited task was finished before its stack was unwound.
    if current.finished.get() {
        return;
    }
    let completion = match outcome {
        Ok(()) => Completion::Returned,
        Err(payload) => {
            tracing::error!(task = %task, message = panic_message(&*payload), "task panicked");
            Completion::Panicked
        }
    };
    current.finish(completion);
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Whether the caller is running inside a task
pub fn in_task() -> bool {
    CURRENT.with(|current| current.borrow().is_some())
}

/// Id of the running task, if any
pub fn current_id() -> Option<TaskId> {
    CURRENT.with(|current| current.borrow().as_ref().map(|task| task.stack.task()))
}

/// Spawn a sibling task on the running task's scheduler.
///
/// Allowed during shutdown, since the caller keeps the scheduler alive.
pub fn spawn<F>(entry: F) -> Result<TaskId, SchedulerError>
where
    F: FnOnce() + Send + 'static,
{
    let current = current()?;
    current.shared.spawn_task(Box::new(entry))
}

/// Give up the carrier: requeue this task at the tail of the ready queue and
/// return once a compute driver resumes it.
pub fn yield_now() -> Result<(), SchedulerError> {
    let current = current()?;
    current.suspend(
        ResumePoint::Yield,
        &current.shared.ready,
        TaskState::Ready,
        Suspension::Yielded,
    )
}

/// Complete the running task. Never returns inside a task.
///
/// Control goes back to the driver for good and the task's stack stays
/// parked as it is, locks held included, until the scheduler releases it at
/// shutdown (or at once with [`SchedulerConfig::reap_completed`]). Only then
/// is the stack unwound and the locals dropped. Only returns, with
/// [`SchedulerError::NotInTask`], when called outside a task.
///
/// [`SchedulerConfig::reap_completed`]: crate::SchedulerConfig::reap_completed
pub fn exit() -> Result<Infallible, SchedulerError> {
    let current = current()?;
    current.finish(Completion::Exited);
    current.stack.await_release();

    CURRENT.with(|slot| slot.borrow_mut().take());
    drop(current);
    panic::resume_unwind(Box::new(ExitSignal))
}

/// Run `call` with the I/O driver as carrier.
///
/// Phase one parks the task on the wait queue, freeing its compute driver.
/// The I/O driver resumes it and the call runs. Phase two requeues it ready
/// and hands the I/O driver back, so the result is returned once a compute
/// driver picks the task up again.
fn offload<T>(
    op: IoOp,
    call: impl FnOnce(&dyn IoBackend) -> io::Result<T>,
) -> Result<T, SchedulerError> {
    let current = current()?;
    let shared = Arc::clone(&current.shared);

    current.suspend(
        ResumePoint::BeforeIo(op),
        &shared.wait,
        TaskState::WaitingIo,
        Suspension::Blocked(op),
    )?;
    debug_assert!(current.carried_by(DriverKind::Io), "blocking call off the I/O driver");

    let result = call(shared.backend.as_ref());
    Counters::bump(&shared.counters.io_operations);
    tracing::trace!(
        task = %current.stack.task(),
        %op,
        ok = result.is_ok(),
        "blocking call finished"
    );

    current.suspend(
        ResumePoint::AfterIo(op),
        &shared.ready,
        TaskState::Ready,
        Suspension::Unblocked(op),
    )?;
    Ok(result?)
}

/// Open an existing file for reading and writing.
pub fn blocking_open(path: impl AsRef<Path>) -> Result<Fd, SchedulerError> {
    let path = path.as_ref();
    offload(IoOp::Open, |backend| backend.open(path))
}

/// Read into `buf`, returning the number of bytes read.
pub fn blocking_read(fd: Fd, buf: &mut [u8]) -> Result<usize, SchedulerError> {
    offload(IoOp::Read, |backend| backend.read(fd, buf))
}

/// Write `bytes`, returning the number of bytes written.
pub fn blocking_write(fd: Fd, bytes: &[u8]) -> Result<usize, SchedulerError> {
    offload(IoOp::Write, |backend| backend.write(fd, bytes))
}

/// Close a descriptor.
pub fn blocking_close(fd: Fd) -> Result<(), SchedulerError> {
    offload(IoOp::Close, |backend| backend.close(fd))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_only_ops_fail_outside_task() {
        assert!(!in_task());
        assert_eq!(current_id(), None);
        assert!(matches!(yield_now(), Err(SchedulerError::NotInTask)));
        assert!(matches!(exit(), Err(SchedulerError::NotInTask)));
        assert!(matches!(spawn(|| {}), Err(SchedulerError::NotInTask)));
        assert!(matches!(
            blocking_open("anything"),
            Err(SchedulerError::NotInTask)
        ));
        let mut buf = [0u8; 4];
        assert!(matches!(
            blocking_read(Fd::from_raw(3), &mut buf),
            Err(SchedulerError::NotInTask)
        ));
        assert!(matches!(
            blocking_write(Fd::from_raw(3), b"x"),
            Err(SchedulerError::NotInTask)
        ));
        assert!(matches!(
            blocking_close(Fd::from_raw(3)),
            Err(SchedulerError::NotInTask)
        ));
    }

    #[test]
    fn test_state_roundtrip() {
        for state in [
            TaskState::Ready,
            TaskState::Running,
            TaskState::WaitingIo,
            TaskState::RunningOnIo,
            TaskState::Completed,
        ] {
            assert_eq!(TaskState::from_u8(state as u8), state);
        }
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*payload), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(&*payload), "bang");
        let payload: Box<dyn Any + Send> = Box::new(3u8);
        assert_eq!(panic_message(&*payload), "non-string panic payload");
    }

    #[test]
    fn test_task_id_display() {
        assert_eq!(TaskId::from_u64(12).to_string(), "12");
        assert_eq!(TaskId::from_u64(12).as_u64(), 12);
    }
}
