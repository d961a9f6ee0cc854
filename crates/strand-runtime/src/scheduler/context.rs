//! Execution contexts and the switch primitive
//!
//! Every task runs on a carrier thread of its own, which plays the role of
//! the task's stack. Control moves between a driver and a task by handing a
//! message to the target's [`Baton`] and parking on one's own, so at any
//! instant exactly one side of the pair is executing. A task therefore runs
//! strictly on behalf of the driver that last switched into it: its
//! *carrier*.
//!
//! A context is created once per task (allocating the stack), and a fresh
//! context is captured at each later suspension point. Captures share the
//! task's stack and only allocate a new saved-state record.

use crate::scheduler::driver::DriverKind;
use crate::scheduler::stats::{Counters, LedgerToken, Resource};
use crate::scheduler::{TaskId, TaskState};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

/// Single-slot hand-off between two threads.
///
/// `hand` never blocks; `take` parks until a message is present. The slot
/// persists, so a message handed before the receiver parks is not lost.
pub(crate) struct Baton<T> {
    slot: Mutex<Option<T>>,
    ready: Condvar,
}

impl<T> Baton<T> {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    pub(crate) fn hand(&self, message: T) {
        let mut slot = self.slot.lock();
        debug_assert!(slot.is_none(), "baton handed twice without a take");
        *slot = Some(message);
        self.ready.notify_one();
    }

    pub(crate) fn take(&self) -> T {
        let mut slot = self.slot.lock();
        loop {
            if let Some(message) = slot.take() {
                return message;
            }
            self.ready.wait(&mut slot);
        }
    }
}

/// Transfer control: hand `message` to `incoming`, then park on `outgoing`
/// until some later switch targets it.
pub(crate) fn switch<M, R>(outgoing: &Baton<R>, incoming: &Baton<M>, message: M) -> R {
    incoming.hand(message);
    outgoing.take()
}

/// Blocking operations offloaded to the I/O driver
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum IoOp {
    Open,
    Read,
    Write,
    Close,
}

impl fmt::Display for IoOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IoOp::Open => "open",
            IoOp::Read => "read",
            IoOp::Write => "write",
            IoOp::Close => "close",
        };
        f.write_str(name)
    }
}

/// Where a context continues when it is next resumed
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum ResumePoint {
    /// Start of the task's entry point
    Entry,
    /// Return from `yield_now`
    Yield,
    /// Start of a blocking call; resumed by the I/O driver
    BeforeIo(IoOp),
    /// End of a blocking call; resumed by a compute driver
    AfterIo(IoOp),
}

/// How a task finished
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Completion {
    /// The entry point returned
    Returned,
    /// The task called `exit`
    Exited,
    /// The entry point panicked
    Panicked,
}

/// Driver → task message
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Resume {
    /// Run on behalf of the driver on this thread
    Carry(ThreadId),
    /// The stack is being released; unwind it
    Terminate,
}

/// Why control came back to a driver
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Suspension {
    Yielded,
    Blocked(IoOp),
    Unblocked(IoOp),
    Completed(Completion),
}

/// Task → driver message
#[derive(Debug, Copy, Clone)]
pub(crate) struct Handback {
    pub(crate) task: TaskId,
    pub(crate) suspension: Suspension,
}

/// A task's stack: its carrier thread's parking spot.
pub(crate) struct TaskStack {
    task: TaskId,
    state: AtomicU8,
    baton: Baton<Resume>,
    ledger: LedgerToken,
}

impl TaskStack {
    pub(crate) fn task(&self) -> TaskId {
        self.task
    }

    pub(crate) fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: TaskState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Park until the first driver resumes this stack.
    pub(crate) fn await_first_resume(&self) -> Resume {
        self.baton.take()
    }

    /// Park a completed task until its stack is released.
    pub(crate) fn await_release(&self) {
        loop {
            match self.baton.take() {
                Resume::Terminate => return,
                Resume::Carry(_) => {
                    debug_assert!(false, "completed task {} resumed", self.task);
                    tracing::error!(task = %self.task, "completed task resumed");
                }
            }
        }
    }

    /// Tell the carrier thread its stack is being released.
    pub(crate) fn terminate(&self) {
        self.baton.hand(Resume::Terminate);
    }

    /// Capture a continuation on this stack. Does not transfer control.
    pub(crate) fn capture(self: &Arc<Self>, point: ResumePoint) -> ExecutionContext {
        ExecutionContext {
            stack: Arc::clone(self),
            state: SavedState::new(self.ledger.counters(), point),
        }
    }

    /// Switch from this task to `driver`, returning once resumed again.
    pub(crate) fn switch_to(&self, driver: &LoopContext, suspension: Suspension) -> Resume {
        let handback = Handback {
            task: self.task,
            suspension,
        };
        switch(&self.baton, &driver.baton, handback)
    }

    /// Return control to `driver` for the last time.
    pub(crate) fn leave(&self, driver: &LoopContext, completion: Completion) {
        driver.baton.hand(Handback {
            task: self.task,
            suspension: Suspension::Completed(completion),
        });
    }
}

/// Saved-state record of one suspension point
pub(crate) struct SavedState {
    point: ResumePoint,
    _ledger: LedgerToken,
}

impl SavedState {
    fn new(counters: &Arc<Counters>, point: ResumePoint) -> Self {
        Self {
            point,
            _ledger: LedgerToken::acquire(counters, Resource::Context),
        }
    }
}

/// A resumable task: its stack plus the point it resumes at.
///
/// Not `Clone`: whoever holds the value is the only party allowed to resume
/// it, which is what keeps two drivers from resuming one task at once.
pub(crate) struct ExecutionContext {
    stack: Arc<TaskStack>,
    state: SavedState,
}

impl ExecutionContext {
    /// Allocate a stack for a new task and start its carrier thread, parked
    /// until the first resume. `body` runs on the carrier thread.
    pub(crate) fn create<F>(
        task: TaskId,
        counters: &Arc<Counters>,
        builder: thread::Builder,
        body: F,
    ) -> io::Result<(ExecutionContext, JoinHandle<()>)>
    where
        F: FnOnce(Arc<TaskStack>) + Send + 'static,
    {
        let stack = Arc::new(TaskStack {
            task,
            state: AtomicU8::new(TaskState::Ready as u8),
            baton: Baton::new(),
            ledger: LedgerToken::acquire(counters, Resource::Stack),
        });
        let carrier_stack = Arc::clone(&stack);
        let handle = builder.spawn(move || body(carrier_stack))?;

        let context = ExecutionContext {
            stack,
            state: SavedState::new(counters, ResumePoint::Entry),
        };
        Ok((context, handle))
    }

    pub(crate) fn task(&self) -> TaskId {
        self.stack.task
    }

    pub(crate) fn stack(&self) -> &Arc<TaskStack> {
        &self.stack
    }

    pub(crate) fn point(&self) -> ResumePoint {
        self.state.point
    }

    /// Resume this context from `driver`. Returns when the task switches back.
    pub(crate) fn resume_from(&self, driver: &LoopContext) -> Handback {
        switch(&driver.baton, &self.stack.baton, Resume::Carry(driver.thread))
    }

    /// Give up the stack reference, keeping only the saved-state record.
    pub(crate) fn vacate(self) -> ContextRecord {
        ContextRecord {
            task: self.stack.task,
            state: self.state,
        }
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("task", &self.task())
            .field("point", &self.point())
            .finish()
    }
}

/// A context a driver has switched out of, kept until shutdown
pub(crate) struct ContextRecord {
    task: TaskId,
    state: SavedState,
}

impl ContextRecord {
    pub(crate) fn task(&self) -> TaskId {
        self.task
    }

    pub(crate) fn point(&self) -> ResumePoint {
        self.state.point
    }
}

/// A driver's own control flow, outside any task
pub(crate) struct LoopContext {
    thread: ThreadId,
    kind: DriverKind,
    baton: Baton<Handback>,
    _ledger: LedgerToken,
}

impl LoopContext {
    /// Loop context for the calling thread
    pub(crate) fn for_current_thread(kind: DriverKind, counters: &Arc<Counters>) -> Self {
        Self {
            thread: thread::current().id(),
            kind,
            baton: Baton::new(),
            _ledger: LedgerToken::acquire(counters, Resource::DriverContext),
        }
    }

    pub(crate) fn thread(&self) -> ThreadId {
        self.thread
    }

    pub(crate) fn kind(&self) -> DriverKind {
        self.kind
    }
}
