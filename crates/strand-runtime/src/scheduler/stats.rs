//! Scheduler counters and the allocation ledger

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Scheduler statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Total tasks spawned
    pub tasks_spawned: u64,

    /// Total tasks that reached Completed (panicked ones included)
    pub tasks_completed: u64,

    /// Tasks whose entry point panicked
    pub tasks_panicked: u64,

    /// Currently active tasks (spawned - completed)
    pub active_tasks: usize,

    /// Times a driver switched into a task
    pub resumptions: u64,

    /// Blocking calls performed on the I/O driver
    pub io_operations: u64,

    /// Execution contexts created or captured
    pub contexts_allocated: u64,

    /// Execution contexts released
    pub contexts_released: u64,

    /// Task stacks allocated
    pub stacks_allocated: u64,

    /// Task stacks released
    pub stacks_released: u64,

    /// Driver loop contexts allocated
    pub driver_contexts_allocated: u64,

    /// Driver loop contexts released
    pub driver_contexts_released: u64,

    /// Contexts waiting in the ready queue
    pub ready_depth: usize,

    /// Contexts waiting in the wait queue
    pub wait_depth: usize,

    /// Vacated records retained in the disposal queue
    pub disposal_depth: usize,
}

impl SchedulerStats {
    /// True when every context, stack and driver context has been released
    pub fn is_balanced(&self) -> bool {
        self.contexts_allocated == self.contexts_released
            && self.stacks_allocated == self.stacks_released
            && self.driver_contexts_allocated == self.driver_contexts_released
    }
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) tasks_spawned: AtomicU64,
    pub(crate) tasks_completed: AtomicU64,
    pub(crate) tasks_panicked: AtomicU64,
    pub(crate) resumptions: AtomicU64,
    pub(crate) io_operations: AtomicU64,
    allocated: [AtomicU64; 3],
    released: [AtomicU64; 3],
}

/// Resource kinds tracked by the ledger
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Resource {
    Context = 0,
    Stack = 1,
    DriverContext = 2,
}

impl Counters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    pub(crate) fn allocated(&self, resource: Resource) -> u64 {
        Self::get(&self.allocated[resource as usize])
    }

    pub(crate) fn released(&self, resource: Resource) -> u64 {
        Self::get(&self.released[resource as usize])
    }

    /// Fill the counter-backed fields of a stats snapshot
    pub(crate) fn fill(&self, stats: &mut SchedulerStats) {
        stats.tasks_spawned = Self::get(&self.tasks_spawned);
        stats.tasks_completed = Self::get(&self.tasks_completed);
        stats.tasks_panicked = Self::get(&self.tasks_panicked);
        stats.resumptions = Self::get(&self.resumptions);
        stats.io_operations = Self::get(&self.io_operations);
        stats.contexts_allocated = self.allocated(Resource::Context);
        stats.contexts_released = self.released(Resource::Context);
        stats.stacks_allocated = self.allocated(Resource::Stack);
        stats.stacks_released = self.released(Resource::Stack);
        stats.driver_contexts_allocated = self.allocated(Resource::DriverContext);
        stats.driver_contexts_released = self.released(Resource::DriverContext);
    }
}

/// Counts one allocation on creation and one release on drop.
///
/// Embedded in every context, stack and driver context so that leaks show up
/// as an unbalanced ledger after shutdown.
#[derive(Debug)]
pub(crate) struct LedgerToken {
    counters: Arc<Counters>,
    resource: Resource,
}

impl LedgerToken {
    pub(crate) fn acquire(counters: &Arc<Counters>, resource: Resource) -> Self {
        Counters::bump(&counters.allocated[resource as usize]);
        Self {
            counters: counters.clone(),
            resource,
        }
    }

    pub(crate) fn counters(&self) -> &Arc<Counters> {
        &self.counters
    }
}

impl Drop for LedgerToken {
    fn drop(&mut self) {
        Counters::bump(&self.counters.released[self.resource as usize]);
    }
}
