//! Ownership of task stacks until they are released

use crate::scheduler::context::{ContextRecord, TaskStack};
use crate::scheduler::{TaskId, TaskState};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::thread::JoinHandle;

struct TaskSlot {
    stack: Arc<TaskStack>,
    carrier: JoinHandle<()>,
    /// Record of the last context a driver switched out of
    retired: Option<ContextRecord>,
}

/// Every task's stack and carrier thread, keyed by task.
///
/// Completed tasks keep their slot until [`TaskArena::release_all`] at
/// shutdown, unless the scheduler reaps them as they complete. Each slot
/// retains one vacated context record; retiring a newer one frees the older,
/// so a task's records never outnumber its slot.
pub(crate) struct TaskArena {
    slots: Mutex<FxHashMap<TaskId, TaskSlot>>,
}

impl TaskArena {
    pub(crate) fn new() -> Self {
        Self {
            slots: Mutex::new(FxHashMap::default()),
        }
    }

    pub(crate) fn insert(&self, stack: Arc<TaskStack>, carrier: JoinHandle<()>) {
        let task = stack.task();
        let slot = TaskSlot {
            stack,
            carrier,
            retired: None,
        };
        let previous = self.slots.lock().insert(task, slot);
        debug_assert!(previous.is_none(), "task {} inserted twice", task);
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// Logical state of a task still held by the arena
    pub(crate) fn state(&self, task: TaskId) -> Option<TaskState> {
        self.slots.lock().get(&task).map(|slot| slot.stack.state())
    }

    /// Keep `record` in its task's slot, freeing the record it replaces.
    pub(crate) fn retire(&self, record: ContextRecord) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(&record.task()) {
            slot.retired = Some(record);
        }
    }

    /// Take the retained record out of a task's slot.
    pub(crate) fn take_retired(&self, task: TaskId) -> Option<ContextRecord> {
        self.slots
            .lock()
            .get_mut(&task)
            .and_then(|slot| slot.retired.take())
    }

    /// Release one completed task's stack. Returns false if it was not held.
    pub(crate) fn reap(&self, task: TaskId) -> bool {
        let slot = self.slots.lock().remove(&task);
        match slot {
            Some(slot) => {
                Self::release(task, slot);
                true
            }
            None => false,
        }
    }

    /// Release every stack. Carrier threads must already be finishing.
    pub(crate) fn release_all(&self) -> usize {
        let slots: Vec<_> = self.slots.lock().drain().collect();
        let count = slots.len();
        for (task, slot) in slots {
            Self::release(task, slot);
        }
        count
    }

    fn release(task: TaskId, slot: TaskSlot) {
        let TaskSlot {
            stack,
            carrier,
            retired,
        } = slot;
        drop(retired);
        // An exited task is still parked on its stack.
        stack.terminate();
        if carrier.join().is_err() {
            tracing::error!(task = %task, "task carrier thread panicked");
        }
        drop(stack);
    }
}
