//! Driver registry: thread identity → driver loop context
//!
//! Populated once while drivers start, read by every suspending task to find
//! the loop context it must switch back to. Driver counts are small and
//! fixed, so lookups are a linear scan over the slot table.

use crate::scheduler::context::LoopContext;
use crate::SchedulerError;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::ThreadId;

pub(crate) struct TaskRegistry {
    slots: Mutex<Vec<Option<Arc<LoopContext>>>>,
}

impl TaskRegistry {
    /// Registry with a fixed number of slots
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Mutex::new(vec![None; capacity]),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.lock().len()
    }

    /// Claim a free slot for `context`.
    pub(crate) fn register(&self, context: Arc<LoopContext>) -> Result<(), SchedulerError> {
        let mut slots = self.slots.lock();
        let capacity = slots.len();
        match slots.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => {
                *slot = Some(context);
                Ok(())
            }
            None => Err(SchedulerError::RegistryFull { capacity }),
        }
    }

    /// Loop context of the driver running on `thread`
    pub(crate) fn lookup(&self, thread: ThreadId) -> Option<Arc<LoopContext>> {
        self.slots
            .lock()
            .iter()
            .flatten()
            .find(|context| context.thread() == thread)
            .cloned()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.lock().iter().flatten().count()
    }

    /// Release every registered loop context.
    pub(crate) fn clear(&self) -> usize {
        let mut slots = self.slots.lock();
        slots.iter_mut().filter_map(Option::take).count()
    }
}
