//! FIFO queues of contexts shared between tasks and drivers

use parking_lot::Mutex;
use std::collections::VecDeque;

/// Unbounded, thread-safe FIFO.
///
/// The lock covers a single push or pop and is never held across a context
/// switch. Pops never wait: an empty queue returns `None` and the caller
/// backs off.
pub(crate) struct TaskQueue<T> {
    name: &'static str,
    entries: Mutex<VecDeque<T>>,
}

impl<T> TaskQueue<T> {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn push_tail(&self, entry: T) {
        self.entries.lock().push_back(entry);
    }

    pub(crate) fn pop_head(&self) -> Option<T> {
        self.entries.lock().pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Remove every entry, oldest first.
    pub(crate) fn drain(&self) -> Vec<T> {
        self.entries.lock().drain(..).collect()
    }
}
