//! Descriptor table shared by the backends

use crate::{bad_descriptor, Fd};
use dashmap::mapref::one::{Ref, RefMut};
use dashmap::DashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

/// First descriptor issued; keeps log output clear of the stdio numbers.
const FIRST_FD: u64 = 3;

/// Open resources of one backend, keyed by the descriptor handed to tasks.
///
/// Descriptors are never reissued, so a stale descriptor fails with
/// `InvalidInput` instead of reaching a newer file.
pub(crate) struct DescriptorTable<T> {
    open: DashMap<Fd, T>,
    next: AtomicU64,
}

impl<T> DescriptorTable<T> {
    pub(crate) fn issue(&self, resource: T) -> Fd {
        let fd = Fd::from_raw(self.next.fetch_add(1, Ordering::Relaxed));
        self.open.insert(fd, resource);
        fd
    }

    pub(crate) fn get(&self, fd: Fd) -> io::Result<Ref<'_, Fd, T>> {
        self.open.get(&fd).ok_or_else(|| bad_descriptor(fd))
    }

    pub(crate) fn get_mut(&self, fd: Fd) -> io::Result<RefMut<'_, Fd, T>> {
        self.open.get_mut(&fd).ok_or_else(|| bad_descriptor(fd))
    }

    /// Take the resource out of the table; the descriptor is dead afterwards.
    pub(crate) fn retire(&self, fd: Fd) -> io::Result<T> {
        self.open
            .remove(&fd)
            .map(|(_, resource)| resource)
            .ok_or_else(|| bad_descriptor(fd))
    }

    pub(crate) fn live(&self) -> usize {
        self.open.len()
    }
}

impl<T> Default for DescriptorTable<T> {
    fn default() -> Self {
        Self {
            open: DashMap::new(),
            next: AtomicU64::new(FIRST_FD),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_and_retire() {
        let table = DescriptorTable::default();
        let a = table.issue("a");
        let b = table.issue("b");
        assert_eq!(a.as_raw(), FIRST_FD);
        assert_eq!(table.live(), 2);

        *table.get_mut(b).unwrap() = "bb";
        assert_eq!(*table.get(b).unwrap(), "bb");
        assert_eq!(table.retire(b).unwrap(), "bb");
        assert_eq!(table.live(), 1);
    }

    #[test]
    fn test_retired_descriptor_is_dead() {
        let table = DescriptorTable::default();
        let first = table.issue(1);
        table.retire(first).unwrap();
        let second = table.issue(2);
        assert!(second > first);

        let err = table.get(first).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert_eq!(table.retire(first).unwrap_err().kind(), io::ErrorKind::InvalidInput);
    }
}
