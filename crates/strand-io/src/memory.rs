//! In-memory backend with a call journal

use crate::handles::DescriptorTable;
use crate::{Fd, IoBackend};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

/// One successful backend call, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IoEvent {
    Open { path: PathBuf, fd: Fd },
    Read { fd: Fd, len: usize },
    Write { fd: Fd, path: PathBuf, bytes: Vec<u8> },
    Close { fd: Fd },
}

struct OpenFile {
    path: PathBuf,
    cursor: usize,
}

/// Backend keeping named files in memory.
///
/// Only files seeded through [`MemoryBackend::with_file`] or
/// [`MemoryBackend::insert_file`] can be opened. Every successful call is
/// appended to a journal, which tests use to check what a task actually did.
#[derive(Default)]
pub struct MemoryBackend {
    files: Mutex<HashMap<PathBuf, Vec<u8>>>,
    open: DescriptorTable<OpenFile>,
    journal: Mutex<Vec<IoEvent>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a file, builder style.
    pub fn with_file(self, path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) -> Self {
        self.insert_file(path, contents);
        self
    }

    /// Create or replace a file.
    pub fn insert_file(&self, path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) {
        self.files.lock().insert(path.into(), contents.into());
    }

    /// Current contents of a file.
    pub fn contents(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        self.files.lock().get(path.as_ref()).cloned()
    }

    /// Snapshot of the journal.
    pub fn events(&self) -> Vec<IoEvent> {
        self.journal.lock().clone()
    }

    /// Every write recorded against `path`, oldest first.
    pub fn writes_to(&self, path: impl AsRef<Path>) -> Vec<Vec<u8>> {
        let path = path.as_ref();
        self.journal
            .lock()
            .iter()
            .filter_map(|event| match event {
                IoEvent::Write { path: p, bytes, .. } if p == path => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of descriptors currently open.
    pub fn open_count(&self) -> usize {
        self.open.live()
    }

    fn record(&self, event: IoEvent) {
        self.journal.lock().push(event);
    }
}

impl IoBackend for MemoryBackend {
    fn open(&self, path: &Path) -> io::Result<Fd> {
        if !self.files.lock().contains_key(path) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such file: {}", path.display()),
            ));
        }
        let fd = self.open.issue(OpenFile {
            path: path.to_path_buf(),
            cursor: 0,
        });
        self.record(IoEvent::Open {
            path: path.to_path_buf(),
            fd,
        });
        Ok(fd)
    }

    fn read(&self, fd: Fd, buf: &mut [u8]) -> io::Result<usize> {
        let mut handle = self.open.get_mut(fd)?;
        let len = {
            let files = self.files.lock();
            let data = files.get(&handle.path).map(Vec::as_slice).unwrap_or(&[]);
            let start = handle.cursor.min(data.len());
            let len = buf.len().min(data.len() - start);
            buf[..len].copy_from_slice(&data[start..start + len]);
            len
        };
        handle.cursor += len;
        drop(handle);
        self.record(IoEvent::Read { fd, len });
        Ok(len)
    }

    fn write(&self, fd: Fd, bytes: &[u8]) -> io::Result<usize> {
        let mut handle = self.open.get_mut(fd)?;
        let path = handle.path.clone();
        {
            let mut files = self.files.lock();
            let data = files.entry(path.clone()).or_default();
            let start = handle.cursor;
            if data.len() < start + bytes.len() {
                data.resize(start + bytes.len(), 0);
            }
            data[start..start + bytes.len()].copy_from_slice(bytes);
        }
        handle.cursor += bytes.len();
        drop(handle);
        self.record(IoEvent::Write {
            fd,
            path,
            bytes: bytes.to_vec(),
        });
        Ok(bytes.len())
    }

    fn close(&self, fd: Fd) -> io::Result<()> {
        self.open.retire(fd)?;
        self.record(IoEvent::Close { fd });
        Ok(())
    }
}
