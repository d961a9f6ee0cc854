//! Strand I/O
//!
//! The synchronous file interface that Strand tasks reach through the I/O
//! driver. The scheduler never interprets these results: whatever a backend
//! returns, success or `io::Error`, is handed back to the calling task as is.

mod fs;
mod handles;
mod memory;

pub use fs::FsBackend;
pub use memory::{IoEvent, MemoryBackend};

use std::fmt;
use std::io;
use std::path::Path;

/// Descriptor of an open file, issued by an [`IoBackend`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fd(u64);

impl Fd {
    /// Wrap a raw descriptor value
    pub fn from_raw(raw: u64) -> Self {
        Fd(raw)
    }

    /// Get the raw descriptor value
    pub fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Fd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fd#{}", self.0)
    }
}

/// Blocking open/read/write/close interface.
///
/// Every call may block the calling thread for as long as the underlying
/// device needs. Implementations must be callable from any thread, since a
/// task issues its calls from whichever thread the I/O driver hands it.
pub trait IoBackend: Send + Sync {
    /// Open an existing file for reading and writing. Does not create it.
    fn open(&self, path: &Path) -> io::Result<Fd>;

    /// Read up to `buf.len()` bytes at the descriptor's cursor.
    fn read(&self, fd: Fd, buf: &mut [u8]) -> io::Result<usize>;

    /// Write `bytes` at the descriptor's cursor, returning the count written.
    fn write(&self, fd: Fd, bytes: &[u8]) -> io::Result<usize>;

    /// Close the descriptor. Using it afterwards is an error.
    fn close(&self, fd: Fd) -> io::Result<()>;
}

pub(crate) fn bad_descriptor(fd: Fd) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("bad file descriptor: {}", fd),
    )
}
