//! Filesystem backend over `std::fs`

use crate::handles::DescriptorTable;
use crate::{Fd, IoBackend};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;

/// Backend that opens real files.
///
/// Files are opened read-write without `create`, so opening a missing path
/// fails with `NotFound` and the error reaches the task unchanged.
#[derive(Default)]
pub struct FsBackend {
    files: DescriptorTable<File>,
}

impl FsBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of descriptors currently open.
    pub fn open_count(&self) -> usize {
        self.files.live()
    }
}

impl IoBackend for FsBackend {
    fn open(&self, path: &Path) -> io::Result<Fd> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(self.files.issue(file))
    }

    fn read(&self, fd: Fd, buf: &mut [u8]) -> io::Result<usize> {
        let file = self.files.get(fd)?;
        (&*file).read(buf)
    }

    fn write(&self, fd: Fd, bytes: &[u8]) -> io::Result<usize> {
        let file = self.files.get(fd)?;
        (&*file).write(bytes)
    }

    fn close(&self, fd: Fd) -> io::Result<()> {
        let file = self.files.retire(fd)?;
        file.sync_all()
    }
}
