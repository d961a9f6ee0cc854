//! Strand Runtime
//!
//! Multiplexes cooperatively scheduled tasks onto a fixed pool of compute
//! driver threads, and moves a task making a blocking I/O call onto a
//! dedicated I/O driver so compute drivers never block in the kernel.
//!
//! ```ignore
//! let scheduler = Scheduler::new(2)?;
//! scheduler.spawn(|| {
//!     let fd = task::blocking_open("notes.txt").unwrap();
//!     task::blocking_write(fd, b"hi").unwrap();
//!     task::blocking_close(fd).unwrap();
//! })?;
//! scheduler.shutdown()?;
//! ```

pub mod config;
mod error;
pub mod scheduler;

pub use config::SchedulerConfig;
pub use error::SchedulerError;
pub use scheduler::{
    DriverKind, Scheduler, SchedulerHandle, SchedulerStats, TaskId, TaskState,
};
pub use strand_io::{Fd, FsBackend, IoBackend, MemoryBackend};

/// Operations available to a running task
pub mod task {
    pub use crate::scheduler::task::{
        blocking_close, blocking_open, blocking_read, blocking_write, current_id, exit, in_task,
        spawn, yield_now,
    };
}
