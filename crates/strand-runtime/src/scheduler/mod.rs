//! Task scheduler: compute drivers plus one I/O driver
//!
//! Compute drivers run ready tasks. A task that makes a blocking call parks
//! on the wait queue, where the single I/O driver picks it up and carries it
//! through the call, then requeues it ready for a compute driver.

mod arena;
mod context;
mod driver;
mod queue;
mod registry;
#[allow(clippy::module_inception)]
mod scheduler;
mod stats;
pub(crate) mod task;

pub use driver::DriverKind;
pub use scheduler::{Scheduler, SchedulerHandle};
pub use stats::SchedulerStats;
pub use task::{TaskId, TaskState};
