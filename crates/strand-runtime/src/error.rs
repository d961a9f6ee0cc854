//! Scheduler error types.

/// Errors reported by the scheduler facade and by task-side operations.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Configuration rejected before any thread was started
    #[error("Invalid scheduler configuration: {0}")]
    InvalidConfig(String),

    /// More drivers than the registry has slots for
    #[error("Driver registry full ({capacity} slots)")]
    RegistryFull {
        /// Fixed number of registry slots
        capacity: usize,
    },

    /// A task-only operation was called outside a running task
    #[error("Operation is only valid inside a running task")]
    NotInTask,

    /// The scheduler has already been shut down
    #[error("Scheduler has been shut down")]
    ShutDown,

    /// A task stack or driver thread could not be allocated
    #[error("Failed to start thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// Driver threads panicked while running
    #[error("{0} driver thread(s) panicked")]
    DriverPanicked(usize),

    /// A task resumed by a driver that never registered
    #[error("Task resumed by an unregistered driver")]
    UnknownDriver,

    /// Failure returned by the I/O backend, unchanged
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SchedulerError {
    /// The backend error, if this is a pass-through I/O failure
    pub fn as_io(&self) -> Option<&std::io::Error> {
        match self {
            SchedulerError::Io(err) => Some(err),
            _ => None,
        }
    }
}
