//! Scheduler configuration

use crate::SchedulerError;
use std::time::Duration;

/// Default number of driver registry slots
pub const DEFAULT_REGISTRY_CAPACITY: usize = 8;

/// Default stack size for each task (256 KiB)
pub const DEFAULT_TASK_STACK_SIZE: usize = 256 * 1024;

/// Default sleep between polls of an empty queue
pub const DEFAULT_IDLE_BACKOFF: Duration = Duration::from_micros(100);

/// Scheduler configuration
///
/// Exactly one I/O driver is always started in addition to
/// `compute_drivers`, so the registry must hold `compute_drivers + 1` slots.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of compute driver threads (at least 1)
    pub compute_drivers: usize,

    /// Fixed number of driver registry slots
    pub registry_capacity: usize,

    /// Stack size in bytes for every spawned task
    pub task_stack_size: usize,

    /// How long an idle driver sleeps before polling its queue again
    pub idle_backoff: Duration,

    /// Prefix for driver and task thread names
    pub thread_name_prefix: String,

    /// Release a task's stack as soon as it completes instead of at shutdown
    pub reap_completed: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            compute_drivers: 1,
            registry_capacity: DEFAULT_REGISTRY_CAPACITY,
            task_stack_size: DEFAULT_TASK_STACK_SIZE,
            idle_backoff: DEFAULT_IDLE_BACKOFF,
            thread_name_prefix: "strand".to_string(),
            reap_completed: false,
        }
    }
}

impl SchedulerConfig {
    /// Configuration with `compute_drivers` compute drivers and defaults elsewhere
    pub fn new(compute_drivers: usize) -> Self {
        Self::default().with_compute_drivers(compute_drivers)
    }

    /// One compute driver per CPU core, clamped to what the registry can hold
    pub fn per_core() -> Self {
        let mut config = Self::default();
        let max = config.registry_capacity.saturating_sub(1).max(1);
        config.compute_drivers = num_cpus::get().clamp(1, max);
        config
    }

    pub fn with_compute_drivers(mut self, count: usize) -> Self {
        self.compute_drivers = count;
        self
    }

    pub fn with_registry_capacity(mut self, capacity: usize) -> Self {
        self.registry_capacity = capacity;
        self
    }

    pub fn with_task_stack_size(mut self, bytes: usize) -> Self {
        self.task_stack_size = bytes;
        self
    }

    pub fn with_idle_backoff(mut self, backoff: Duration) -> Self {
        self.idle_backoff = backoff;
        self
    }

    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    pub fn with_reap_completed(mut self, reap: bool) -> Self {
        self.reap_completed = reap;
        self
    }

    /// Total driver threads, the I/O driver included
    pub fn driver_count(&self) -> usize {
        self.compute_drivers + 1
    }

    /// Reject configurations that could not start.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.compute_drivers == 0 {
            return Err(SchedulerError::InvalidConfig(
                "at least one compute driver is required".to_string(),
            ));
        }
        if self.task_stack_size == 0 {
            return Err(SchedulerError::InvalidConfig(
                "task stack size must be non-zero".to_string(),
            ));
        }
        if self.driver_count() > self.registry_capacity {
            return Err(SchedulerError::RegistryFull {
                capacity: self.registry_capacity,
            });
        }
        Ok(())
    }
}
