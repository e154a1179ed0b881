//! Error types for scheduler construction and control.

use thiserror::Error;

/// Scheduler-specific errors.
///
/// Job and batch failures are not errors at this level: they are recorded
/// as failing `JobResult`s and optionally retried. This enum only covers
/// misuse of the scheduler itself.
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// Configuration value out of range, rejected at construction/update.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// `start()` called while a run is already in progress.
    #[error("scheduler is already running")]
    AlreadyRunning,

    /// `stop()` called with no run in progress.
    #[error("scheduler is not running")]
    NotRunning,
}

/// Result type for scheduler operations.
pub type Result<T> = std::result::Result<T, SchedulerError>;
