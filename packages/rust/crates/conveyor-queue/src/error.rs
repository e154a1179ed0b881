//! Error types for queue operations.

use thiserror::Error;

/// Queue-specific errors.
#[derive(Error, Debug)]
pub enum QueueError {
    /// Operation referenced an entry id that is not in the queue.
    #[error("queue entry not found: {0}")]
    NotFound(String),
}

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;
