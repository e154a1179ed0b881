//! conveyor-queue - Ordered work queue for the Conveyor scheduler
//!
//! Provides the pending side of the pipeline:
//! - `Job` payload model with priority and free-form metadata
//! - Pluggable ordering strategies (fifo, lifo, priority, size, alpha)
//! - Internally synchronized `JobQueue` safe to share between the drain
//!   loop and retry re-pushes
//!
//! The queue is deliberately not kept pre-sorted: the active strategy's
//! total order is materialized on every selecting call, so the strategy can
//! change at runtime without retroactively reordering anything already
//! popped.

mod error;
mod job;
mod queue;
mod strategy;

pub use error::{QueueError, Result};
pub use job::{Job, JobMetadata, JobMetadataPatch};
pub use queue::{JobQueue, QueueEntry};
pub use strategy::Strategy;
