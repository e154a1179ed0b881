//! conveyor-scheduler - Batched, bounded-concurrency job execution
//!
//! The execution side of Conveyor:
//! - `run_bounded`: order-preserving bounded fan-out over a task list
//! - `JobRunner`/`BatchRunner`: injection seams for the actual job body
//! - `BatchScheduler`: drains a `conveyor_queue::JobQueue` into batches,
//!   caps concurrent batches and concurrent jobs within a batch, retries
//!   failures with boosted priority, and publishes lifecycle/progress
//!   events on a `conveyor_events::SchedulerEventBus`
//!
//! The scheduler never throws because of job content: job and batch
//! failures are folded into `JobResult`s and surfaced through events and
//! the final `RunSummary`.

mod config;
mod error;
mod executor;
mod progress;
mod runner;
mod scheduler;
mod types;

pub use config::{BatchConfig, BatchConfigPatch};
pub use error::{Result, SchedulerError};
pub use executor::{TaskFailure, TaskOutcome, run_bounded};
pub use progress::{ProgressReport, compute_progress};
pub use runner::{BatchRunOptions, BatchRunner, BoundedBatchRunner, JobRunner};
pub use scheduler::{BatchScheduler, RETRY_PRIORITY_BOOST};
pub use types::{
    Batch, BatchSnapshot, BatchStatus, JobResult, QueueHealth, QueueInfo, RunSummary,
    SchedulerStatus, classify_queue_health,
};
