//! Shared types: job results, batches, and inspection snapshots.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use conveyor_queue::Job;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::config::BatchConfig;

/// Outcome of one job attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    /// Whether the attempt succeeded.
    pub success: bool,
    /// Opaque diagnostics produced by the job body.
    #[serde(default)]
    pub errors: Vec<Value>,
    /// Attempt duration in milliseconds.
    pub duration_ms: u64,
    /// Human-readable reason when `success` is false.
    #[serde(default)]
    pub failure_reason: Option<String>,
}

impl JobResult {
    /// A successful attempt.
    #[must_use]
    pub fn succeeded(duration_ms: u64) -> Self {
        Self {
            success: true,
            errors: Vec::new(),
            duration_ms,
            failure_reason: None,
        }
    }

    /// A failed attempt with a reason.
    #[must_use]
    pub fn failed(reason: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            success: false,
            errors: Vec::new(),
            duration_ms,
            failure_reason: Some(reason.into()),
        }
    }

    /// Attach diagnostics.
    #[must_use]
    pub fn with_errors(mut self, errors: Vec<Value>) -> Self {
        self.errors = errors;
        self
    }
}

/// Batch lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    /// Formed but not yet executing.
    Pending,
    /// Executing under the batch runner.
    Processing,
    /// Batch runner returned results.
    Completed,
    /// Batch runner itself failed; all jobs marked failed.
    Failed,
    /// Cancelled by `stop()`.
    Cancelled,
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{name}")
    }
}

/// A group of jobs drained together from the queue and executed under a
/// shared within-batch concurrency cap.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Generated batch id.
    pub id: String,
    /// Jobs drawn for this batch.
    pub jobs: Vec<Job>,
    /// Lifecycle state.
    pub status: BatchStatus,
    /// When execution began.
    pub started_at: Option<Instant>,
    /// When the batch settled.
    pub finished_at: Option<Instant>,
    /// Per-job results, keyed by path; filled at settlement.
    pub results: HashMap<String, JobResult>,
    created_at: Instant,
}

impl Batch {
    /// Form a new pending batch over `jobs`.
    #[must_use]
    pub fn new(jobs: Vec<Job>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            jobs,
            status: BatchStatus::Pending,
            started_at: None,
            finished_at: None,
            results: HashMap::new(),
            created_at: Instant::now(),
        }
    }

    /// Paths of every job in this batch.
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        self.jobs.iter().map(|job| job.path.clone()).collect()
    }

    /// Milliseconds since the batch was formed.
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        duration_ms(self.created_at.elapsed())
    }
}

/// Point-in-time view of one active batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSnapshot {
    /// Batch id.
    pub id: String,
    /// Lifecycle state at snapshot time.
    pub status: BatchStatus,
    /// Number of jobs in the batch.
    pub job_count: usize,
    /// Paths of the jobs in the batch.
    pub paths: Vec<String>,
    /// Milliseconds since the batch was formed.
    pub elapsed_ms: u64,
}

impl From<&Batch> for BatchSnapshot {
    fn from(batch: &Batch) -> Self {
        Self {
            id: batch.id.clone(),
            status: batch.status,
            job_count: batch.jobs.len(),
            paths: batch.paths(),
            elapsed_ms: batch.elapsed_ms(),
        }
    }
}

/// Queue health classified from size and age thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueHealth {
    /// Queue depth and entry ages are within bounds.
    Healthy,
    /// Queue depth exceeds the backlog threshold.
    Backlogged,
    /// Oldest entry exceeds the stall age threshold.
    Stalled,
}

/// Classify queue health from depth and oldest-entry age.
#[must_use]
pub fn classify_queue_health(
    queue_size: usize,
    oldest_entry_age: Option<Duration>,
    backlog_threshold: usize,
    stall_age: Duration,
) -> QueueHealth {
    if oldest_entry_age.is_some_and(|age| age > stall_age) {
        return QueueHealth::Stalled;
    }
    if queue_size > backlog_threshold {
        return QueueHealth::Backlogged;
    }
    QueueHealth::Healthy
}

/// Aggregate scheduler status for `/status`-style inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStatus {
    /// Whether a run is in progress.
    pub running: bool,
    /// Initial job count of the current/last run.
    pub total_jobs: usize,
    /// Jobs with a terminal successful outcome.
    pub completed: usize,
    /// Jobs with a terminal failed outcome.
    pub failed: usize,
    /// Entries currently queued (including pending retries).
    pub queue_size: usize,
    /// Batches currently active.
    pub active_batches: usize,
    /// Classified queue health.
    pub health: QueueHealth,
    /// Live configuration.
    pub config: BatchConfig,
}

/// Queue inspection snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueInfo {
    /// Number of queued entries.
    pub size: usize,
    /// Whether the queue is empty.
    pub is_empty: bool,
    /// Job paths in strategy order.
    pub paths: Vec<String>,
}

/// Final outcome of one `start()` run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Initial job count (retries do not grow this).
    pub total_jobs: usize,
    /// Jobs that ended successful.
    pub completed: usize,
    /// Jobs that ended failed with retries exhausted (or retry disabled).
    pub failed: usize,
    /// Total re-enqueues performed.
    pub retried: usize,
    /// Batches formed over the run.
    pub batches_run: usize,
    /// Wall-clock duration of the run in milliseconds.
    pub elapsed_ms: u64,
    /// Latest result per job path; retry outcomes overwrite earlier ones.
    pub results: HashMap<String, JobResult>,
}

pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
