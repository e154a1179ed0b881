//! Runner seams: the caller-supplied job body and the per-batch wrapper.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use conveyor_events::{SchedulerEventBus, sources, topics};
use conveyor_queue::Job;
use serde_json::json;

use crate::executor::run_bounded;
use crate::types::{JobResult, duration_ms};

/// Async job body abstraction so batches can run real work or test doubles.
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Execute one job to a result.
    ///
    /// Failing by returning `Err` is equivalent to returning a failure
    /// `JobResult`: the batch wrapper converts it, so scheduler bookkeeping
    /// never observes an unhandled error from this boundary.
    async fn run_job(&self, job: &Job) -> anyhow::Result<JobResult>;
}

/// Options the scheduler passes down for one batch execution.
#[derive(Debug, Clone)]
pub struct BatchRunOptions {
    /// Id of the batch being executed (carried into per-job events).
    pub batch_id: String,
    /// Cap on concurrently running jobs within the batch.
    pub job_concurrency: usize,
    /// Wall-clock bound for one job runner invocation.
    pub per_job_timeout: Duration,
    /// Emit `job.completed` per job as it settles.
    pub progressive_results: bool,
}

/// Whole-batch execution seam.
///
/// The scheduler treats an `Err` from `run_batch` as a batch-level
/// infrastructure failure and synthesizes a failing result for every job in
/// the batch.
#[async_trait]
pub trait BatchRunner: Send + Sync {
    /// Run every job of one batch, returning results keyed by job path.
    async fn run_batch(
        &self,
        jobs: &[Job],
        options: &BatchRunOptions,
    ) -> anyhow::Result<HashMap<String, JobResult>>;
}

/// Default batch runner: bounded fan-out over the injected [`JobRunner`].
///
/// Applies the per-job timeout, converts runner errors/timeouts/panics into
/// failure results, and emits progressive per-job events when enabled.
pub struct BoundedBatchRunner {
    runner: Arc<dyn JobRunner>,
    events: SchedulerEventBus,
}

impl BoundedBatchRunner {
    /// Wrap a job runner and an event bus.
    #[must_use]
    pub fn new(runner: Arc<dyn JobRunner>, events: SchedulerEventBus) -> Self {
        Self { runner, events }
    }
}

#[async_trait]
impl BatchRunner for BoundedBatchRunner {
    async fn run_batch(
        &self,
        jobs: &[Job],
        options: &BatchRunOptions,
    ) -> anyhow::Result<HashMap<String, JobResult>> {
        let paths: Vec<String> = jobs.iter().map(|job| job.path.clone()).collect();

        let mut tasks = Vec::with_capacity(jobs.len());
        for job in jobs.iter().cloned() {
            let runner = Arc::clone(&self.runner);
            let events = self.events.clone();
            let options = options.clone();
            tasks.push(async move {
                let started = Instant::now();
                let attempt =
                    tokio::time::timeout(options.per_job_timeout, runner.run_job(&job)).await;
                let elapsed_ms = duration_ms(started.elapsed());
                let result = match attempt {
                    Ok(Ok(result)) => result,
                    Ok(Err(error)) => {
                        tracing::debug!(path = %job.path, error = %error, "job runner failed");
                        JobResult::failed(error.to_string(), elapsed_ms)
                    }
                    Err(_) => JobResult::failed(
                        format!("timed out after {}ms", options.per_job_timeout.as_millis()),
                        elapsed_ms,
                    ),
                };
                if options.progressive_results {
                    events.emit(
                        sources::BATCH_RUNNER,
                        topics::JOB_COMPLETED,
                        json!({
                            "batch_id": options.batch_id,
                            "path": job.path,
                            "success": result.success,
                            "duration_ms": result.duration_ms,
                        }),
                    );
                }
                result
            });
        }

        let outcomes = run_bounded(tasks, options.job_concurrency).await?;

        let mut results = HashMap::with_capacity(paths.len());
        for (slot, outcome) in outcomes.into_iter().enumerate() {
            let result = match outcome {
                Ok(result) => result,
                // The per-job future itself panicked or was aborted.
                Err(failure) => JobResult::failed(failure.to_string(), 0),
            };
            results.insert(paths[slot].clone(), result);
        }
        Ok(results)
    }
}
