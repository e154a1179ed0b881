//! Batch scheduler: drains the queue into capped concurrent batches.
//!
//! The coordinator is event-driven, not polling: batch tasks report
//! settlement over an mpsc channel and the drain loop wakes exactly when a
//! batch settles or a stop is requested.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use conveyor_events::{SchedulerEventBus, sources, topics};
use conveyor_queue::{Job, JobQueue};
use serde_json::{Value, json};
use tokio::sync::{RwLock, mpsc, watch};

use crate::config::{BatchConfig, BatchConfigPatch};
use crate::error::{Result, SchedulerError};
use crate::progress::compute_progress;
use crate::runner::{BatchRunOptions, BatchRunner, BoundedBatchRunner, JobRunner};
use crate::types::{
    Batch, BatchSnapshot, BatchStatus, JobResult, QueueInfo, RunSummary, SchedulerStatus,
    classify_queue_health, duration_ms,
};

/// Priority increase applied to a job re-enqueued after failure.
pub const RETRY_PRIORITY_BOOST: i64 = 10;

/// Queue depth beyond which status reports `Backlogged`.
const BACKLOG_QUEUE_LEN: usize = 1024;

/// Oldest-entry age beyond which status reports `Stalled`.
const STALL_ENTRY_AGE: Duration = Duration::from_secs(120);

#[derive(Debug, Default)]
struct SchedulerState {
    total_jobs: usize,
    completed: usize,
    failed: usize,
    retried: usize,
    batches_run: usize,
    active: HashMap<String, Batch>,
    results: HashMap<String, JobResult>,
    started_at: Option<Instant>,
    running: bool,
}

impl SchedulerState {
    fn elapsed(&self) -> Duration {
        self.started_at.map_or(Duration::ZERO, |t| t.elapsed())
    }
}

/// What one batch task reports back to the coordinator.
struct BatchSettlement {
    batch_id: String,
    jobs: Vec<Job>,
    outcome: anyhow::Result<HashMap<String, JobResult>>,
    duration_ms: u64,
}

/// Two-level bounded batch scheduler over a shared [`JobQueue`].
///
/// Jobs are pushed into [`queue()`](Self::queue) before (or during) a run;
/// [`start()`](Self::start) drains the queue into batches of
/// `batch_size`, processing at most `batch_concurrency` batches at once and
/// at most `job_concurrency` jobs within each. Failed jobs are re-enqueued
/// with boosted priority until their retry budget is exhausted. Lifecycle
/// and progress events are published to the injected bus.
pub struct BatchScheduler {
    queue: JobQueue,
    events: SchedulerEventBus,
    batch_runner: Arc<dyn BatchRunner>,
    config: Arc<RwLock<BatchConfig>>,
    state: Arc<RwLock<SchedulerState>>,
    stop_tx: watch::Sender<bool>,
}

impl BatchScheduler {
    /// Create a scheduler around a job runner, using the default bounded
    /// batch runner for within-batch execution.
    ///
    /// # Errors
    /// Returns [`SchedulerError::InvalidConfig`] when `config` is out of
    /// range.
    pub fn new(
        config: BatchConfig,
        runner: Arc<dyn JobRunner>,
        events: SchedulerEventBus,
    ) -> Result<Self> {
        let batch_runner = Arc::new(BoundedBatchRunner::new(runner, events.clone()));
        Self::with_batch_runner(config, batch_runner, events)
    }

    /// Create a scheduler with a custom whole-batch runner.
    ///
    /// # Errors
    /// Returns [`SchedulerError::InvalidConfig`] when `config` is out of
    /// range.
    pub fn with_batch_runner(
        config: BatchConfig,
        batch_runner: Arc<dyn BatchRunner>,
        events: SchedulerEventBus,
    ) -> Result<Self> {
        if let Err(error) = config.validate() {
            tracing::warn!(%error, "rejected scheduler configuration");
            return Err(error);
        }
        let queue = JobQueue::new(config.strategy);
        let (stop_tx, _) = watch::channel(false);
        Ok(Self {
            queue,
            events,
            batch_runner,
            config: Arc::new(RwLock::new(config)),
            state: Arc::new(RwLock::new(SchedulerState::default())),
            stop_tx,
        })
    }

    /// The shared queue; push jobs here before starting a run.
    #[must_use]
    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// The event bus this scheduler publishes to.
    #[must_use]
    pub fn events(&self) -> &SchedulerEventBus {
        &self.events
    }

    /// Drive the run to completion and return the aggregated results.
    ///
    /// Resolves once the queue is empty and no batch is in flight (all
    /// retries included), or once [`stop()`](Self::stop) is observed.
    ///
    /// # Errors
    /// Returns [`SchedulerError::AlreadyRunning`] when a run is in
    /// progress. Job and batch failures never surface here; they are
    /// recorded in the returned [`RunSummary`].
    pub async fn start(&self) -> Result<RunSummary> {
        let (total_jobs, batch_concurrency) = {
            let mut state = self.state.write().await;
            if state.running {
                return Err(SchedulerError::AlreadyRunning);
            }
            *state = SchedulerState::default();
            state.running = true;
            state.started_at = Some(Instant::now());
            state.total_jobs = self.queue.len().await;
            (state.total_jobs, self.config.read().await.batch_concurrency)
        };
        self.stop_tx.send_replace(false);
        let mut stop_rx = self.stop_tx.subscribe();

        {
            let config = self.config.read().await;
            self.events.emit(
                sources::SCHEDULER,
                topics::BATCH_STARTED,
                json!({
                    "total_jobs": total_jobs,
                    "batch_size": config.batch_size,
                    "batch_concurrency": config.batch_concurrency,
                    "job_concurrency": config.job_concurrency,
                    "strategy": config.strategy.to_string(),
                }),
            );
            tracing::info!(
                total_jobs,
                batch_size = config.batch_size,
                batch_concurrency = config.batch_concurrency,
                job_concurrency = config.job_concurrency,
                strategy = %config.strategy,
                "scheduler run started"
            );
        }

        let (settle_tx, mut settle_rx) =
            mpsc::channel::<BatchSettlement>(batch_concurrency.saturating_mul(2).max(2));
        let mut stopped = false;

        loop {
            self.spawn_ready_batches(&settle_tx).await;

            let active = self.state.read().await.active.len();
            if active == 0 && self.queue.is_empty().await {
                break;
            }

            tokio::select! {
                settled = settle_rx.recv() => {
                    let Some(settlement) = settled else { break };
                    self.handle_settlement(settlement).await;
                }
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        self.cancel_active().await;
                        stopped = true;
                        break;
                    }
                }
            }
        }

        let summary = {
            let mut state = self.state.write().await;
            state.running = false;
            RunSummary {
                total_jobs: state.total_jobs,
                completed: state.completed,
                failed: state.failed,
                retried: state.retried,
                batches_run: state.batches_run,
                elapsed_ms: duration_ms(state.elapsed()),
                results: state.results.clone(),
            }
        };

        if !stopped {
            let processed = summary.completed + summary.failed;
            let avg_ms_per_job = if processed == 0 {
                0
            } else {
                summary.elapsed_ms / processed as u64
            };
            self.events.emit(
                sources::SCHEDULER,
                topics::BATCH_ALL_COMPLETED,
                json!({
                    "total_jobs": summary.total_jobs,
                    "completed": summary.completed,
                    "failed": summary.failed,
                    "retried": summary.retried,
                    "duration_ms": summary.elapsed_ms,
                    "avg_ms_per_job": avg_ms_per_job,
                }),
            );
            tracing::info!(
                completed = summary.completed,
                failed = summary.failed,
                retried = summary.retried,
                batches = summary.batches_run,
                elapsed_ms = summary.elapsed_ms,
                "scheduler run drained"
            );
        }

        Ok(summary)
    }

    /// Request the current run to stop.
    ///
    /// Best-effort: active batches are marked cancelled and dropped from
    /// the bookkeeping immediately, but job runner invocations already in
    /// flight keep running in the background until they finish on their
    /// own (or honor a cancellation signal shared by the embedder).
    ///
    /// # Errors
    /// Returns [`SchedulerError::NotRunning`] when no run is in progress.
    pub async fn stop(&self) -> Result<()> {
        if !self.state.read().await.running {
            return Err(SchedulerError::NotRunning);
        }
        tracing::warn!("scheduler stop requested");
        self.stop_tx.send_replace(true);
        Ok(())
    }

    /// Validate and merge a configuration update.
    ///
    /// Takes effect on the next drain iteration; batches already formed
    /// keep the options they were launched with. A strategy change
    /// propagates to the queue.
    ///
    /// # Errors
    /// Returns [`SchedulerError::InvalidConfig`] when the merged
    /// configuration is out of range; the live config is left untouched.
    pub async fn update_config(&self, patch: BatchConfigPatch) -> Result<()> {
        let mut config = self.config.write().await;
        let merged = patch.apply_to(&config);
        if let Err(error) = merged.validate() {
            tracing::warn!(%error, "rejected configuration update");
            return Err(error);
        }
        let strategy = merged.strategy;
        let strategy_changed = strategy != config.strategy;
        *config = merged;
        drop(config);

        if strategy_changed {
            self.queue.set_strategy(strategy).await;
            tracing::info!(%strategy, "queue strategy updated");
        }
        Ok(())
    }

    /// Aggregate status: run flag, totals, queue depth, active batches,
    /// queue health, and the live config.
    pub async fn status(&self) -> SchedulerStatus {
        let config = self.config.read().await.clone();
        let queue_size = self.queue.len().await;
        let oldest = self.queue.oldest_entry_age().await;
        let state = self.state.read().await;
        SchedulerStatus {
            running: state.running,
            total_jobs: state.total_jobs,
            completed: state.completed,
            failed: state.failed,
            queue_size,
            active_batches: state.active.len(),
            health: classify_queue_health(queue_size, oldest, BACKLOG_QUEUE_LEN, STALL_ENTRY_AGE),
            config,
        }
    }

    /// Snapshots of every batch currently registered as active.
    pub async fn active_batches(&self) -> Vec<BatchSnapshot> {
        self.state
            .read()
            .await
            .active
            .values()
            .map(BatchSnapshot::from)
            .collect()
    }

    /// Queue inspection: depth, emptiness, and the ordered path snapshot.
    pub async fn queue_info(&self) -> QueueInfo {
        let entries = self.queue.entries().await;
        QueueInfo {
            size: entries.len(),
            is_empty: entries.is_empty(),
            paths: entries.into_iter().map(|entry| entry.job.path).collect(),
        }
    }

    /// Form and launch batches while the queue has entries and batch
    /// capacity is free.
    async fn spawn_ready_batches(&self, settle_tx: &mpsc::Sender<BatchSettlement>) {
        loop {
            let config = self.config.read().await.clone();
            if self.state.read().await.active.len() >= config.batch_concurrency {
                return;
            }

            let entries = self.queue.pop_many(config.batch_size).await;
            if entries.is_empty() {
                return;
            }
            let jobs: Vec<Job> = entries.into_iter().map(|entry| entry.job).collect();

            let batch = Batch::new(jobs.clone());
            let batch_id = batch.id.clone();
            let paths = batch.paths();
            {
                let mut state = self.state.write().await;
                state.active.insert(batch_id.clone(), batch);
                state.batches_run += 1;
            }
            self.events.emit(
                sources::SCHEDULER,
                topics::BATCH_QUEUED,
                json!({
                    "batch_id": batch_id,
                    "job_count": paths.len(),
                    "paths": paths,
                }),
            );
            tracing::info!(batch_id = %batch_id, jobs = paths.len(), "batch queued");

            let options = BatchRunOptions {
                batch_id: batch_id.clone(),
                job_concurrency: config.job_concurrency,
                per_job_timeout: config.per_job_timeout(),
                progressive_results: config.progressive_results,
            };
            let batch_runner = Arc::clone(&self.batch_runner);
            let events = self.events.clone();
            let state = Arc::clone(&self.state);
            let settle_tx = settle_tx.clone();
            tokio::spawn(async move {
                {
                    let mut state = state.write().await;
                    if let Some(batch) = state.active.get_mut(&options.batch_id) {
                        batch.status = BatchStatus::Processing;
                        batch.started_at = Some(Instant::now());
                    }
                }
                events.emit(
                    sources::SCHEDULER,
                    topics::BATCH_PROCESSING,
                    json!({ "batch_id": options.batch_id }),
                );

                let started = Instant::now();
                let outcome = batch_runner.run_batch(&jobs, &options).await;
                let settlement = BatchSettlement {
                    batch_id: options.batch_id.clone(),
                    jobs,
                    outcome,
                    duration_ms: duration_ms(started.elapsed()),
                };
                // Receiver gone means the run was stopped; nothing to report.
                let _ = settle_tx.send(settlement).await;
            });
        }
    }

    /// Fold one batch's results into the run state, schedule retries, and
    /// publish settlement events.
    async fn handle_settlement(&self, settlement: BatchSettlement) {
        let config = self.config.read().await.clone();

        let (batch_status, results) = match settlement.outcome {
            Ok(results) => (BatchStatus::Completed, results),
            Err(error) => {
                let reason = error.to_string();
                tracing::warn!(
                    batch_id = %settlement.batch_id,
                    error = %reason,
                    "batch runner failed; marking every job in the batch failed"
                );
                let results = settlement
                    .jobs
                    .iter()
                    .map(|job| (job.path.clone(), JobResult::failed(reason.clone(), 0)))
                    .collect();
                (BatchStatus::Failed, results)
            }
        };

        let mut to_retry: Vec<Job> = Vec::new();
        let (progress, settled) = {
            let mut state = self.state.write().await;
            for job in &settlement.jobs {
                let result = results.get(&job.path).cloned().unwrap_or_else(|| {
                    JobResult::failed("batch runner returned no result for job", 0)
                });
                if result.success {
                    state.completed += 1;
                } else if config.retry_failed && job.retry_count < config.retry_limit {
                    let mut retry = job.clone();
                    retry.retry_count += 1;
                    retry.priority += RETRY_PRIORITY_BOOST;
                    to_retry.push(retry);
                } else {
                    state.failed += 1;
                }
                state.results.insert(job.path.clone(), result);
            }
            state.retried += to_retry.len();
            let settled = state.active.remove(&settlement.batch_id).map(|mut batch| {
                batch.status = batch_status;
                batch.finished_at = Some(Instant::now());
                batch.results = results;
                batch
            });
            let progress = compute_progress(
                state.total_jobs,
                state.completed,
                state.failed,
                state.elapsed(),
            );
            (progress, settled)
        };

        if let Some(batch) = settled {
            self.events.emit(
                sources::SCHEDULER,
                topics::BATCH_COMPLETED,
                json!({
                    "batch_id": batch.id,
                    "status": batch.status.to_string(),
                    "duration_ms": settlement.duration_ms,
                    "results": serde_json::to_value(&batch.results).unwrap_or(Value::Null),
                }),
            );
        }
        tracing::info!(
            batch_id = %settlement.batch_id,
            status = %batch_status,
            duration_ms = settlement.duration_ms,
            "batch settled"
        );

        if !to_retry.is_empty() {
            let paths: Vec<String> = to_retry.iter().map(|job| job.path.clone()).collect();
            self.queue.push_many(to_retry).await;
            self.events.emit(
                sources::SCHEDULER,
                topics::BATCH_RETRY,
                json!({ "count": paths.len(), "paths": paths }),
            );
            tracing::info!(
                count = paths.len(),
                boost = RETRY_PRIORITY_BOOST,
                "re-enqueued failed jobs with boosted priority"
            );
        }

        self.events.emit(
            sources::SCHEDULER,
            topics::QUEUE_PROGRESS,
            serde_json::to_value(&progress).unwrap_or(Value::Null),
        );
    }

    /// Mark every active batch cancelled and drop it from the bookkeeping.
    async fn cancel_active(&self) {
        let cancelled: Vec<(String, Vec<String>)> = {
            let mut state = self.state.write().await;
            state
                .active
                .drain()
                .map(|(_, mut batch)| {
                    batch.status = BatchStatus::Cancelled;
                    (batch.id.clone(), batch.paths())
                })
                .collect()
        };
        for (batch_id, paths) in cancelled {
            self.events.emit(
                sources::SCHEDULER,
                topics::BATCH_CANCELLED,
                json!({ "batch_id": batch_id, "paths": paths }),
            );
            tracing::warn!(batch_id = %batch_id, jobs = paths.len(), "batch cancelled");
        }
    }
}
