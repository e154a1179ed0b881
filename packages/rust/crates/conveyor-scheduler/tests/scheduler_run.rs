#![allow(missing_docs)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use conveyor_events::SchedulerEventBus;
use conveyor_queue::{Job, Strategy};
use conveyor_scheduler::{
    BatchConfig, BatchRunOptions, BatchRunner, BatchScheduler, JobResult, JobRunner,
    RETRY_PRIORITY_BOOST, SchedulerError,
};
use tokio::sync::Mutex;

/// Scripted job body: sleeps, then succeeds or fails per path, recording the
/// priority seen on each attempt and a concurrency high-water mark.
struct ScriptedRunner {
    delay: Duration,
    fail_paths: Vec<String>,
    attempts: Mutex<HashMap<String, Vec<i64>>>,
    active: AtomicUsize,
    high_water: AtomicUsize,
}

impl ScriptedRunner {
    fn succeeding(delay: Duration) -> Self {
        Self::failing(delay, &[])
    }

    fn failing(delay: Duration, fail_paths: &[&str]) -> Self {
        Self {
            delay,
            fail_paths: fail_paths.iter().map(ToString::to_string).collect(),
            attempts: Mutex::new(HashMap::new()),
            active: AtomicUsize::new(0),
            high_water: AtomicUsize::new(0),
        }
    }

    async fn attempt_priorities(&self, path: &str) -> Vec<i64> {
        self.attempts
            .lock()
            .await
            .get(path)
            .cloned()
            .unwrap_or_default()
    }

    fn high_water(&self) -> usize {
        self.high_water.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobRunner for ScriptedRunner {
    async fn run_job(&self, job: &Job) -> anyhow::Result<JobResult> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.high_water.fetch_max(now, Ordering::SeqCst);
        self.attempts
            .lock()
            .await
            .entry(job.path.clone())
            .or_default()
            .push(job.priority);
        tokio::time::sleep(self.delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.fail_paths.iter().any(|path| path == &job.path) {
            Ok(JobResult::failed("scripted failure", 1))
        } else {
            Ok(JobResult::succeeded(1))
        }
    }
}

fn config(batch_size: usize, batch_concurrency: usize, job_concurrency: usize) -> BatchConfig {
    BatchConfig {
        batch_size,
        batch_concurrency,
        job_concurrency,
        strategy: Strategy::Fifo,
        progressive_results: false,
        retry_failed: false,
        retry_limit: 0,
        per_job_timeout_ms: 5_000,
    }
}

fn jobs(paths: &[&str]) -> Vec<Job> {
    paths.iter().map(|path| Job::new(*path, 0)).collect()
}

#[tokio::test]
async fn three_jobs_over_batch_size_two_run_as_two_batches() {
    let runner = Arc::new(ScriptedRunner::succeeding(Duration::from_millis(5)));
    let scheduler = BatchScheduler::new(
        config(2, 1, 4),
        runner.clone(),
        SchedulerEventBus::default(),
    )
    .expect("config should be valid");
    scheduler.queue().push_many(jobs(&["/a", "/b", "/c"])).await;

    let summary = scheduler.start().await.expect("run should resolve");

    assert_eq!(summary.total_jobs, 3);
    assert_eq!(summary.batches_run, 2);
    assert_eq!(summary.completed, 3);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.results.len(), 3);
    assert!(summary.results.values().all(|result| result.success));
}

#[tokio::test]
async fn failing_job_is_retried_with_boosted_priority_until_limit() {
    let runner = Arc::new(ScriptedRunner::failing(
        Duration::from_millis(2),
        &["/flaky"],
    ));
    let mut cfg = config(1, 1, 1);
    cfg.retry_failed = true;
    cfg.retry_limit = 2;
    let scheduler = BatchScheduler::new(cfg, runner.clone(), SchedulerEventBus::default())
        .expect("config should be valid");
    scheduler.queue().push(Job::new("/flaky", 5)).await;

    let summary = scheduler.start().await.expect("run should resolve");

    // Original attempt plus exactly retry_limit retries, each at +boost.
    let priorities = runner.attempt_priorities("/flaky").await;
    assert_eq!(
        priorities,
        vec![5, 5 + RETRY_PRIORITY_BOOST, 5 + 2 * RETRY_PRIORITY_BOOST]
    );
    assert_eq!(summary.completed, 0);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.retried, 2);
    assert!(!summary.results["/flaky"].success);
}

#[tokio::test]
async fn retry_disabled_records_a_single_failed_attempt() {
    let runner = Arc::new(ScriptedRunner::failing(Duration::from_millis(2), &["/bad"]));
    let scheduler = BatchScheduler::new(
        config(1, 1, 1),
        runner.clone(),
        SchedulerEventBus::default(),
    )
    .expect("config should be valid");
    scheduler.queue().push(Job::new("/bad", 0)).await;

    let summary = scheduler.start().await.expect("run should resolve");

    assert_eq!(runner.attempt_priorities("/bad").await.len(), 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.retried, 0);
}

#[tokio::test]
async fn mixed_batch_retries_only_the_failed_jobs() {
    let runner = Arc::new(ScriptedRunner::failing(Duration::from_millis(2), &["/bad"]));
    let mut cfg = config(2, 1, 2);
    cfg.retry_failed = true;
    cfg.retry_limit = 1;
    let scheduler = BatchScheduler::new(cfg, runner.clone(), SchedulerEventBus::default())
        .expect("config should be valid");
    scheduler.queue().push_many(jobs(&["/ok", "/bad"])).await;

    let summary = scheduler.start().await.expect("run should resolve");

    assert_eq!(runner.attempt_priorities("/ok").await.len(), 1);
    assert_eq!(runner.attempt_priorities("/bad").await.len(), 2);
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.retried, 1);
    assert!(summary.results["/ok"].success);
    assert!(!summary.results["/bad"].success);
}

#[tokio::test]
async fn batch_concurrency_caps_simultaneous_batches() {
    // One job per batch and one job slot per batch, so concurrently running
    // jobs equal concurrently processing batches.
    let runner = Arc::new(ScriptedRunner::succeeding(Duration::from_millis(20)));
    let scheduler = BatchScheduler::new(
        config(1, 2, 1),
        runner.clone(),
        SchedulerEventBus::default(),
    )
    .expect("config should be valid");
    scheduler
        .queue()
        .push_many((0..8).map(|i| Job::new(format!("/job/{i}"), 0)).collect())
        .await;

    let summary = scheduler.start().await.expect("run should resolve");

    assert_eq!(summary.completed, 8);
    assert!(
        runner.high_water() <= 2,
        "observed {} concurrent batches",
        runner.high_water()
    );
}

#[tokio::test]
async fn job_concurrency_caps_jobs_within_one_batch() {
    let runner = Arc::new(ScriptedRunner::succeeding(Duration::from_millis(20)));
    let scheduler = BatchScheduler::new(
        config(8, 1, 3),
        runner.clone(),
        SchedulerEventBus::default(),
    )
    .expect("config should be valid");
    scheduler
        .queue()
        .push_many((0..8).map(|i| Job::new(format!("/job/{i}"), 0)).collect())
        .await;

    let summary = scheduler.start().await.expect("run should resolve");

    assert_eq!(summary.batches_run, 1);
    assert_eq!(summary.completed, 8);
    assert!(
        runner.high_water() <= 3,
        "observed {} concurrent jobs",
        runner.high_water()
    );
}

#[tokio::test]
async fn job_timeout_is_recorded_as_a_job_failure() {
    let runner = Arc::new(ScriptedRunner::succeeding(Duration::from_millis(500)));
    let mut cfg = config(2, 1, 2);
    cfg.per_job_timeout_ms = 40;
    let scheduler = BatchScheduler::new(cfg, runner, SchedulerEventBus::default())
        .expect("config should be valid");
    scheduler.queue().push_many(jobs(&["/slow-a", "/slow-b"])).await;

    let summary = scheduler.start().await.expect("run should resolve");

    assert_eq!(summary.completed, 0);
    assert_eq!(summary.failed, 2);
    for result in summary.results.values() {
        let reason = result.failure_reason.as_deref().unwrap_or_default();
        assert!(reason.contains("timed out"), "unexpected reason: {reason}");
    }
}

struct ExplodingBatchRunner;

#[async_trait]
impl BatchRunner for ExplodingBatchRunner {
    async fn run_batch(
        &self,
        _jobs: &[Job],
        _options: &BatchRunOptions,
    ) -> anyhow::Result<HashMap<String, JobResult>> {
        Err(anyhow::anyhow!("infrastructure down"))
    }
}

#[tokio::test]
async fn batch_runner_error_marks_every_job_in_the_batch_failed() {
    let scheduler = BatchScheduler::with_batch_runner(
        config(3, 1, 2),
        Arc::new(ExplodingBatchRunner),
        SchedulerEventBus::default(),
    )
    .expect("config should be valid");
    scheduler.queue().push_many(jobs(&["/a", "/b", "/c"])).await;

    let summary = scheduler.start().await.expect("run should resolve");

    assert_eq!(summary.failed, 3);
    assert_eq!(summary.completed, 0);
    for result in summary.results.values() {
        assert!(!result.success);
        let reason = result.failure_reason.as_deref().unwrap_or_default();
        assert!(reason.contains("infrastructure down"));
    }
}

#[tokio::test]
async fn batch_level_failures_are_retried_like_job_failures() {
    let scheduler = BatchScheduler::with_batch_runner(
        {
            let mut cfg = config(1, 1, 1);
            cfg.retry_failed = true;
            cfg.retry_limit = 1;
            cfg
        },
        Arc::new(ExplodingBatchRunner),
        SchedulerEventBus::default(),
    )
    .expect("config should be valid");
    scheduler.queue().push(Job::new("/doomed", 0)).await;

    let summary = scheduler.start().await.expect("run should resolve");

    assert_eq!(summary.retried, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.batches_run, 2);
}

#[tokio::test]
async fn start_is_exclusive_while_a_run_is_in_progress() {
    let runner = Arc::new(ScriptedRunner::succeeding(Duration::from_millis(150)));
    let scheduler = Arc::new(
        BatchScheduler::new(config(1, 1, 1), runner, SchedulerEventBus::default())
            .expect("config should be valid"),
    );
    scheduler.queue().push(Job::new("/long", 0)).await;

    let first = tokio::spawn({
        let scheduler = Arc::clone(&scheduler);
        async move { scheduler.start().await }
    });
    tokio::time::sleep(Duration::from_millis(40)).await;

    assert!(matches!(
        scheduler.start().await,
        Err(SchedulerError::AlreadyRunning)
    ));

    let summary = first
        .await
        .expect("task should join")
        .expect("run should resolve");
    assert_eq!(summary.completed, 1);
}

#[tokio::test]
async fn stop_cancels_active_batches_and_resolves_the_run() {
    let runner = Arc::new(ScriptedRunner::succeeding(Duration::from_millis(400)));
    let scheduler = Arc::new(
        BatchScheduler::new(config(2, 1, 2), runner, SchedulerEventBus::default())
            .expect("config should be valid"),
    );
    scheduler
        .queue()
        .push_many(jobs(&["/a", "/b", "/c", "/d"]))
        .await;

    let handle = tokio::spawn({
        let scheduler = Arc::clone(&scheduler);
        async move { scheduler.start().await }
    });
    tokio::time::sleep(Duration::from_millis(60)).await;
    scheduler.stop().await.expect("stop should succeed mid-run");

    let summary = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("stop should unblock start promptly")
        .expect("task should join")
        .expect("run should resolve");

    assert!(summary.completed + summary.failed < 4);
    assert!(scheduler.active_batches().await.is_empty());
    assert!(!scheduler.status().await.running);
    assert!(matches!(
        scheduler.stop().await,
        Err(SchedulerError::NotRunning)
    ));
}

#[tokio::test]
async fn stop_without_a_run_reports_not_running() {
    let runner = Arc::new(ScriptedRunner::succeeding(Duration::from_millis(1)));
    let scheduler = BatchScheduler::new(config(1, 1, 1), runner, SchedulerEventBus::default())
        .expect("config should be valid");

    assert!(matches!(
        scheduler.stop().await,
        Err(SchedulerError::NotRunning)
    ));
}

#[tokio::test]
async fn empty_queue_run_resolves_immediately() {
    let runner = Arc::new(ScriptedRunner::succeeding(Duration::from_millis(1)));
    let scheduler = BatchScheduler::new(config(4, 2, 2), runner, SchedulerEventBus::default())
        .expect("config should be valid");

    let summary = scheduler.start().await.expect("run should resolve");

    assert_eq!(summary.total_jobs, 0);
    assert_eq!(summary.batches_run, 0);
    assert!(summary.results.is_empty());
}

#[tokio::test]
async fn terminal_counts_reconcile_with_the_initial_total() {
    let runner = Arc::new(ScriptedRunner::failing(
        Duration::from_millis(2),
        &["/p3", "/p7"],
    ));
    let mut cfg = config(3, 2, 2);
    cfg.retry_failed = true;
    cfg.retry_limit = 2;
    let scheduler = BatchScheduler::new(cfg, runner, SchedulerEventBus::default())
        .expect("config should be valid");
    scheduler
        .queue()
        .push_many((0..10).map(|i| Job::new(format!("/p{i}"), i)).collect())
        .await;

    let summary = scheduler.start().await.expect("run should resolve");

    // Terminal outcomes only: every job settles exactly once against the
    // initial total, retries included.
    assert_eq!(summary.completed + summary.failed, summary.total_jobs);
    assert_eq!(summary.completed, 8);
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.retried, 4);
    assert!(scheduler.queue().is_empty().await);
}

#[tokio::test]
async fn invalid_construction_config_is_rejected() {
    let runner: Arc<dyn JobRunner> = Arc::new(ScriptedRunner::succeeding(Duration::from_millis(1)));
    let result = BatchScheduler::new(config(0, 1, 1), runner, SchedulerEventBus::default());
    assert!(matches!(result, Err(SchedulerError::InvalidConfig(_))));
}
