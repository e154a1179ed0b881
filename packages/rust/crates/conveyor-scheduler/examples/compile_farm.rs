//! Example: drive a fleet of fake compiler jobs through the batch scheduler.
//!
//! Queues ten "projects" of varying size, builds them smallest-first with two
//! batches in flight and three jobs per batch, and tails the lifecycle events
//! the scheduler publishes while it drains.
//!
//! Run: `cargo run -p conveyor-scheduler --example compile_farm`

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use conveyor_events::SchedulerEventBus;
use conveyor_queue::{Job, JobMetadata, Strategy};
use conveyor_scheduler::{BatchConfig, BatchScheduler, JobResult, JobRunner};
use rand::Rng;
use serde_json::json;
use tracing_subscriber::EnvFilter;

/// Pretend compiler: build time grows with project size, and roughly one
/// build in eight fails with a diagnostic.
struct FakeCompiler;

#[async_trait]
impl JobRunner for FakeCompiler {
    async fn run_job(&self, job: &Job) -> anyhow::Result<JobResult> {
        let (jitter_ms, fails) = {
            let mut rng = rand::thread_rng();
            (rng.gen_range(10..60), rng.gen_ratio(1, 8))
        };
        let build_ms = job.metadata.size / 4 + jitter_ms;
        tokio::time::sleep(Duration::from_millis(build_ms)).await;

        if fails {
            return Ok(
                JobResult::failed("compiler exited with status 1", build_ms).with_errors(vec![
                    json!({
                        "file": format!("{}/src/lib.rs", job.path),
                        "line": 42,
                        "message": "mismatched types",
                    }),
                ]),
            );
        }
        Ok(JobResult::succeeded(build_ms))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("conveyor_scheduler=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let config = BatchConfig {
        batch_size: 4,
        batch_concurrency: 2,
        job_concurrency: 3,
        strategy: Strategy::Size,
        progressive_results: true,
        retry_failed: true,
        retry_limit: 2,
        per_job_timeout_ms: 2_000,
    };
    let events = SchedulerEventBus::default();
    let scheduler = BatchScheduler::new(config, Arc::new(FakeCompiler), events.clone())?;

    let mut tap = events.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = tap.recv().await {
            println!("{event}");
        }
    });

    let projects: [(&str, u64); 10] = [
        ("crates/parser", 320),
        ("crates/lexer", 80),
        ("crates/codegen", 640),
        ("crates/cli", 120),
        ("crates/runtime", 480),
        ("crates/std-shim", 40),
        ("crates/driver", 200),
        ("crates/diagnostics", 160),
        ("crates/linker", 560),
        ("crates/macros", 90),
    ];
    let jobs = projects
        .iter()
        .map(|&(path, size)| {
            let name = path.rsplit('/').next().unwrap_or(path);
            Job::new(path, 0).with_metadata(JobMetadata::new(size, name))
        })
        .collect();
    scheduler.queue().push_many(jobs).await;

    let summary = scheduler.start().await?;

    // Closing every bus handle ends the tap once it has drained.
    drop(scheduler);
    drop(events);
    let _ = printer.await;

    println!(
        "built {} projects: {} ok, {} failed, {} retries, {}ms total",
        summary.total_jobs, summary.completed, summary.failed, summary.retried, summary.elapsed_ms
    );
    Ok(())
}
