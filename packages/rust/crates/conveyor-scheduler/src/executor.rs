//! Bounded concurrent execution with order-preserving results.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::{Result, SchedulerError};

/// Failure that destroyed a task slot before it produced a value.
#[derive(Debug, Error)]
pub enum TaskFailure {
    /// The task panicked; the payload is the join error text.
    #[error("task panicked: {0}")]
    Panicked(String),
    /// The task was aborted before completion.
    #[error("task aborted before completion")]
    Aborted,
}

/// Outcome of one task slot: the task's value, or what destroyed it.
pub type TaskOutcome<T> = std::result::Result<T, TaskFailure>;

/// Run `tasks` with at most `limit` executing concurrently.
///
/// Tasks are launched strictly in input order as permits free up, so
/// throughput is limit-bound rather than batch-bound. The returned vector
/// is index-aligned with the input; one task's panic is captured in its
/// slot and never cancels siblings. Resolves only once every task settled.
///
/// There is no unilateral per-task cancellation here: tasks that should be
/// cancellable must watch a signal shared by the caller.
///
/// # Errors
/// Returns [`SchedulerError::InvalidConfig`] when `limit` is 0.
pub async fn run_bounded<T, Fut>(tasks: Vec<Fut>, limit: usize) -> Result<Vec<TaskOutcome<T>>>
where
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    if limit == 0 {
        return Err(SchedulerError::InvalidConfig(
            "bounded execution limit must be at least 1".to_string(),
        ));
    }

    let total = tasks.len();
    let semaphore = Arc::new(Semaphore::new(limit));
    let mut workers = JoinSet::new();
    let mut slot_of = HashMap::with_capacity(total);

    for (slot, task) in tasks.into_iter().enumerate() {
        // Acquire before spawn: the next task in input order starts the
        // moment a permit frees up.
        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
            break;
        };
        let handle = workers.spawn(async move {
            let _permit = permit;
            task.await
        });
        slot_of.insert(handle.id(), slot);
    }

    let mut outcomes: Vec<Option<TaskOutcome<T>>> = (0..total).map(|_| None).collect();
    while let Some(joined) = workers.join_next_with_id().await {
        match joined {
            Ok((task_id, value)) => {
                if let Some(&slot) = slot_of.get(&task_id) {
                    outcomes[slot] = Some(Ok(value));
                }
            }
            Err(join_error) => {
                tracing::error!("bounded task crashed: {join_error}");
                let failure = if join_error.is_cancelled() {
                    TaskFailure::Aborted
                } else {
                    TaskFailure::Panicked(join_error.to_string())
                };
                if let Some(&slot) = slot_of.get(&join_error.id()) {
                    outcomes[slot] = Some(Err(failure));
                }
            }
        }
    }

    Ok(outcomes
        .into_iter()
        .map(|slot| slot.unwrap_or_else(|| Err(TaskFailure::Aborted)))
        .collect())
}
