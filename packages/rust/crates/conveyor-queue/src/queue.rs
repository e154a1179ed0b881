//! Shared job queue with per-call order materialization.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{QueueError, Result};
use crate::job::{Job, JobMetadataPatch};
use crate::strategy::Strategy;

/// A job registered in the queue, with the bookkeeping the ordering
/// strategies need.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    /// Opaque generated id, used for targeted removal/updates.
    pub id: String,
    /// Monotonic position assigned at push time; the stable tie-break.
    pub insertion_index: u64,
    /// The job itself.
    pub job: Job,
    enqueued_at: Instant,
}

impl QueueEntry {
    fn new(job: Job, insertion_index: u64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            insertion_index,
            job,
            enqueued_at: Instant::now(),
        }
    }

    /// Time since this entry was pushed.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.enqueued_at.elapsed()
    }

    #[cfg(test)]
    pub(crate) fn for_tests(job: Job, insertion_index: u64) -> Self {
        Self::new(job, insertion_index)
    }
}

#[derive(Debug, Default)]
struct QueueInner {
    entries: Vec<QueueEntry>,
    strategy: Strategy,
    next_insertion_index: u64,
}

impl QueueInner {
    /// Entry positions sorted under the active strategy's total order.
    fn ordered_positions(&self) -> Vec<usize> {
        let mut positions: Vec<usize> = (0..self.entries.len()).collect();
        positions.sort_by(|&a, &b| self.strategy.compare(&self.entries[a], &self.entries[b]));
        positions
    }

    fn push(&mut self, job: Job) -> String {
        let entry = QueueEntry::new(job, self.next_insertion_index);
        self.next_insertion_index += 1;
        let id = entry.id.clone();
        self.entries.push(entry);
        id
    }

    /// Remove and return the first `n` entries in strategy order.
    fn take_ordered(&mut self, n: usize) -> Vec<QueueEntry> {
        let selected: Vec<usize> = self.ordered_positions().into_iter().take(n).collect();
        let picked: Vec<QueueEntry> = selected.iter().map(|&i| self.entries[i].clone()).collect();
        let mut doomed = selected;
        doomed.sort_unstable_by(|a, b| b.cmp(a));
        for position in doomed {
            self.entries.remove(position);
        }
        picked
    }

    fn snapshot_ordered(&self, n: usize) -> Vec<QueueEntry> {
        self.ordered_positions()
            .into_iter()
            .take(n)
            .map(|i| self.entries[i].clone())
            .collect()
    }

    fn position_of(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|entry| entry.id == id)
    }
}

/// Ordered multiset of pending jobs, shared between the drain loop and
/// retry re-pushes.
///
/// Cloning is cheap and clones observe the same queue. Every operation
/// takes the internal lock once, so operations are atomic with respect to
/// each other.
#[derive(Debug, Clone, Default)]
pub struct JobQueue {
    inner: Arc<RwLock<QueueInner>>,
}

impl JobQueue {
    /// Create an empty queue using the given strategy.
    #[must_use]
    pub fn new(strategy: Strategy) -> Self {
        Self {
            inner: Arc::new(RwLock::new(QueueInner {
                strategy,
                ..QueueInner::default()
            })),
        }
    }

    /// Push one job; returns the generated entry id.
    pub async fn push(&self, job: Job) -> String {
        self.inner.write().await.push(job)
    }

    /// Push several jobs in order; returns their entry ids.
    pub async fn push_many(&self, jobs: Vec<Job>) -> Vec<String> {
        let mut inner = self.inner.write().await;
        jobs.into_iter().map(|job| inner.push(job)).collect()
    }

    /// Remove and return the next entry under the active strategy.
    pub async fn pop(&self) -> Option<QueueEntry> {
        self.inner.write().await.take_ordered(1).into_iter().next()
    }

    /// Remove and return up to `n` entries under the active strategy.
    pub async fn pop_many(&self, n: usize) -> Vec<QueueEntry> {
        self.inner.write().await.take_ordered(n)
    }

    /// Next entry under the active strategy, without removing it.
    pub async fn peek(&self) -> Option<QueueEntry> {
        self.inner.read().await.snapshot_ordered(1).into_iter().next()
    }

    /// First `n` entries under the active strategy, without removing them.
    pub async fn peek_many(&self, n: usize) -> Vec<QueueEntry> {
        self.inner.read().await.snapshot_ordered(n)
    }

    /// Remove a specific entry; returns its job.
    ///
    /// # Errors
    /// Returns [`QueueError::NotFound`] if `id` is not queued.
    pub async fn remove(&self, id: &str) -> Result<Job> {
        let mut inner = self.inner.write().await;
        let position = inner
            .position_of(id)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
        Ok(inner.entries.remove(position).job)
    }

    /// Replace the priority of a queued entry.
    ///
    /// # Errors
    /// Returns [`QueueError::NotFound`] if `id` is not queued.
    pub async fn update_priority(&self, id: &str, priority: i64) -> Result<()> {
        let mut inner = self.inner.write().await;
        let position = inner
            .position_of(id)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
        inner.entries[position].job.priority = priority;
        Ok(())
    }

    /// Merge a partial metadata update into a queued entry.
    ///
    /// # Errors
    /// Returns [`QueueError::NotFound`] if `id` is not queued.
    pub async fn update_metadata(&self, id: &str, patch: JobMetadataPatch) -> Result<()> {
        let mut inner = self.inner.write().await;
        let position = inner
            .position_of(id)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
        inner.entries[position].job.metadata.apply(patch);
        Ok(())
    }

    /// Number of queued entries.
    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    /// Whether the queue has no entries.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.entries.is_empty()
    }

    /// Drop all entries.
    pub async fn clear(&self) {
        self.inner.write().await.entries.clear();
    }

    /// Ordered snapshot of every entry.
    pub async fn entries(&self) -> Vec<QueueEntry> {
        let inner = self.inner.read().await;
        inner.snapshot_ordered(inner.entries.len())
    }

    /// Ordered snapshot of entries matching `predicate`.
    pub async fn filter<F>(&self, predicate: F) -> Vec<QueueEntry>
    where
        F: Fn(&QueueEntry) -> bool,
    {
        let inner = self.inner.read().await;
        inner
            .snapshot_ordered(inner.entries.len())
            .into_iter()
            .filter(|entry| predicate(entry))
            .collect()
    }

    /// First entry in strategy order matching `predicate`.
    pub async fn find<F>(&self, predicate: F) -> Option<QueueEntry>
    where
        F: Fn(&QueueEntry) -> bool,
    {
        let inner = self.inner.read().await;
        inner
            .snapshot_ordered(inner.entries.len())
            .into_iter()
            .find(|entry| predicate(entry))
    }

    /// Switch the ordering strategy; affects subsequent pops only.
    pub async fn set_strategy(&self, strategy: Strategy) {
        self.inner.write().await.strategy = strategy;
    }

    /// Active ordering strategy.
    pub async fn strategy(&self) -> Strategy {
        self.inner.read().await.strategy
    }

    /// Age of the longest-queued entry, if any.
    pub async fn oldest_entry_age(&self) -> Option<Duration> {
        self.inner
            .read()
            .await
            .entries
            .iter()
            .map(QueueEntry::age)
            .max()
    }
}
