//! Lifecycle event bus for the Conveyor scheduler
//!
//! Provides a pub/sub event system backed by tokio's broadcast channel.
//! The scheduler publishes batch/queue lifecycle events here; monitoring
//! and UI layers subscribe without coupling to scheduler internals.
//!
//! There is deliberately no global bus: a [`SchedulerEventBus`] instance is
//! created by the embedder and handed to the scheduler at construction, so
//! tests and multiple schedulers each get their own isolated stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

/// One scheduler lifecycle notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerEvent {
    /// Unique event identifier.
    pub id: String,
    /// Emitting component (e.g. "scheduler", "batch-runner").
    pub source: String,
    /// Event topic, one of the constants in [`topics`].
    pub topic: String,
    /// Flexible JSON payload.
    pub payload: Value,
    /// Emission timestamp.
    pub timestamp: DateTime<Utc>,
}

impl SchedulerEvent {
    /// Create a new event.
    pub fn new(source: impl Into<String>, topic: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source: source.into(),
            topic: topic.into(),
            payload,
            timestamp: Utc::now(),
        }
    }
}

impl std::fmt::Display for SchedulerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {} -> {}: {}",
            self.timestamp.format("%H:%M:%S"),
            self.source,
            self.topic,
            self.payload
        )
    }
}

/// Async event bus for scheduler lifecycle notifications.
///
/// Uses `tokio::sync::broadcast` for:
/// - Thread-safe 1-to-many fan-out
/// - Non-blocking publish
/// - Automatic cleanup on receiver drop
#[derive(Debug, Clone)]
pub struct SchedulerEventBus {
    tx: broadcast::Sender<SchedulerEvent>,
    capacity: usize,
}

impl SchedulerEventBus {
    /// Create a new event bus with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// The bus capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Publish an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event; 0 when
    /// nobody is listening (not an error).
    pub fn publish(&self, event: SchedulerEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Build and publish an event in one call.
    pub fn emit(&self, source: &str, topic: &str, payload: Value) -> usize {
        self.publish(SchedulerEvent::new(source, topic, payload))
    }

    /// Subscribe to all future events. Dropping the receiver unsubscribes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.tx.subscribe()
    }

    /// Current subscriber count.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for SchedulerEventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Event topic constants for type-safe routing.
pub mod topics {
    /// A run started: total job count, batch size, concurrency, strategy.
    pub const BATCH_STARTED: &str = "batch.started";
    /// A batch was formed from the queue: batch id, job count, job paths.
    pub const BATCH_QUEUED: &str = "batch.queued";
    /// A batch began executing: batch id.
    pub const BATCH_PROCESSING: &str = "batch.processing";
    /// A batch settled: batch id, status, duration, results.
    pub const BATCH_COMPLETED: &str = "batch.completed";
    /// A batch was cancelled by `stop()`: batch id, job paths.
    pub const BATCH_CANCELLED: &str = "batch.cancelled";
    /// Failed jobs were re-enqueued: count and paths.
    pub const BATCH_RETRY: &str = "batch.retry";
    /// The whole run drained: totals, duration, average ms per job.
    pub const BATCH_ALL_COMPLETED: &str = "batch.allCompleted";
    /// Progress counters after a batch settled.
    pub const QUEUE_PROGRESS: &str = "queue.progress";
    /// One job finished (only with progressive results enabled).
    pub const JOB_COMPLETED: &str = "job.completed";
}

/// Event source constants.
pub mod sources {
    /// The batch scheduler coordinator.
    pub const SCHEDULER: &str = "scheduler";
    /// The per-batch bounded runner.
    pub const BATCH_RUNNER: &str = "batch-runner";
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_creation() {
        let event = SchedulerEvent::new(sources::SCHEDULER, topics::BATCH_QUEUED, json!({"n": 4}));
        assert_eq!(event.source, "scheduler");
        assert_eq!(event.topic, "batch.queued");
        assert!(!event.id.is_empty());
        assert!(event.timestamp <= Utc::now());
    }

    #[test]
    fn test_publish_without_subscribers_is_not_an_error() {
        let bus = SchedulerEventBus::new(8);
        let delivered = bus.emit(sources::SCHEDULER, topics::BATCH_PROCESSING, json!({}));
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn test_event_bus_publish() {
        let bus = SchedulerEventBus::new(10);
        let mut rx = bus.subscribe();

        bus.publish(SchedulerEvent::new(
            sources::BATCH_RUNNER,
            topics::JOB_COMPLETED,
            json!({"path": "/a"}),
        ));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.topic, topics::JOB_COMPLETED);
        assert_eq!(received.payload["path"], "/a");
    }

    #[tokio::test]
    async fn test_multiple_subscribers_each_receive() {
        let bus = SchedulerEventBus::new(10);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.emit(sources::SCHEDULER, topics::QUEUE_PROGRESS, json!({"p": 50}));

        assert_eq!(rx1.recv().await.unwrap().payload["p"], 50);
        assert_eq!(rx2.recv().await.unwrap().payload["p"], 50);
    }

    #[tokio::test]
    async fn test_subscriber_count() {
        let bus = SchedulerEventBus::new(10);
        assert_eq!(bus.subscriber_count(), 0);

        let _rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
    }
}
