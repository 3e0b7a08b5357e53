use super::QueueState;
use metrics::{Counter, Gauge, Histogram};
use metrics_derive::Metrics;

/// Metrics for an [`ExecutionQueue`](super::ExecutionQueue).
#[derive(Metrics)]
#[metrics(scope = "queue")]
pub struct QueueMetrics {
    /// Number of admitted items.
    pub enqueued: Counter,
    /// Number of enqueue calls answered with an existing item.
    pub deduplicated: Counter,
    /// Number of started executions.
    pub attempts: Counter,
    /// Number of completed items.
    pub completed: Counter,
    /// Number of failed items.
    pub failed: Counter,
    /// Number of expired items.
    pub expired: Counter,
    /// Number of executions put back into the queue.
    pub requeued: Counter,
    /// Number of ticks that found no relayer capacity for an item.
    pub deferred: Counter,
    /// Duration of executions in milliseconds.
    pub execution_duration: Histogram,
    /// Items waiting for execution.
    pub queued: Gauge,
    /// Items being executed.
    pub executing: Gauge,
    /// Terminal items not yet evicted.
    pub retained: Gauge,
}

impl QueueMetrics {
    pub(super) fn record_expired(&self, count: usize) {
        self.expired.increment(count as u64);
    }

    pub(super) fn set_gauges(&self, snapshot: &super::QueueSnapshot) {
        self.queued.set(snapshot.count(QueueState::Queued) as f64);
        self.executing.set(snapshot.count(QueueState::Executing) as f64);
        self.retained.set(
            (snapshot.count(QueueState::Completed)
                + snapshot.count(QueueState::Failed)
                + snapshot.count(QueueState::Expired)) as f64,
        );
    }
}
