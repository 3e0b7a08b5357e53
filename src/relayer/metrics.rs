use metrics::{Counter, Histogram};
use metrics_derive::Metrics;

/// Metrics for a [`Relayer`](super::Relayer).
#[derive(Metrics)]
#[metrics(scope = "relayer")]
pub struct RelayerMetrics {
    /// Number of broadcast relayed transactions.
    pub sent: Counter,
    /// Number of relayed sends that failed for good.
    pub failed: Counter,
    /// Number of retried send attempts.
    pub retries: Counter,
    /// Number of sends that went ahead without the cross-instance lock.
    pub lock_fail_open: Counter,
    /// Time spent waiting for the send locks, in milliseconds.
    pub lock_wait: Histogram,
}
