use super::{DripOutcome, TopUpOutcome};
use metrics::{Counter, Gauge};
use metrics_derive::Metrics;

/// Metrics for a [`FundingService`](super::FundingService).
#[derive(Metrics)]
#[metrics(scope = "funding")]
pub struct FundingMetrics {
    /// Number of completed relayer top-ups.
    pub topups: Counter,
    /// Number of relayer top-ups still pending after the receipt timeout.
    pub topups_pending: Counter,
    /// Number of skipped relayer top-ups.
    pub topups_skipped: Counter,
    /// Number of failed relayer top-ups.
    pub topups_failed: Counter,
    /// Number of sponsored gas drips.
    pub drips: Counter,
    /// Number of gas drips still pending after the receipt timeout.
    pub drips_pending: Counter,
    /// Number of denied gas drips.
    pub drips_denied: Counter,
    /// Number of failed gas drips.
    pub drips_failed: Counter,
    /// Relayer balance in ether, as of the last balance check.
    pub relayer_balance: Gauge,
    /// Funding wallet balance in ether, as of the last balance check.
    pub funding_balance: Gauge,
}

impl FundingMetrics {
    pub(super) fn record_topup(&self, outcome: &TopUpOutcome) {
        match outcome {
            TopUpOutcome::ToppedUp { .. } => self.topups.increment(1),
            TopUpOutcome::Pending { .. } => self.topups_pending.increment(1),
            TopUpOutcome::Skipped(_) => self.topups_skipped.increment(1),
            TopUpOutcome::FundingWalletInsufficient { .. } | TopUpOutcome::Failed(_) => {
                self.topups_failed.increment(1)
            }
            TopUpOutcome::Queued => {}
        }
    }

    pub(super) fn record_drip(&self, outcome: &DripOutcome) {
        match outcome {
            DripOutcome::Dripped { .. } => self.drips.increment(1),
            DripOutcome::Pending { .. } => self.drips_pending.increment(1),
            DripOutcome::Denied(_) => self.drips_denied.increment(1),
            DripOutcome::Failed(_) => self.drips_failed.increment(1),
            DripOutcome::Queued => {}
        }
    }
}
