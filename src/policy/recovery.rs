use chrono::{DateTime, Utc};
use metrics::counter;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;

/// How an execution was eventually paid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display, strum::IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FundingRecoveryMode {
    /// The relayer paid.
    Relayed,
    /// The user paid from their own wallet.
    UserPaysGas,
    /// The user received a gas drip.
    SponsorGasDrip,
}

/// A recorded [`FundingRecoveryMode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryRecord {
    /// The mode.
    pub mode: FundingRecoveryMode,
    /// When it was recorded.
    pub at: DateTime<Utc>,
}

/// Remembers the last funding recovery mode across all chains.
#[derive(Debug, Clone, Default)]
pub struct RecoveryTracker {
    last: Arc<RwLock<Option<RecoveryRecord>>>,
}

impl RecoveryTracker {
    /// Records `mode` as the most recent recovery mode.
    pub fn record(&self, mode: FundingRecoveryMode) {
        counter!("funding.recovery", "mode" => <&'static str>::from(mode)).increment(1);
        *self.last.write() = Some(RecoveryRecord { mode, at: Utc::now() });
    }

    /// Returns the most recent recovery mode.
    pub fn last(&self) -> Option<RecoveryRecord> {
        *self.last.read()
    }
}
