use serde::{Deserialize, Serialize};

/// Coarse classification of relay failures.
///
/// Drives retry decisions of the relayer and the execution queue, and is attached to every failed
/// relayed send for observability.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::IntoStaticStr,
    strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureBucket {
    /// The relayer cannot cover gas, value and the safety buffer.
    RelayerLowBalance,
    /// Topping up the relayer failed.
    RelayerTopupFailed,
    /// The nonce was already used or the transaction is already known.
    NonceCollision,
    /// The RPC endpoint throttled us.
    RpcRateLimit,
    /// The transaction reverted.
    ExecutionRevert,
    /// Anything else.
    Unknown,
}

/// Substrings matched against lowercased error messages, in priority order.
///
/// Reverts are checked before balance errors so that a revert reason mentioning a balance does not
/// turn into a retry.
const CLASSIFICATION_TABLE: &[(FailureBucket, &[&str])] = &[
    (
        FailureBucket::RelayerTopupFailed,
        &["top-up failed", "topup failed", "top up failed", "funding wallet"],
    ),
    (FailureBucket::ExecutionRevert, &["execution reverted", "revert"]),
    (
        FailureBucket::RelayerLowBalance,
        &["insufficient funds", "insufficient balance", "balance too low", "low balance"],
    ),
    (
        FailureBucket::NonceCollision,
        &[
            "nonce too low",
            "nonce too high",
            "replacement transaction underpriced",
            "already known",
            "nonce has already been used",
            "invalid nonce",
        ],
    ),
    (FailureBucket::RpcRateLimit, &["rate limit", "rate-limit", "too many requests", "429"]),
];

/// Classifies an error message into a [`FailureBucket`].
pub fn classify(message: &str) -> FailureBucket {
    let message = message.to_lowercase();
    CLASSIFICATION_TABLE
        .iter()
        .find(|(_, needles)| needles.iter().any(|needle| message.contains(needle)))
        .map(|(bucket, _)| *bucket)
        .unwrap_or(FailureBucket::Unknown)
}

impl FailureBucket {
    /// Whether failures in this bucket may go away on their own.
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RelayerLowBalance
                | Self::RelayerTopupFailed
                | Self::NonceCollision
                | Self::RpcRateLimit
        )
    }

    /// Whether the failure is caused by the relayer running out of funds.
    pub const fn is_balance_related(&self) -> bool {
        matches!(self, Self::RelayerLowBalance | Self::RelayerTopupFailed)
    }

    /// Whether the relayer should make another attempt after `attempt` attempts out of
    /// `max_attempts` failed with this bucket.
    pub const fn should_retry(&self, attempt: u32, max_attempts: u32) -> bool {
        self.is_transient() && attempt < max_attempts
    }
}
