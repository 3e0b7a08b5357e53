//! Relay error types.
use alloy::{
    primitives::U256,
    transports::{RpcError, TransportErrorKind},
};
use alloy_chains::Chain;
use thiserror::Error;

mod bucket;
pub use bucket::{FailureBucket, classify};

mod lock;
pub use lock::LockStoreError;

/// A failure of a relay operation, tagged with the [`FailureBucket`] it falls into.
///
/// The bucket decides whether the relayer and the execution queue retry the operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RelayError {
    /// Classification of the failure.
    pub bucket: FailureBucket,
    /// Human readable description of the failure.
    pub message: String,
}

impl RelayError {
    /// Creates a new error in the given bucket.
    pub fn new(bucket: FailureBucket, message: impl Into<String>) -> Self {
        Self { bucket, message: message.into() }
    }

    /// Creates a new error, classifying it by its message.
    pub fn classified(message: impl Into<String>) -> Self {
        let message = message.into();
        Self { bucket: classify(&message), message }
    }

    /// The relayer does not hold enough to cover gas, value and the safety buffer.
    pub fn low_balance(required: U256, balance: U256) -> Self {
        Self::new(
            FailureBucket::RelayerLowBalance,
            format!(
                "relayer balance too low: required {required}, have {balance}, missing {}",
                required.saturating_sub(balance)
            ),
        )
    }

    /// A top-up of the relayer was attempted and did not succeed.
    pub fn topup_failed(reason: impl std::fmt::Display) -> Self {
        Self::new(FailureBucket::RelayerTopupFailed, format!("relayer top-up failed: {reason}"))
    }

    /// The chain has no relay services configured.
    pub fn unsupported_chain(chain: Chain) -> Self {
        Self::new(FailureBucket::Unknown, format!("unsupported chain {chain}"))
    }

    /// Whether the error is worth retrying at all.
    pub fn is_transient(&self) -> bool {
        self.bucket.is_transient()
    }
}

impl From<RpcError<TransportErrorKind>> for RelayError {
    fn from(err: RpcError<TransportErrorKind>) -> Self {
        Self::classified(err.to_string())
    }
}
