//! Relay constants.

use alloy::primitives::{U256, uint};
use std::time::Duration;

/// Percentage applied to gas estimates of relayed transactions.
pub const GAS_ESTIMATE_MULTIPLIER_PERCENT: u64 = 120;

/// Default upper bound for the gas limit of a relayed transaction.
pub const DEFAULT_MAX_GAS_LIMIT: u64 = 3_000_000;

/// Gas limit used for plain value transfers from the funding wallet.
pub const TRANSFER_GAS_LIMIT: u64 = 21_000;

/// Amount a relayer must hold on top of the gas cost and value of a transaction (0.002 ETH).
pub const RELAYER_SAFETY_BUFFER: U256 = uint!(2_000_000_000_000_000_U256);

/// Amount the funding wallet keeps for the gas of its own transfers (0.0005 ETH).
pub const FUNDING_GAS_BUFFER: U256 = uint!(500_000_000_000_000_U256);

/// Number of attempts the relayer makes for a single send.
pub const DEFAULT_MAX_SEND_ATTEMPTS: u32 = 3;

/// Base delay of the exponential send backoff.
pub const BACKOFF_BASE: Duration = Duration::from_millis(400);

/// Upper bound of the exponential part of the send backoff.
pub const BACKOFF_CAP: Duration = Duration::from_millis(6_000);

/// Upper bound of the random jitter added to each backoff.
pub const BACKOFF_JITTER: Duration = Duration::from_millis(300);

/// How long a synchronous top-up requested by the funding policy may take.
pub const DEFAULT_POLICY_TOPUP_TIMEOUT: Duration = Duration::from_secs(12);

/// How long we wait for a funding transfer to be included.
pub const DEFAULT_RECEIPT_TIMEOUT: Duration = Duration::from_secs(60);

/// Interval between receipt polls.
pub const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Interval of the relayer balance monitor.
pub const DEFAULT_BALANCE_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Interval between execution queue ticks.
pub const QUEUE_TICK_INTERVAL: Duration = Duration::from_secs(3);

/// Maximum duration of a single queued execution.
pub const QUEUE_EXECUTION_TIMEOUT: Duration = Duration::from_secs(75);

/// Default time an item may wait in the execution queue.
pub const DEFAULT_MAX_QUEUE_TIME: Duration = Duration::from_secs(120);

/// How long terminal queue items are kept around for polling.
pub const QUEUE_RETENTION: Duration = Duration::from_secs(10 * 60);

/// How long a broadcast top-up without a receipt blocks further top-ups.
pub const PENDING_TOPUP_TTL: Duration = Duration::from_secs(10 * 60);
