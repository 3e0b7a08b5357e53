use crate::chains::SettlementChain;
use alloy::primitives::{Address, Bytes, U256};
use chrono::{DateTime, Utc};
use futures_util::{FutureExt, future::BoxFuture};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{fmt, future::Future, sync::Arc, time::Duration};
use tokio::time::Instant;

/// Deadline of items whose lifetime does not fit an [`Instant`].
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// A deferred relayed execution. Called once per attempt.
pub type DeferredExecution =
    Arc<dyn Fn() -> BoxFuture<'static, eyre::Result<Value>> + Send + Sync>;

/// Wraps an async closure into a [`DeferredExecution`].
pub fn deferred<F, Fut>(run: F) -> DeferredExecution
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = eyre::Result<Value>> + Send + 'static,
{
    Arc::new(move || run().boxed())
}

/// A transaction the user can sign and send themselves if relayed execution does not happen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletFallbackTx {
    /// Chain id of the transaction.
    pub chain_id: u64,
    /// Target of the call.
    pub to: Address,
    /// Calldata.
    pub data: Bytes,
    /// Value sent along.
    pub value: U256,
}

/// State of a [`QueueItem`].
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, strum::Display, strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum QueueState {
    /// Waiting for relayer capacity.
    #[default]
    Queued,
    /// Running.
    Executing,
    /// Ran successfully.
    Completed,
    /// Ran and failed with a non-retryable error.
    Failed,
    /// Did not run before its deadline.
    Expired,
}

impl QueueState {
    /// Whether the item will not change anymore.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Expired)
    }
}

/// A request to queue a relayed execution.
#[derive(Clone)]
pub struct EnqueueRequest {
    /// Idempotency key.
    pub key: String,
    /// Correlation id of the originating request.
    pub correlation_id: String,
    /// Id of the originating request.
    pub request_id: String,
    /// The chain the execution relays on.
    pub chain: SettlementChain,
    /// The execution.
    pub run: DeferredExecution,
    /// Transaction the user can sign instead.
    pub wallet_fallback_tx: Option<WalletFallbackTx>,
    /// How long the item may wait. Defaults to the queue's default.
    pub max_queue: Option<Duration>,
}

impl EnqueueRequest {
    /// Creates a request without wallet fallback and with the default lifetime.
    pub fn new(
        key: impl Into<String>,
        correlation_id: impl Into<String>,
        request_id: impl Into<String>,
        chain: SettlementChain,
        run: DeferredExecution,
    ) -> Self {
        Self {
            key: key.into(),
            correlation_id: correlation_id.into(),
            request_id: request_id.into(),
            chain,
            run,
            wallet_fallback_tx: None,
            max_queue: None,
        }
    }

    /// Sets the wallet fallback transaction.
    pub fn with_wallet_fallback(mut self, tx: WalletFallbackTx) -> Self {
        self.wallet_fallback_tx = Some(tx);
        self
    }

    /// Sets the lifetime of the item.
    pub fn with_max_queue(mut self, max_queue: Duration) -> Self {
        self.max_queue = Some(max_queue);
        self
    }
}

impl fmt::Debug for EnqueueRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnqueueRequest")
            .field("key", &self.key)
            .field("correlation_id", &self.correlation_id)
            .field("request_id", &self.request_id)
            .field("chain", &self.chain)
            .field("wallet_fallback_tx", &self.wallet_fallback_tx)
            .field("max_queue", &self.max_queue)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
struct Progress {
    state: QueueState,
    attempts: u32,
    last_error: Option<String>,
    result: Option<Value>,
    finished_at: Option<Instant>,
}

/// A queued relayed execution.
pub struct QueueItem {
    /// Idempotency key.
    pub key: String,
    /// Correlation id of the originating request.
    pub correlation_id: String,
    /// Id of the originating request.
    pub request_id: String,
    /// The chain the execution relays on.
    pub chain: SettlementChain,
    /// When the item was queued.
    pub created_at: DateTime<Utc>,
    /// When the item expires if it has not completed.
    pub expires_at: DateTime<Utc>,
    deadline: Instant,
    wallet_fallback_tx: Option<WalletFallbackTx>,
    run: DeferredExecution,
    progress: Mutex<Progress>,
}

impl QueueItem {
    pub(super) fn new(request: EnqueueRequest, default_max_queue: Duration) -> Self {
        let max_queue = request.max_queue.unwrap_or(default_max_queue);
        let created_at = Utc::now();
        let now = Instant::now();
        Self {
            key: request.key,
            correlation_id: request.correlation_id,
            request_id: request.request_id,
            chain: request.chain,
            created_at,
            expires_at: chrono::Duration::from_std(max_queue)
                .ok()
                .and_then(|ttl| created_at.checked_add_signed(ttl))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            deadline: now.checked_add(max_queue).unwrap_or_else(|| now + FAR_FUTURE),
            wallet_fallback_tx: request.wallet_fallback_tx,
            run: request.run,
            progress: Default::default(),
        }
    }

    /// Current state.
    pub fn state(&self) -> QueueState {
        self.progress.lock().state
    }

    /// Number of started executions.
    pub fn attempts(&self) -> u32 {
        self.progress.lock().attempts
    }

    /// Error of the last failed execution.
    pub fn last_error(&self) -> Option<String> {
        self.progress.lock().last_error.clone()
    }

    /// Result of the completed execution.
    pub fn result(&self) -> Option<Value> {
        self.progress.lock().result.clone()
    }

    /// Transaction the user can sign instead.
    pub fn wallet_fallback_tx(&self) -> Option<&WalletFallbackTx> {
        self.wallet_fallback_tx.as_ref()
    }

    /// Whether the item will not change anymore.
    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    pub(super) fn run(&self) -> BoxFuture<'static, eyre::Result<Value>> {
        (self.run)()
    }

    /// Marks the item expired if it is not terminal and past its deadline.
    ///
    /// Returns whether the item expired.
    pub(super) fn expire_if_overdue(&self, now: Instant) -> bool {
        let mut progress = self.progress.lock();
        if progress.state.is_terminal() || now < self.deadline {
            return false;
        }
        progress.state = QueueState::Expired;
        progress.finished_at = Some(now);
        true
    }

    /// Moves a queued item to executing. Returns `false` if the item is not queued.
    pub(super) fn begin_attempt(&self) -> bool {
        let mut progress = self.progress.lock();
        if progress.state != QueueState::Queued {
            return false;
        }
        progress.state = QueueState::Executing;
        progress.attempts += 1;
        true
    }

    /// Records a successful execution. Returns `false` if the item expired meanwhile.
    pub(super) fn complete(&self, result: Value) -> bool {
        let mut progress = self.progress.lock();
        if progress.state != QueueState::Executing {
            return false;
        }
        progress.state = QueueState::Completed;
        progress.result = Some(result);
        progress.finished_at = Some(Instant::now());
        true
    }

    /// Records a retryable failure. Returns `false` if the item expired meanwhile.
    pub(super) fn requeue(&self, error: String) -> bool {
        let mut progress = self.progress.lock();
        progress.last_error = Some(error);
        if progress.state != QueueState::Executing {
            return false;
        }
        progress.state = QueueState::Queued;
        true
    }

    /// Records a final failure. Returns `false` if the item expired meanwhile.
    pub(super) fn fail(&self, error: String) -> bool {
        let mut progress = self.progress.lock();
        progress.last_error = Some(error);
        if progress.state != QueueState::Executing {
            return false;
        }
        progress.state = QueueState::Failed;
        progress.finished_at = Some(Instant::now());
        true
    }

    /// Whether the item is terminal for longer than `retention`.
    pub(super) fn is_evictable(&self, now: Instant, retention: Duration) -> bool {
        self.progress
            .lock()
            .finished_at
            .is_some_and(|finished_at| now.saturating_duration_since(finished_at) >= retention)
    }
}

impl fmt::Debug for QueueItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueItem")
            .field("key", &self.key)
            .field("chain", &self.chain)
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .field("progress", &self.progress)
            .finish_non_exhaustive()
    }
}
