//! Relayed execution queue.
//!
//! Executions that cannot be relayed right away are parked here until a relayer can afford them,
//! or until they expire. Callers poll with [`ExecutionQueue::get_response`], which answers in
//! HTTP terms and hands out a wallet fallback transaction for expired items.

mod item;
pub use item::{
    DeferredExecution, EnqueueRequest, QueueItem, QueueState, WalletFallbackTx, deferred,
};

mod metrics;
pub use metrics::QueueMetrics;

mod response;
pub use response::{QUEUE_TIMEOUT, QueueResponse, WALLET_FALLBACK};

use crate::{
    chains::Chains,
    config::QueueConfig,
    error::{FailureBucket, RelayError, classify},
    policy::{FundingPolicy, FundingPolicyRequest, FundingRecoveryMode},
};
use parking_lot::Mutex;
use serde::Serialize;
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Instant as StdInstant,
};
use strum::IntoEnumIterator;
use tokio::{task::JoinHandle, time::Instant};
use tracing::{debug, error, info, instrument, trace, warn};

/// Failure messages that indicate a lack of relayer capacity rather than a broken execution.
const RETRYABLE_HINTS: &[&str] =
    &["relayer", "insufficient", "gas", "rate limit", "rate-limit", "429", "nonce", "already known"];

/// Counts of queued items per state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueSnapshot {
    counts: HashMap<QueueState, usize>,
}

impl QueueSnapshot {
    /// Number of items in `state`.
    pub fn count(&self, state: QueueState) -> usize {
        self.counts.get(&state).copied().unwrap_or_default()
    }

    /// Number of items.
    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }
}

/// Defers relayed executions until relayer capacity is available.
#[derive(Debug, Clone)]
pub struct ExecutionQueue {
    inner: Arc<QueueInner>,
}

#[derive(Debug)]
struct QueueInner {
    items: Mutex<HashMap<String, Arc<QueueItem>>>,
    processing: AtomicBool,
    policy: FundingPolicy,
    chains: Chains,
    config: QueueConfig,
    wallet_fallback_enabled: bool,
    metrics: QueueMetrics,
}

impl ExecutionQueue {
    /// Creates an empty queue.
    pub fn new(
        policy: FundingPolicy,
        chains: Chains,
        config: QueueConfig,
        wallet_fallback_enabled: bool,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                items: Default::default(),
                processing: AtomicBool::new(false),
                policy,
                chains,
                config,
                wallet_fallback_enabled,
                metrics: QueueMetrics::default(),
            }),
        }
    }

    /// Admits `request`.
    ///
    /// An unfinished item with the same key is returned unchanged. A finished one is replaced.
    pub fn enqueue(&self, request: EnqueueRequest) -> Result<Arc<QueueItem>, RelayError> {
        if !self.inner.chains.contains(request.chain) {
            return Err(RelayError::unsupported_chain(request.chain));
        }

        let mut items = self.inner.items.lock();
        if let Some(existing) = items.get(&request.key) {
            existing.expire_if_overdue(Instant::now());
            if !existing.is_terminal() {
                trace!(key = %request.key, "Relayed execution already queued");
                self.inner.metrics.deduplicated.increment(1);
                return Ok(existing.clone());
            }
        }

        let item = Arc::new(QueueItem::new(request, self.inner.config.default_max_queue));
        debug!(
            key = %item.key,
            chain = %item.chain,
            correlation_id = %item.correlation_id,
            expires_at = %item.expires_at,
            "Queued relayed execution"
        );
        items.insert(item.key.clone(), item.clone());
        self.inner.metrics.enqueued.increment(1);

        Ok(item)
    }

    /// Returns the item queued under `key`.
    pub fn get(&self, key: &str) -> Option<Arc<QueueItem>> {
        self.inner.items.lock().get(key).cloned()
    }

    /// Answers a poll for the item queued under `key`.
    pub fn get_response(&self, key: &str) -> QueueResponse {
        let Some(item) = self.get(key) else {
            return QueueResponse::not_found(key);
        };
        if item.expire_if_overdue(Instant::now()) {
            self.inner.metrics.record_expired(1);
            info!(key, "Relayed execution expired");
        }
        QueueResponse::for_item(&item, self.inner.wallet_fallback_enabled)
    }

    /// Counts items per state.
    pub fn snapshot(&self) -> QueueSnapshot {
        let items = self.inner.items.lock();
        let mut counts: HashMap<QueueState, usize> =
            QueueState::iter().map(|state| (state, 0)).collect();
        for item in items.values() {
            *counts.entry(item.state()).or_default() += 1;
        }
        QueueSnapshot { counts }
    }

    /// Processes the queue once.
    ///
    /// Does nothing if another tick is running.
    #[instrument(skip_all)]
    pub async fn tick(&self) {
        let Some(_guard) = TickGuard::acquire(&self.inner.processing) else {
            trace!("Queue tick already running");
            return;
        };

        let now = Instant::now();
        let mut items: Vec<_> = self.inner.items.lock().values().cloned().collect();
        items.sort_by_key(|item| item.created_at);

        let expired = items.iter().filter(|item| item.expire_if_overdue(now)).count();
        if expired > 0 {
            self.inner.metrics.record_expired(expired);
            info!(expired, "Expired relayed executions");
        }

        for item in items.iter().filter(|item| item.state() == QueueState::Queued) {
            self.process(item).await;
        }

        self.evict();
        self.inner.metrics.set_gauges(&self.snapshot());
    }

    /// Spawns a task ticking the queue at the configured interval.
    pub fn spawn(&self) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(this.inner.config.tick_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                this.tick().await;
            }
        })
    }

    async fn process(&self, item: &Arc<QueueItem>) {
        let request = FundingPolicyRequest::new(item.chain).without_recovery_record();
        let decision = match self.inner.policy.decide(request).await {
            Ok(decision) => decision,
            Err(err) => {
                warn!(key = %item.key, %err, "Failed to decide funding of queued execution");
                return;
            }
        };

        if !decision.mode.is_relayed() {
            trace!(key = %item.key, reason = %decision.reason, "No relayer capacity yet");
            self.inner.metrics.deferred.increment(1);
            self.nudge(item, "queue_waiting_for_capacity");
            return;
        }

        // the decision may have waited on the chain
        if item.expire_if_overdue(Instant::now()) {
            self.inner.metrics.record_expired(1);
            return;
        }
        if !item.begin_attempt() {
            return;
        }
        self.inner.metrics.attempts.increment(1);

        let timeout = self.inner.config.execution_timeout;
        let started = StdInstant::now();
        let result = tokio::time::timeout(timeout, item.run()).await;
        self.inner.metrics.execution_duration.record(started.elapsed().as_millis() as f64);

        match result {
            Ok(Ok(value)) => {
                if item.complete(value) {
                    self.inner.policy.recovery().record(FundingRecoveryMode::Relayed);
                    self.inner.metrics.completed.increment(1);
                    info!(key = %item.key, attempts = item.attempts(), "Relayed execution completed");
                } else {
                    warn!(key = %item.key, "Relayed execution completed after it expired");
                }
            }
            Ok(Err(err)) => {
                let bucket = err
                    .downcast_ref::<RelayError>()
                    .map(|err| err.bucket)
                    .unwrap_or_else(|| classify(&err.to_string()));
                self.handle_failure(item, bucket, format!("{err:#}"));
            }
            Err(_) => self.handle_failure(
                item,
                FailureBucket::Unknown,
                format!("relayed execution timed out after {timeout:?}"),
            ),
        }
    }

    fn handle_failure(&self, item: &Arc<QueueItem>, bucket: FailureBucket, message: String) {
        if is_retryable_failure(bucket, &message) {
            if bucket.is_balance_related() {
                self.nudge(item, "queue_relayer_low_balance");
            }
            if item.requeue(message.clone()) {
                self.inner.metrics.requeued.increment(1);
                warn!(key = %item.key, %bucket, error = %message, "Requeued relayed execution");
            }
        } else if item.fail(message.clone()) {
            self.inner.metrics.failed.increment(1);
            error!(key = %item.key, %bucket, error = %message, "Relayed execution failed");
        }
    }

    fn nudge(&self, item: &QueueItem, reason: &str) {
        if let Some(chain) = self.inner.chains.get(item.chain) {
            chain.funding.nudge(reason);
        }
    }

    fn evict(&self) {
        let now = Instant::now();
        let retention = self.inner.config.retention;
        self.inner.items.lock().retain(|key, item| {
            let keep = !item.is_evictable(now, retention);
            if !keep {
                trace!(%key, state = %item.state(), "Evicted relayed execution");
            }
            keep
        });
    }
}

/// Whether a failed execution should go back into the queue.
///
/// Reverts are never retried, even when their message contains one of the retry hints.
pub fn is_retryable_failure(bucket: FailureBucket, message: &str) -> bool {
    if bucket.is_transient() {
        return true;
    }
    if bucket == FailureBucket::ExecutionRevert {
        return false;
    }
    let message = message.to_lowercase();
    RETRYABLE_HINTS.iter().any(|hint| message.contains(hint))
}

/// Clears the processing flag when a tick ends.
struct TickGuard<'a>(&'a AtomicBool);

impl<'a> TickGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
