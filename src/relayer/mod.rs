//! Relayed transaction sending.
//!
//! A [`Relayer`] owns the relaying identity of a chain. Sends of one identity are serialized by a
//! process-local lock from [`SendLocks`] and, if configured, a cross-instance advisory lock, so a
//! nonce is read and used by one send at a time.
//!
//! Each attempt checks that the relayer can afford the transaction, topping it up synchronously if
//! it cannot. Failures are classified into [`FailureBucket`]s and transient ones are retried with
//! exponential backoff.

mod backoff;
pub use backoff::{backoff_delay, bounded_gas_limit};

mod locks;
pub use locks::SendLocks;

mod metrics;
pub use metrics::RelayerMetrics;

use crate::{
    config::RelayerConfig,
    error::{FailureBucket, RelayError},
    funding::{FundingService, TopUpRequest},
    lock::{BestEffortLock, LockOutcome},
    provider::ChainClient,
    signers::DynSigner,
};
use ::metrics::counter;
use alloy::{
    network::TransactionBuilder,
    primitives::{Address, B256, Bytes, U256},
    rpc::types::TransactionRequest,
};
use alloy_chains::Chain;
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

/// A transaction to relay.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayRequest {
    /// Target of the call.
    pub to: Address,
    /// Calldata.
    #[serde(default)]
    pub data: Bytes,
    /// Value sent along.
    #[serde(default)]
    pub value: U256,
}

impl RelayRequest {
    /// A call to `to` with `data`.
    pub fn new(to: Address, data: impl Into<Bytes>) -> Self {
        Self { to, data: data.into(), value: U256::ZERO }
    }

    /// Sets the value.
    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }
}

/// Sends transactions from a chain's relaying identity.
#[derive(Debug, Clone)]
pub struct Relayer {
    chain: Chain,
    client: Arc<dyn ChainClient>,
    signer: DynSigner,
    funding: FundingService,
    send_lock: Arc<Mutex<()>>,
    advisory_lock: BestEffortLock,
    config: RelayerConfig,
    max_gas_limit: u64,
    metrics: Arc<RelayerMetrics>,
}

impl Relayer {
    /// Creates a relayer for `signer` on `chain`.
    ///
    /// The send lock is taken from `send_locks`, so relayers of the same identity share it.
    #[expect(clippy::too_many_arguments)]
    pub fn new(
        chain: Chain,
        client: Arc<dyn ChainClient>,
        signer: DynSigner,
        funding: FundingService,
        send_locks: &SendLocks,
        advisory_lock: BestEffortLock,
        config: RelayerConfig,
        max_gas_limit: u64,
    ) -> Self {
        let send_lock = send_locks.get(chain, signer.address());
        Self {
            chain,
            client,
            signer,
            funding,
            send_lock,
            advisory_lock,
            config,
            max_gas_limit,
            metrics: Arc::new(RelayerMetrics::new_with_labels(&[("chain", chain.to_string())])),
        }
    }

    /// The chain of the relayer.
    pub fn chain(&self) -> Chain {
        self.chain
    }

    /// Address of the relaying identity.
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Name of the advisory lock of this identity.
    fn lock_name(&self) -> String {
        format!("relayer:{}:{}", self.chain.id(), self.address())
    }

    /// Sends `request`, retrying transient failures.
    #[instrument(skip_all, fields(chain = %self.chain, to = %request.to))]
    pub async fn send(&self, request: RelayRequest) -> Result<B256, RelayError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let err = match self.send_once(&request).await {
                Ok(tx_hash) => {
                    self.metrics.sent.increment(1);
                    info!(%tx_hash, attempt, "Sent relayed transaction");
                    return Ok(tx_hash);
                }
                Err(err) => err,
            };

            if !err.bucket.should_retry(attempt, max_attempts) {
                self.metrics.failed.increment(1);
                counter!(
                    "relayer.failures",
                    "chain" => self.chain.to_string(),
                    "bucket" => <&'static str>::from(err.bucket)
                )
                .increment(1);
                error!(bucket = %err.bucket, attempt, %err, "Relayed transaction failed");
                return Err(err);
            }

            self.metrics.retries.increment(1);
            if err.bucket.is_balance_related() {
                self.funding.nudge("relayer_low_balance_retry");
            }

            let delay = backoff_delay(
                attempt - 1,
                self.config.backoff_base,
                self.config.backoff_cap,
                self.config.backoff_jitter,
            );
            warn!(bucket = %err.bucket, attempt, ?delay, %err, "Retrying relayed transaction");
            tokio::time::sleep(delay).await;
        }
    }

    /// Makes a single attempt while holding the send locks.
    async fn send_once(&self, request: &RelayRequest) -> Result<B256, RelayError> {
        let wait = Instant::now();
        let _local = self.send_lock.lock().await;
        let lease = match self.advisory_lock.try_acquire(&self.lock_name()).await {
            LockOutcome::Acquired(lease) => Some(lease),
            LockOutcome::Unavailable(err) => {
                self.metrics.lock_fail_open.increment(1);
                warn!(%err, "Advisory lock unavailable, sending with the local lock only");
                None
            }
            LockOutcome::Disabled => None,
        };
        self.metrics.lock_wait.record(wait.elapsed().as_millis() as f64);

        let result = self.decide_and_send(request).await;

        if let Some(lease) = lease {
            BestEffortLock::release(lease).await;
        }
        result
    }

    async fn decide_and_send(&self, request: &RelayRequest) -> Result<B256, RelayError> {
        self.funding.nudge("relayer_preventive");

        let from = self.address();
        let call = TransactionRequest::default()
            .with_from(from)
            .with_to(request.to)
            .with_input(request.data.clone())
            .with_value(request.value);

        let estimate = self.client.estimate_gas(call.clone()).await?;
        let gas_limit =
            bounded_gas_limit(estimate, self.config.gas_multiplier_percent, self.max_gas_limit);

        let (balance, gas_price) =
            tokio::try_join!(self.client.get_balance(from), self.client.get_gas_price())?;
        let required = U256::from(gas_limit)
            .saturating_mul(U256::from(gas_price))
            .saturating_add(request.value)
            .saturating_add(self.config.safety_buffer);

        if balance < required {
            debug!(%balance, %required, "Relayer cannot afford transaction, topping up");
            let outcome =
                self.funding.top_up(TopUpRequest::sync("relayer_insufficient_balance")).await;
            let balance = self.client.get_balance(from).await?;
            if balance < required {
                return Err(match outcome.error() {
                    Some(err) => RelayError::new(
                        FailureBucket::RelayerTopupFailed,
                        format!("{err}; missing {}", required - balance),
                    ),
                    None => RelayError::low_balance(required, balance),
                });
            }
        }

        let nonce = self.client.get_transaction_count(from).await?;
        let tx = call
            .with_nonce(nonce)
            .with_gas_limit(gas_limit)
            .with_gas_price(gas_price)
            .with_chain_id(self.chain.id());

        debug!(nonce, gas_limit, gas_price, "Broadcasting relayed transaction");
        Ok(self.client.send_transaction(&self.signer, tx).await?)
    }
}
