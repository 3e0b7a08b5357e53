//! Relayer top-ups and gas drips.
//!
//! Each chain has a [`FundingService`] owning the funding wallet. It refills the relayer up to its
//! target balance and sponsors small amounts of gas to user wallets, both under hourly and daily
//! caps tracked in [`RateLimits`].
//!
//! At most one top-up per chain and one drip per recipient is in flight at a time. Callers that
//! arrive while a transfer is in flight wait for the same outcome. Fire-and-forget requests are
//! handed to a background worker.

mod drip;
pub use drip::{DripDenial, DripEligibility, DripOutcome, DripRequest};

mod limits;
pub use limits::{FundingEvent, FundingUsage, RateLimits};

mod metrics;
pub use metrics::FundingMetrics;

mod status;
pub use status::{FundingCaps, RelayerStatus};

mod topup;
pub use topup::{TopUpOutcome, TopUpRequest, TopUpSkipReason};

mod worker;
pub use worker::FundingMessage;

use crate::{
    config::{ChainConfig, GasDripConfig, RelayerBalanceConfig, TopUpConfig},
    constants::TRANSFER_GAS_LIMIT,
    error::RelayError,
    policy::RecoveryTracker,
    provider::{ChainClient, wait_for_receipt},
    signers::DynSigner,
};
use alloy::{
    network::TransactionBuilder,
    primitives::{Address, B256, U256, utils::format_ether},
    rpc::types::TransactionRequest,
};
use alloy_chains::Chain;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, instrument, trace, warn};

type InflightTopUp = Shared<BoxFuture<'static, TopUpOutcome>>;
type InflightDrip = Shared<BoxFuture<'static, DripOutcome>>;

/// Outcome of the last top-ups.
#[derive(Debug, Clone, Default)]
struct TopUpState {
    last_topup_at: Option<DateTime<Utc>>,
    last_topup_tx: Option<B256>,
    last_error: Option<String>,
    /// A top-up that was broadcast but not seen included yet.
    pending: Option<PendingTopUp>,
}

#[derive(Debug, Clone, Copy)]
struct PendingTopUp {
    tx_hash: B256,
    amount: U256,
    sent_at: Instant,
}

/// Funding of a chain's relayer and user wallets.
#[derive(Debug, Clone)]
pub struct FundingService {
    inner: Arc<FundingInner>,
    messages: mpsc::UnboundedSender<FundingMessage>,
}

pub(crate) struct FundingInner {
    chain: Chain,
    client: Arc<dyn ChainClient>,
    /// Address of the relayer being funded.
    relayer: Address,
    funding_signer: Option<DynSigner>,
    balances: RelayerBalanceConfig,
    topup: TopUpConfig,
    gas_drip: GasDripConfig,
    limits: Mutex<RateLimits>,
    state: Mutex<TopUpState>,
    inflight_topup: Mutex<Option<InflightTopUp>>,
    inflight_drips: DashMap<Address, InflightDrip>,
    /// Serializes transfers of the funding wallet.
    funding_nonce: tokio::sync::Mutex<()>,
    drip_gate: tokio::sync::Mutex<()>,
    recovery: RecoveryTracker,
    metrics: FundingMetrics,
}

impl fmt::Debug for FundingInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FundingInner")
            .field("chain", &self.chain)
            .field("relayer", &self.relayer)
            .field("funding_signer", &self.funding_signer)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl FundingService {
    /// Creates the funding service of `chain` and spawns its worker.
    ///
    /// Top-ups and drips are skipped or denied if `funding_signer` is `None`.
    pub fn new(
        chain: Chain,
        client: Arc<dyn ChainClient>,
        relayer: Address,
        funding_signer: Option<DynSigner>,
        config: &ChainConfig,
        recovery: RecoveryTracker,
    ) -> Self {
        let inner = Arc::new(FundingInner {
            chain,
            client,
            relayer,
            funding_signer,
            balances: config.relayer.clone(),
            topup: config.topup.clone(),
            gas_drip: config.gas_drip.clone(),
            limits: Default::default(),
            state: Default::default(),
            inflight_topup: Default::default(),
            inflight_drips: Default::default(),
            funding_nonce: Default::default(),
            drip_gate: Default::default(),
            recovery,
            metrics: FundingMetrics::new_with_labels(&[("chain", chain.to_string())]),
        });

        let (messages, rx) = mpsc::unbounded_channel();
        tokio::spawn(worker::run(Arc::clone(&inner), rx));

        Self { inner, messages }
    }

    /// The chain this service funds.
    pub fn chain(&self) -> Chain {
        self.inner.chain
    }

    /// Address of the funded relayer.
    pub fn relayer_address(&self) -> Address {
        self.inner.relayer
    }

    /// Address of the funding wallet.
    pub fn funding_address(&self) -> Option<Address> {
        self.inner.funding_signer.as_ref().map(DynSigner::address)
    }

    /// Balance thresholds of the relayer.
    pub fn balances(&self) -> &RelayerBalanceConfig {
        &self.inner.balances
    }

    /// Whether gas drips are enabled.
    pub fn drip_enabled(&self) -> bool {
        self.inner.gas_drip.enabled
    }

    /// The default drip amount.
    pub fn drip_amount(&self) -> U256 {
        self.inner.gas_drip.amount
    }

    /// Tops up the relayer if it is below its target balance.
    ///
    /// Fire-and-forget requests return [`TopUpOutcome::Queued`] immediately.
    pub async fn top_up(&self, request: TopUpRequest) -> TopUpOutcome {
        if request.fire_and_forget {
            self.nudge(request.reason);
            return TopUpOutcome::Queued;
        }
        self.inner.top_up(&request.reason).await
    }

    /// Asks the worker to top up the relayer if needed, without waiting.
    pub fn nudge(&self, reason: impl Into<String>) {
        let reason = reason.into();
        trace!(chain = %self.inner.chain, %reason, "Requesting background top-up");
        if self.messages.send(FundingMessage::TopUp { reason }).is_err() {
            warn!(chain = %self.inner.chain, "Funding worker is gone, dropping top-up request");
        }
    }

    /// Checks whether a drip of `amount` to `address` may be sponsored.
    pub async fn can_sponsor_drip(&self, address: &str, amount: U256) -> DripEligibility {
        match address.trim().parse::<Address>() {
            Ok(address) => self.inner.drip_eligibility(address, amount).await,
            Err(_) => DripEligibility::Denied(DripDenial::InvalidAddress),
        }
    }

    /// Sponsors gas of `recipient`.
    #[instrument(skip(self), fields(chain = %self.inner.chain))]
    pub async fn drip(&self, recipient: Address, request: DripRequest) -> DripOutcome {
        let amount = request.amount.unwrap_or(self.inner.gas_drip.amount);

        if request.fire_and_forget {
            let message = FundingMessage::Drip { recipient, amount, reason: request.reason };
            if self.messages.send(message).is_err() {
                warn!("Funding worker is gone, dropping drip request");
            }
            return DripOutcome::Queued;
        }

        self.inner.drip(recipient, amount, &request.reason).await
    }

    /// Returns the current status of the relayer and the funding wallet.
    pub async fn status(&self) -> Result<RelayerStatus, RelayError> {
        let inner = &self.inner;
        let funding_address = self.funding_address();

        let (balance, funding_balance) = tokio::try_join!(
            inner.client.get_balance(inner.relayer),
            async {
                match funding_address {
                    Some(address) => inner.client.get_balance(address).await.map(Some),
                    None => Ok(None),
                }
            }
        )?;

        inner.metrics.relayer_balance.set(as_ether(balance));
        if let Some(funding_balance) = funding_balance {
            inner.metrics.funding_balance.set(as_ether(funding_balance));
        }

        let usage = inner.limits.lock().usage(Utc::now());
        let state = inner.state.lock().clone();
        let balances = &inner.balances;

        Ok(RelayerStatus {
            chain: inner.chain,
            relayer_address: inner.relayer,
            balance,
            min_balance: balances.min_balance,
            target_balance: balances.target_balance,
            operational_floor: balances.operational_floor,
            ok_to_execute: balance >= balances.min_balance,
            operational: !balances.operational_floor.is_zero()
                && balance >= balances.operational_floor,
            last_error: state.last_error,
            last_topup_at: state.last_topup_at,
            last_topup_tx: state.last_topup_tx,
            funding_address,
            funding_balance,
            usage,
            caps: FundingCaps {
                topups_per_hour: inner.topup.max_per_hour,
                topup_hourly_amount: inner.topup.max_hourly_amount,
                topup_daily_amount: inner.topup.max_daily_amount,
                drips_per_hour: inner.gas_drip.max_per_hour,
                drips_per_address_per_day: inner.gas_drip.max_per_address_per_day,
                drip_daily_amount: inner.gas_drip.max_daily_amount,
            },
        })
    }

    /// Spawns a task nudging a top-up whenever the relayer falls below its minimum balance.
    pub fn spawn_balance_monitor(&self, interval: Duration) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                match this.status().await {
                    Ok(status) if !status.ok_to_execute => {
                        debug!(chain = %status.chain, balance = %status.balance, "Relayer below minimum balance");
                        this.nudge("balance_monitor");
                    }
                    Ok(_) => {}
                    Err(err) => warn!(chain = %this.inner.chain, %err, "Failed to check relayer balance"),
                }
            }
        })
    }
}

/// Converts a wei amount to ether for gauges.
fn as_ether(amount: U256) -> f64 {
    format_ether(amount).parse().unwrap_or_default()
}

impl FundingInner {
    /// Sends `amount` from `signer` to `to` and returns the hash once the node accepted it.
    async fn broadcast(
        &self,
        signer: &DynSigner,
        to: Address,
        amount: U256,
    ) -> Result<B256, RelayError> {
        let _nonce = self.funding_nonce.lock().await;
        let from = signer.address();
        let (nonce, gas_price) = tokio::try_join!(
            self.client.get_transaction_count(from),
            self.client.get_gas_price()
        )?;

        let request = TransactionRequest::default()
            .with_from(from)
            .with_to(to)
            .with_value(amount)
            .with_nonce(nonce)
            .with_gas_limit(TRANSFER_GAS_LIMIT)
            .with_gas_price(gas_price)
            .with_chain_id(self.chain.id());

        let tx_hash = self.client.send_transaction(signer, request).await?;
        debug!(chain = %self.chain, %tx_hash, %to, %amount, "Sent funding transfer");

        Ok(tx_hash)
    }

    /// Waits for a broadcast transfer. Returns `false` if it is still pending after the receipt
    /// timeout.
    async fn confirm(&self, tx_hash: B256) -> Result<bool, RelayError> {
        let receipt =
            wait_for_receipt(self.client.as_ref(), tx_hash, self.topup.receipt_timeout).await?;
        Ok(receipt.is_some())
    }
}
