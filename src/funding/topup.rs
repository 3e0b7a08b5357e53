use super::{FundingEvent, FundingInner, PendingTopUp};
use crate::{
    constants::{FUNDING_GAS_BUFFER, PENDING_TOPUP_TTL},
    error::{FailureBucket, RelayError},
};
use alloy::primitives::{B256, U256};
use chrono::Utc;
use futures_util::FutureExt;
use serde::Serialize;
use std::{sync::Arc, time::Instant};
use tracing::{debug, info, instrument, warn};

/// A request to top up the relayer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopUpRequest {
    /// Why the top-up is requested. Only used for logging.
    pub reason: String,
    /// Hand the request to the funding worker instead of waiting for it.
    pub fire_and_forget: bool,
}

impl TopUpRequest {
    /// A top-up the caller waits for.
    pub fn sync(reason: impl Into<String>) -> Self {
        Self { reason: reason.into(), fire_and_forget: false }
    }

    /// A top-up handed to the funding worker.
    pub fn background(reason: impl Into<String>) -> Self {
        Self { reason: reason.into(), fire_and_forget: true }
    }
}

/// Why a top-up was not attempted.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display, strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TopUpSkipReason {
    /// Top-ups are disabled for the chain.
    Disabled,
    /// No funding wallet is configured for the chain.
    FundingWalletMissing,
    /// The relayer already holds its target balance.
    AboveTarget,
    /// The hourly count or amount cap is exhausted.
    HourlyCapReached,
    /// The daily budget is exhausted.
    DailyCapReached,
}

/// Outcome of a top-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopUpOutcome {
    /// The relayer was topped up.
    ToppedUp {
        /// Hash of the transfer.
        tx_hash: B256,
        /// Amount transferred.
        amount: U256,
    },
    /// The transfer was broadcast and counted against the caps, but is not included yet.
    Pending {
        /// Hash of the transfer.
        tx_hash: B256,
        /// Amount transferred.
        amount: U256,
    },
    /// No transfer was attempted.
    Skipped(TopUpSkipReason),
    /// The funding wallet cannot cover the transfer.
    FundingWalletInsufficient {
        /// Amount plus gas buffer the transfer needs.
        required: U256,
        /// Balance of the funding wallet.
        available: U256,
    },
    /// The transfer failed.
    Failed(RelayError),
    /// The request was handed to the funding worker.
    Queued,
}

impl TopUpOutcome {
    /// Whether the relayer was topped up.
    pub const fn is_topped_up(&self) -> bool {
        matches!(self, Self::ToppedUp { .. })
    }

    /// Whether a transfer was needed and did not happen for reasons other than caps.
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::FundingWalletInsufficient { .. } | Self::Failed(_))
    }

    /// Hash of the top-up transfer, included or pending.
    pub const fn tx_hash(&self) -> Option<B256> {
        match self {
            Self::ToppedUp { tx_hash, .. } | Self::Pending { tx_hash, .. } => Some(*tx_hash),
            _ => None,
        }
    }

    /// A short code describing the outcome.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::ToppedUp { .. } => "topped_up",
            Self::Pending { .. } => "pending",
            Self::Skipped(reason) => reason.into(),
            Self::FundingWalletInsufficient { .. } => "funding_wallet_insufficient",
            Self::Failed(_) => "send_failed",
            Self::Queued => "queued",
        }
    }

    /// The error of a failed top-up, as seen by the relayer.
    pub fn error(&self) -> Option<RelayError> {
        match self {
            Self::FundingWalletInsufficient { required, available } => {
                Some(RelayError::topup_failed(format!(
                    "funding wallet insufficient: required {required}, available {available}"
                )))
            }
            Self::Failed(err) => Some(RelayError::topup_failed(err)),
            _ => None,
        }
    }
}

impl FundingInner {
    /// Tops up the relayer, attaching to a top-up that is already in flight.
    ///
    /// The transfer runs in its own task, so callers that stop waiting do not cancel it.
    pub(super) async fn top_up(self: &Arc<Self>, reason: &str) -> TopUpOutcome {
        let inflight = {
            let mut slot = self.inflight_topup.lock();
            match slot.as_ref() {
                Some(inflight) => {
                    debug!(chain = %self.chain, reason, "Attaching to in-flight top-up");
                    inflight.clone()
                }
                None => {
                    let this = Arc::clone(self);
                    let reason = reason.to_string();
                    let task = tokio::spawn(async move {
                        let outcome = this.execute_top_up(&reason).await;
                        this.inflight_topup.lock().take();
                        outcome
                    });
                    let inflight = async move {
                        task.await.unwrap_or_else(|err| {
                            TopUpOutcome::Failed(RelayError::new(
                                FailureBucket::RelayerTopupFailed,
                                format!("top-up task failed: {err}"),
                            ))
                        })
                    }
                    .boxed()
                    .shared();
                    *slot = Some(inflight.clone());
                    inflight
                }
            }
        };

        inflight.await
    }

    #[instrument(skip(self), fields(chain = %self.chain, relayer = %self.relayer))]
    async fn execute_top_up(&self, reason: &str) -> TopUpOutcome {
        let outcome = self.try_top_up().await;
        self.metrics.record_topup(&outcome);

        match &outcome {
            TopUpOutcome::ToppedUp { tx_hash, amount } => {
                info!(%tx_hash, %amount, "Topped up relayer")
            }
            TopUpOutcome::Pending { tx_hash, amount } => {
                warn!(%tx_hash, %amount, "Relayer top-up is still pending")
            }
            TopUpOutcome::Skipped(skip) => debug!(%skip, "Skipped relayer top-up"),
            TopUpOutcome::FundingWalletInsufficient { required, available } => {
                warn!(%required, %available, "Funding wallet cannot cover relayer top-up")
            }
            TopUpOutcome::Failed(err) => warn!(bucket = %err.bucket, %err, "Relayer top-up failed"),
            TopUpOutcome::Queued => {}
        }

        if let Some(err) = outcome.error() {
            self.state.lock().last_error = Some(err.message);
        }

        outcome
    }

    async fn try_top_up(&self) -> TopUpOutcome {
        if !self.topup.enabled {
            return TopUpOutcome::Skipped(TopUpSkipReason::Disabled);
        }
        let Some(funder) = &self.funding_signer else {
            return TopUpOutcome::Skipped(TopUpSkipReason::FundingWalletMissing);
        };
        if let Some(PendingTopUp { tx_hash, amount, .. }) = self.pending_topup().await {
            return TopUpOutcome::Pending { tx_hash, amount };
        }

        let balance = match self.client.get_balance(self.relayer).await {
            Ok(balance) => balance,
            Err(err) => return TopUpOutcome::Failed(err.into()),
        };
        let target = self.balances.target_balance;
        if balance >= target {
            return TopUpOutcome::Skipped(TopUpSkipReason::AboveTarget);
        }

        let allowance = match self.limits.lock().topup_allowance(Utc::now(), &self.topup) {
            Ok(allowance) => allowance,
            Err(skip) => return TopUpOutcome::Skipped(skip),
        };
        let amount = (target - balance).min(allowance);

        let available = match self.client.get_balance(funder.address()).await {
            Ok(balance) => balance,
            Err(err) => return TopUpOutcome::Failed(err.into()),
        };
        let required = amount.saturating_add(FUNDING_GAS_BUFFER);
        if available < required {
            return TopUpOutcome::FundingWalletInsufficient { required, available };
        }

        let tx_hash = match self.broadcast(funder, self.relayer, amount).await {
            Ok(tx_hash) => tx_hash,
            Err(err) => return TopUpOutcome::Failed(err),
        };

        // counted as soon as it is broadcast, the transfer can still land without us seeing it
        let now = Utc::now();
        self.limits.lock().record_topup(FundingEvent::topup(now, amount, tx_hash));
        {
            let mut state = self.state.lock();
            state.last_topup_at = Some(now);
            state.last_topup_tx = Some(tx_hash);
            state.pending = Some(PendingTopUp { tx_hash, amount, sent_at: Instant::now() });
        }

        match self.confirm(tx_hash).await {
            Ok(true) => {
                let mut state = self.state.lock();
                state.pending = None;
                state.last_error = None;
                TopUpOutcome::ToppedUp { tx_hash, amount }
            }
            Ok(false) => TopUpOutcome::Pending { tx_hash, amount },
            Err(err) => {
                self.state.lock().pending = None;
                TopUpOutcome::Failed(err)
            }
        }
    }

    /// The last broadcast top-up, if it is still waiting for inclusion.
    async fn pending_topup(&self) -> Option<PendingTopUp> {
        let pending = self.state.lock().pending?;
        if pending.sent_at.elapsed() >= PENDING_TOPUP_TTL {
            warn!(tx_hash = %pending.tx_hash, "Dropping relayer top-up that never got a receipt");
            self.state.lock().pending = None;
            return None;
        }

        match self.client.get_transaction_receipt(pending.tx_hash).await {
            Ok(Some(_)) => {
                self.state.lock().pending = None;
                None
            }
            Ok(None) => Some(pending),
            Err(err) => {
                warn!(tx_hash = %pending.tx_hash, %err, "Failed to check pending relayer top-up");
                Some(pending)
            }
        }
    }
}
