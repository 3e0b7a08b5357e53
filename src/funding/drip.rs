use super::{FundingEvent, FundingInner};
use crate::{
    constants::FUNDING_GAS_BUFFER,
    error::{FailureBucket, RelayError},
    policy::FundingRecoveryMode,
};
use alloy::primitives::{Address, B256, U256};
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use futures_util::FutureExt;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// A request to sponsor gas of a user wallet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DripRequest {
    /// Why the drip is requested. Only used for logging.
    pub reason: String,
    /// Amount to send. Defaults to the configured drip amount.
    pub amount: Option<U256>,
    /// Hand the request to the funding worker instead of waiting for it.
    pub fire_and_forget: bool,
}

impl DripRequest {
    /// A drip of the configured amount that the caller waits for.
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into(), ..Default::default() }
    }

    /// Sets the amount.
    pub fn with_amount(mut self, amount: U256) -> Self {
        self.amount = Some(amount);
        self
    }

    /// Hands the request to the funding worker.
    pub fn in_background(mut self) -> Self {
        self.fire_and_forget = true;
        self
    }
}

/// Why a drip is denied.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display, strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DripDenial {
    /// Drips are disabled for the chain.
    Disabled,
    /// No funding wallet is configured for the chain.
    FundingWalletMissing,
    /// The recipient is not a valid non-zero address.
    InvalidAddress,
    /// The global hourly drip cap is exhausted.
    HourlyCapReached,
    /// The recipient already received its drips for today.
    AddressDailyCapReached,
    /// The global daily drip budget is exhausted.
    DailyCapReached,
    /// The funding wallet cannot cover the drip.
    FundingWalletInsufficient,
    /// The funding wallet balance could not be read.
    BalanceCheckFailed,
}

/// Whether a drip may be sponsored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DripEligibility {
    /// The drip may be sent.
    Eligible,
    /// The drip is denied.
    Denied(DripDenial),
}

impl DripEligibility {
    /// Whether the drip may be sent.
    pub const fn is_eligible(&self) -> bool {
        matches!(self, Self::Eligible)
    }

    /// A short code describing the eligibility.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Eligible => "eligible",
            Self::Denied(denial) => denial.into(),
        }
    }
}

/// Outcome of a drip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DripOutcome {
    /// The drip was sent.
    Dripped {
        /// Recipient of the drip.
        recipient: Address,
        /// Hash of the transfer.
        tx_hash: B256,
        /// Amount transferred.
        amount: U256,
    },
    /// The drip was broadcast and counted against the caps, but is not included yet.
    Pending {
        /// Recipient of the drip.
        recipient: Address,
        /// Hash of the transfer.
        tx_hash: B256,
        /// Amount transferred.
        amount: U256,
    },
    /// The drip was not sent.
    Denied(DripDenial),
    /// The transfer failed.
    Failed(RelayError),
    /// The request was handed to the funding worker.
    Queued,
}

impl DripOutcome {
    /// Hash of the drip transfer, included or pending.
    pub const fn tx_hash(&self) -> Option<B256> {
        match self {
            Self::Dripped { tx_hash, .. } | Self::Pending { tx_hash, .. } => Some(*tx_hash),
            _ => None,
        }
    }

    /// A short code describing the outcome.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Dripped { .. } => "dripped",
            Self::Pending { .. } => "pending",
            Self::Denied(denial) => denial.into(),
            Self::Failed(_) => "send_failed",
            Self::Queued => "queued",
        }
    }
}

impl FundingInner {
    /// Checks every condition of a drip of `amount` to `recipient`.
    pub(super) async fn drip_eligibility(&self, recipient: Address, amount: U256) -> DripEligibility {
        if !self.gas_drip.enabled {
            return DripEligibility::Denied(DripDenial::Disabled);
        }
        let Some(funder) = &self.funding_signer else {
            return DripEligibility::Denied(DripDenial::FundingWalletMissing);
        };
        if recipient.is_zero() {
            return DripEligibility::Denied(DripDenial::InvalidAddress);
        }
        if let Some(denial) =
            self.limits.lock().drip_denial(Utc::now(), recipient, amount, &self.gas_drip)
        {
            return DripEligibility::Denied(denial);
        }

        match self.client.get_balance(funder.address()).await {
            Ok(balance) if balance >= amount.saturating_add(FUNDING_GAS_BUFFER) => {
                DripEligibility::Eligible
            }
            Ok(_) => DripEligibility::Denied(DripDenial::FundingWalletInsufficient),
            Err(err) => {
                warn!(chain = %self.chain, %err, "Failed to read funding wallet balance");
                DripEligibility::Denied(DripDenial::BalanceCheckFailed)
            }
        }
    }

    /// Sends a drip to `recipient`, attaching to a drip to the same address already in flight.
    pub(super) async fn drip(
        self: &Arc<Self>,
        recipient: Address,
        amount: U256,
        reason: &str,
    ) -> DripOutcome {
        let inflight = match self.inflight_drips.entry(recipient) {
            Entry::Occupied(entry) => {
                debug!(chain = %self.chain, %recipient, reason, "Attaching to in-flight drip");
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                let this = Arc::clone(self);
                let reason = reason.to_string();
                let task = tokio::spawn(async move {
                    let outcome = this.execute_drip(recipient, amount, &reason).await;
                    this.inflight_drips.remove(&recipient);
                    outcome
                });
                let inflight = async move {
                    task.await.unwrap_or_else(|err| {
                        DripOutcome::Failed(RelayError::new(
                            FailureBucket::Unknown,
                            format!("drip task failed: {err}"),
                        ))
                    })
                }
                .boxed()
                .shared();
                entry.insert(inflight.clone());
                inflight
            }
        };

        inflight.await
    }

    #[instrument(skip(self), fields(chain = %self.chain))]
    async fn execute_drip(&self, recipient: Address, amount: U256, reason: &str) -> DripOutcome {
        let outcome = self.try_drip(recipient, amount).await;
        self.metrics.record_drip(&outcome);

        match &outcome {
            DripOutcome::Dripped { tx_hash, .. } => {
                self.recovery.record(FundingRecoveryMode::SponsorGasDrip);
                info!(%tx_hash, "Sponsored gas drip")
            }
            DripOutcome::Pending { tx_hash, .. } => warn!(%tx_hash, "Gas drip is still pending"),
            DripOutcome::Denied(denial) => debug!(%denial, "Denied gas drip"),
            DripOutcome::Failed(err) => warn!(bucket = %err.bucket, %err, "Gas drip failed"),
            DripOutcome::Queued => {}
        }

        outcome
    }

    async fn try_drip(&self, recipient: Address, amount: U256) -> DripOutcome {
        // global caps are shared by all recipients, so the check and the update must not interleave
        let gate = self.drip_gate.lock().await;

        if let DripEligibility::Denied(denial) = self.drip_eligibility(recipient, amount).await {
            return DripOutcome::Denied(denial);
        }
        let Some(funder) = &self.funding_signer else {
            return DripOutcome::Denied(DripDenial::FundingWalletMissing);
        };

        let tx_hash = match self.broadcast(funder, recipient, amount).await {
            Ok(tx_hash) => tx_hash,
            Err(err) => return DripOutcome::Failed(err),
        };
        self.limits.lock().record_drip(FundingEvent::drip(Utc::now(), amount, recipient, tx_hash));
        drop(gate);

        match self.confirm(tx_hash).await {
            Ok(true) => DripOutcome::Dripped { recipient, tx_hash, amount },
            Ok(false) => DripOutcome::Pending { recipient, tx_hash, amount },
            Err(err) => DripOutcome::Failed(err),
        }
    }
}
