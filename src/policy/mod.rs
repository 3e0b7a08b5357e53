//! Funding policy.
//!
//! Decides how an execution is paid for: by the relayer, by the user from their own wallet, or
//! not at all until someone adds gas. Every outcome carries a [`FundingReason`] from which the
//! execution mode, the recommended action and the user-facing message derive.

mod recovery;
pub use recovery::{FundingRecoveryMode, RecoveryRecord, RecoveryTracker};

use crate::{
    chains::{Chain, Chains, SettlementChain},
    config::PolicyConfig,
    error::RelayError,
    funding::{DripEligibility, FundingService, TopUpRequest},
};
use alloy::primitives::{Address, B256, U256};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// How an execution is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExecutionMode {
    /// The relayer sends the transaction.
    Relayed,
    /// The relayer sends the transaction after it was topped up.
    RelayedAfterTopup,
    /// The user signs and pays for the transaction.
    UserPaidRequired,
    /// Nobody can pay for the transaction right now.
    BlockedNeedsGas,
}

impl ExecutionMode {
    /// Whether the relayer pays.
    pub const fn is_relayed(&self) -> bool {
        matches!(self, Self::Relayed | Self::RelayedAfterTopup)
    }
}

/// What the caller should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RecommendedAction {
    /// Go ahead with relayed execution.
    ProceedRelayed,
    /// Have the user sign with their wallet.
    ContinueWithWallet,
    /// Have the user add gas to their wallet.
    TopUpGas,
    /// Have the user connect a wallet.
    ConnectWallet,
    /// Try again later.
    RetryLater,
}

/// Why the policy chose an [`ExecutionMode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum FundingReason {
    /// The relayer holds its minimum balance.
    RelayerOk,
    /// The relayer holds its minimum balance after a synchronous top-up.
    RelayerTopupOk,
    /// The relayer is below its minimum but above its operational floor.
    RelayerOperational,
    /// The relayer cannot pay and the wallet fallback is disabled.
    UserPaysDisabled,
    /// The relayer cannot pay and there is no user wallet to fall back to.
    MissingUserAddress,
    /// The user wallet can pay.
    UserHasGas,
    /// The user wallet cannot pay, but a gas drip can be sponsored.
    SponsorDripAvailable,
    /// The user wallet cannot pay.
    UserWalletUnderfunded,
    /// The user wallet balance could not be read.
    UserBalanceCheckFailed,
}

impl FundingReason {
    /// The execution mode of the reason.
    pub const fn mode(&self) -> ExecutionMode {
        match self {
            Self::RelayerOk | Self::RelayerOperational => ExecutionMode::Relayed,
            Self::RelayerTopupOk => ExecutionMode::RelayedAfterTopup,
            Self::UserHasGas => ExecutionMode::UserPaidRequired,
            Self::UserPaysDisabled
            | Self::MissingUserAddress
            | Self::SponsorDripAvailable
            | Self::UserWalletUnderfunded
            | Self::UserBalanceCheckFailed => ExecutionMode::BlockedNeedsGas,
        }
    }

    /// What the caller should do next.
    pub const fn recommended_action(&self) -> RecommendedAction {
        match self {
            Self::RelayerOk | Self::RelayerTopupOk | Self::RelayerOperational => {
                RecommendedAction::ProceedRelayed
            }
            Self::UserHasGas => RecommendedAction::ContinueWithWallet,
            Self::MissingUserAddress => RecommendedAction::ConnectWallet,
            Self::SponsorDripAvailable | Self::UserWalletUnderfunded => RecommendedAction::TopUpGas,
            Self::UserPaysDisabled | Self::UserBalanceCheckFailed => RecommendedAction::RetryLater,
        }
    }

    /// A message suitable for end users.
    pub const fn user_message(&self) -> &'static str {
        match self {
            Self::RelayerOk | Self::RelayerOperational => "Your transaction will be relayed.",
            Self::RelayerTopupOk => "The relayer was refilled and will send your transaction.",
            Self::UserPaysDisabled => {
                "Relayed execution is temporarily unavailable. Please try again shortly."
            }
            Self::MissingUserAddress => {
                "Relayed execution is unavailable. Connect a wallet to sign the transaction yourself."
            }
            Self::UserHasGas => {
                "Relayed execution is unavailable. Please sign the transaction with your wallet."
            }
            Self::SponsorDripAvailable => {
                "Your wallet needs gas. A small amount of gas can be sent to your wallet."
            }
            Self::UserWalletUnderfunded => {
                "Your wallet does not hold enough gas. Please add funds and try again."
            }
            Self::UserBalanceCheckFailed => {
                "We could not check your wallet balance. Please try again shortly."
            }
        }
    }
}

/// Input of [`FundingPolicy::decide`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundingPolicyRequest {
    /// The chain to execute on.
    pub chain: SettlementChain,
    /// Wallet of the user, as supplied by the caller.
    pub user_address: Option<String>,
    /// Whether to wait for a top-up when the relayer cannot pay.
    pub attempt_topup_sync: bool,
    /// Bound of the synchronous top-up.
    pub topup_timeout: Option<Duration>,
    /// Why the synchronous top-up is requested.
    pub topup_reason: Option<String>,
    /// Whether a relayed or user-paid decision is recorded as the last recovery mode.
    pub record_recovery: bool,
}

impl FundingPolicyRequest {
    /// A request that only looks at the relayer of `chain`.
    pub fn new(chain: SettlementChain) -> Self {
        Self {
            chain,
            user_address: None,
            attempt_topup_sync: false,
            topup_timeout: None,
            topup_reason: None,
            record_recovery: true,
        }
    }

    /// Sets the user wallet.
    pub fn with_user_address(mut self, user_address: impl Into<String>) -> Self {
        self.user_address = Some(user_address.into());
        self
    }

    /// Waits up to `timeout` for a top-up when the relayer cannot pay.
    pub fn with_sync_topup(mut self, timeout: Option<Duration>, reason: impl Into<String>) -> Self {
        self.attempt_topup_sync = true;
        self.topup_timeout = timeout;
        self.topup_reason = Some(reason.into());
        self
    }

    /// Leaves the recovery tracker alone, for callers that only check capacity.
    pub fn without_recovery_record(mut self) -> Self {
        self.record_recovery = false;
        self
    }
}

/// Output of [`FundingPolicy::decide`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingPolicyResult {
    /// How the execution is carried out.
    pub mode: ExecutionMode,
    /// The chain.
    pub chain: SettlementChain,
    /// Why this mode was chosen.
    #[serde(rename = "reasonCode")]
    pub reason: FundingReason,
    /// A message suitable for end users.
    pub user_message: String,
    /// What the caller should do next.
    pub recommended_action: RecommendedAction,
    /// The relayer balance the decision was based on.
    #[serde(with = "crate::serde::ether")]
    pub relayer_balance: U256,
    /// Minimum balance of the relayer.
    #[serde(with = "crate::serde::ether")]
    pub relayer_min: U256,
    /// Balance a user wallet needs to pay for itself.
    #[serde(with = "crate::serde::ether")]
    pub min_user_gas: U256,
    /// Balance of the user wallet, if it was read.
    #[serde(with = "crate::serde::ether::option", skip_serializing_if = "Option::is_none")]
    pub user_balance: Option<U256>,
    /// Whether the relayer was topped up during the decision.
    pub did_topup: bool,
    /// Transaction of that top-up.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topup_tx_hash: Option<B256>,
    /// Whether a gas drip could be sponsored for the user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sponsor_eligible: Option<bool>,
    /// Why a gas drip could or could not be sponsored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sponsor_reason: Option<String>,
}

/// Facts gathered while walking the decision ladder.
#[derive(Debug, Clone)]
struct Facts {
    chain: SettlementChain,
    relayer_balance: U256,
    relayer_min: U256,
    min_user_gas: U256,
    user_balance: Option<U256>,
    did_topup: bool,
    topup_tx_hash: Option<B256>,
    sponsor: Option<DripEligibility>,
}

impl Facts {
    fn finish(self, mode: ExecutionMode, reason: FundingReason) -> FundingPolicyResult {
        FundingPolicyResult {
            mode,
            chain: self.chain,
            reason,
            user_message: reason.user_message().to_string(),
            recommended_action: reason.recommended_action(),
            relayer_balance: self.relayer_balance,
            relayer_min: self.relayer_min,
            min_user_gas: self.min_user_gas,
            user_balance: self.user_balance,
            did_topup: self.did_topup,
            topup_tx_hash: self.topup_tx_hash,
            sponsor_eligible: self.sponsor.map(|eligibility| eligibility.is_eligible()),
            sponsor_reason: self.sponsor.map(|eligibility| eligibility.reason_code().to_string()),
        }
    }
}

/// Relayer balance as seen by the policy.
#[derive(Debug, Clone, Copy)]
struct RelayerView {
    balance: U256,
    ok_to_execute: bool,
    operational: bool,
}

/// The funding policy engine.
#[derive(Debug, Clone)]
pub struct FundingPolicy {
    chains: Chains,
    config: PolicyConfig,
    recovery: RecoveryTracker,
}

impl FundingPolicy {
    /// Creates a new policy engine.
    pub fn new(chains: Chains, config: PolicyConfig, recovery: RecoveryTracker) -> Self {
        Self { chains, config, recovery }
    }

    /// The tracker of the last recovery mode.
    pub fn recovery(&self) -> &RecoveryTracker {
        &self.recovery
    }

    /// Decides how an execution on `request.chain` is paid for.
    ///
    /// Only fails if the chain is not configured.
    #[instrument(skip_all, fields(chain = %request.chain))]
    pub async fn decide(
        &self,
        request: FundingPolicyRequest,
    ) -> Result<FundingPolicyResult, RelayError> {
        let chain = self
            .chains
            .get(request.chain)
            .ok_or_else(|| RelayError::unsupported_chain(request.chain))?;
        let result = self.walk_ladder(&chain, &request).await;

        debug!(
            mode = %result.mode,
            reason = %result.reason,
            relayer_balance = %result.relayer_balance,
            "Decided execution funding"
        );

        if request.record_recovery {
            if result.mode.is_relayed() {
                self.recovery.record(FundingRecoveryMode::Relayed);
            } else if result.reason == FundingReason::UserHasGas {
                self.recovery.record(FundingRecoveryMode::UserPaysGas);
            }
        }

        Ok(result)
    }

    async fn walk_ladder(&self, chain: &Chain, request: &FundingPolicyRequest) -> FundingPolicyResult {
        let funding = &chain.funding;
        let mut relayer = relayer_view(funding).await;
        let mut facts = Facts {
            chain: request.chain,
            relayer_balance: relayer.balance,
            relayer_min: funding.balances().min_balance,
            min_user_gas: self.config.min_user_gas,
            user_balance: None,
            did_topup: false,
            topup_tx_hash: None,
            sponsor: None,
        };

        if relayer.ok_to_execute {
            return facts.finish(ExecutionMode::Relayed, FundingReason::RelayerOk);
        }

        if request.attempt_topup_sync {
            let timeout = request.topup_timeout.unwrap_or(self.config.topup_timeout);
            let reason = request.topup_reason.as_deref().unwrap_or("funding_policy");

            match tokio::time::timeout(timeout, funding.top_up(TopUpRequest::sync(reason))).await {
                Ok(outcome) if outcome.is_topped_up() => {
                    facts.did_topup = true;
                    facts.topup_tx_hash = outcome.tx_hash();
                    relayer = relayer_view(funding).await;
                    facts.relayer_balance = relayer.balance;
                    if relayer.ok_to_execute {
                        return facts
                            .finish(ExecutionMode::RelayedAfterTopup, FundingReason::RelayerTopupOk);
                    }
                }
                Ok(outcome) => {
                    warn!(outcome = outcome.reason_code(), "Synchronous relayer top-up did not complete")
                }
                Err(_) => warn!(?timeout, "Synchronous relayer top-up timed out"),
            }
        }

        if relayer.operational {
            let mode = if facts.did_topup {
                ExecutionMode::RelayedAfterTopup
            } else {
                ExecutionMode::Relayed
            };
            return facts.finish(mode, FundingReason::RelayerOperational);
        }

        let reason = self.user_pays_reason(chain, request, &mut facts).await;
        facts.finish(reason.mode(), reason)
    }

    async fn user_pays_reason(
        &self,
        chain: &Chain,
        request: &FundingPolicyRequest,
        facts: &mut Facts,
    ) -> FundingReason {
        if !self.config.wallet_fallback_enabled {
            return FundingReason::UserPaysDisabled;
        }

        let Some(user) = request.user_address.as_deref().and_then(parse_user_address) else {
            return FundingReason::MissingUserAddress;
        };

        let balance = match chain.client.get_balance(user).await {
            Ok(balance) => balance,
            Err(err) => {
                warn!(%user, %err, "Failed to read user balance");
                return FundingReason::UserBalanceCheckFailed;
            }
        };
        facts.user_balance = Some(balance);

        if balance >= self.config.min_user_gas {
            return FundingReason::UserHasGas;
        }

        let funding = &chain.funding;
        if funding.drip_enabled() {
            let eligibility =
                funding.can_sponsor_drip(&user.to_string(), funding.drip_amount()).await;
            facts.sponsor = Some(eligibility);
            if eligibility.is_eligible() {
                return FundingReason::SponsorDripAvailable;
            }
        }

        FundingReason::UserWalletUnderfunded
    }
}

async fn relayer_view(funding: &FundingService) -> RelayerView {
    match funding.status().await {
        Ok(status) => RelayerView {
            balance: status.balance,
            ok_to_execute: status.ok_to_execute,
            operational: status.operational,
        },
        Err(err) => {
            warn!(%err, "Failed to read relayer status");
            RelayerView { balance: U256::ZERO, ok_to_execute: false, operational: false }
        }
    }
}

/// Parses a user supplied wallet address, rejecting the zero address.
fn parse_user_address(address: &str) -> Option<Address> {
    address.trim().parse::<Address>().ok().filter(|address| !address.is_zero())
}
