use crate::environment::{CHAIN, Environment, EnvironmentConfig, milli_ether};
use alloy::primitives::{Address, U256};
use execution_relay::policy::{
    ExecutionMode, FundingPolicyRequest, FundingReason, FundingRecoveryMode, RecommendedAction,
};
use std::time::Duration;

async fn underfunded_relayer() -> eyre::Result<Environment> {
    Environment::setup_with(EnvironmentConfig::default().with_relayer_balance(U256::ZERO)).await
}

#[tokio::test(flavor = "multi_thread")]
async fn relays_when_relayer_holds_its_minimum() -> eyre::Result<()> {
    let env = Environment::setup().await?;

    let result = env.relay.execution_funding_policy(FundingPolicyRequest::new(CHAIN)).await?;

    assert_eq!(result.mode, ExecutionMode::Relayed);
    assert_eq!(result.reason, FundingReason::RelayerOk);
    assert_eq!(result.recommended_action, RecommendedAction::ProceedRelayed);
    assert_eq!(result.relayer_balance, milli_ether(1_000));
    assert!(!result.did_topup);
    assert_eq!(env.relay.last_recovery_mode().unwrap().mode, FundingRecoveryMode::Relayed);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn relays_above_operational_floor() -> eyre::Result<()> {
    let env =
        Environment::setup_with(EnvironmentConfig::default().with_relayer_balance(milli_ether(5)))
            .await?;

    let result = env.relay.execution_funding_policy(FundingPolicyRequest::new(CHAIN)).await?;

    assert_eq!(result.mode, ExecutionMode::Relayed);
    assert_eq!(result.reason, FundingReason::RelayerOperational);

    let status = env.relay.get_relayer_status(CHAIN).await?;
    assert!(!status.ok_to_execute);
    assert!(status.operational);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn waits_for_synchronous_topup() -> eyre::Result<()> {
    let env = Environment::setup_with(
        EnvironmentConfig::default()
            .with_relayer_balance(U256::ZERO)
            .with_funding_balance(milli_ether(1_000)),
    )
    .await?;

    let result = env
        .relay
        .execution_funding_policy(
            FundingPolicyRequest::new(CHAIN)
                .with_sync_topup(Some(Duration::from_secs(5)), "test_checkout"),
        )
        .await?;

    assert_eq!(result.mode, ExecutionMode::RelayedAfterTopup);
    assert_eq!(result.reason, FundingReason::RelayerTopupOk);
    assert!(result.did_topup);
    assert!(result.topup_tx_hash.is_some());
    assert_eq!(result.relayer_balance, milli_ether(50));
    assert_eq!(env.relay.get_relayer_status(CHAIN).await?.balance, milli_ether(50));

    Ok(())
}

/// Scenario B: the relayer cannot pay and the user wallet can.
#[tokio::test(flavor = "multi_thread")]
async fn falls_back_to_user_wallet() -> eyre::Result<()> {
    let env = underfunded_relayer().await?;
    let user = env.user(milli_ether(10));

    let result = env
        .relay
        .execution_funding_policy(FundingPolicyRequest::new(CHAIN).with_user_address(user.to_string()))
        .await?;

    assert_eq!(result.mode, ExecutionMode::UserPaidRequired);
    assert_eq!(result.reason, FundingReason::UserHasGas);
    assert_eq!(result.recommended_action, RecommendedAction::ContinueWithWallet);
    assert_eq!(result.user_balance, Some(milli_ether(10)));
    assert_eq!(env.relay.last_recovery_mode().unwrap().mode, FundingRecoveryMode::UserPaysGas);

    let json = serde_json::to_value(&result)?;
    assert_eq!(json["mode"], "user_paid_required");
    assert_eq!(json["reasonCode"], "USER_HAS_GAS");
    assert_eq!(json["recommendedAction"], "continue_with_wallet");
    assert!(json["userBalance"].as_str().is_some_and(|balance| balance.starts_with("0.01")));

    Ok(())
}

/// Scenario C: neither the relayer nor the user can pay.
#[tokio::test(flavor = "multi_thread")]
async fn blocks_when_nobody_can_pay() -> eyre::Result<()> {
    let env = underfunded_relayer().await?;
    let user = env.user(U256::ZERO);

    let result = env
        .relay
        .execution_funding_policy(FundingPolicyRequest::new(CHAIN).with_user_address(user.to_string()))
        .await?;

    assert_eq!(result.mode, ExecutionMode::BlockedNeedsGas);
    assert_eq!(result.reason, FundingReason::UserWalletUnderfunded);
    assert_eq!(result.recommended_action, RecommendedAction::TopUpGas);
    assert!(result.sponsor_eligible.is_none());

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn offers_gas_drip_to_underfunded_users() -> eyre::Result<()> {
    let env = Environment::setup_with(
        EnvironmentConfig::default()
            .with_relayer_balance(U256::ZERO)
            .with_funding_balance(milli_ether(1_000))
            .with_chain(|chain| {
                chain.gas_drip.enabled = true;
                chain.topup.enabled = false;
            }),
    )
    .await?;
    let user = env.user(U256::ZERO);

    let result = env
        .relay
        .execution_funding_policy(FundingPolicyRequest::new(CHAIN).with_user_address(user.to_string()))
        .await?;

    assert_eq!(result.mode, ExecutionMode::BlockedNeedsGas);
    assert_eq!(result.reason, FundingReason::SponsorDripAvailable);
    assert_eq!(result.sponsor_eligible, Some(true));
    assert_eq!(result.sponsor_reason.as_deref(), Some("eligible"));

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn asks_for_a_wallet() -> eyre::Result<()> {
    let env = underfunded_relayer().await?;

    for request in [
        FundingPolicyRequest::new(CHAIN),
        FundingPolicyRequest::new(CHAIN).with_user_address("not an address"),
        FundingPolicyRequest::new(CHAIN).with_user_address(Address::ZERO.to_string()),
    ] {
        let result = env.relay.execution_funding_policy(request).await?;
        assert_eq!(result.reason, FundingReason::MissingUserAddress);
        assert_eq!(result.recommended_action, RecommendedAction::ConnectWallet);
    }

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn retries_later_when_wallet_fallback_is_disabled() -> eyre::Result<()> {
    let env = Environment::setup_with(
        EnvironmentConfig::default()
            .with_relayer_balance(U256::ZERO)
            .with_policy(|policy| policy.wallet_fallback_enabled = false),
    )
    .await?;
    let user = env.user(milli_ether(10));

    let result = env
        .relay
        .execution_funding_policy(FundingPolicyRequest::new(CHAIN).with_user_address(user.to_string()))
        .await?;

    assert_eq!(result.reason, FundingReason::UserPaysDisabled);
    assert_eq!(result.recommended_action, RecommendedAction::RetryLater);
    assert!(result.user_balance.is_none());

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn retries_later_when_user_balance_is_unreadable() -> eyre::Result<()> {
    let env = underfunded_relayer().await?;
    let user = env.user(milli_ether(10));
    env.fake.fail_balance_reads(user);

    let result = env
        .relay
        .execution_funding_policy(FundingPolicyRequest::new(CHAIN).with_user_address(user.to_string()))
        .await?;

    assert_eq!(result.reason, FundingReason::UserBalanceCheckFailed);
    assert_eq!(result.recommended_action, RecommendedAction::RetryLater);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn rejects_unknown_chains() -> eyre::Result<()> {
    let env = Environment::setup().await?;

    let result = env
        .relay
        .execution_funding_policy(FundingPolicyRequest::new(alloy_chains::Chain::from_id(999_999)))
        .await;

    assert!(result.is_err());

    Ok(())
}
