use crate::environment::{CHAIN, ChainEvent, Environment, EnvironmentConfig, milli_ether};
use alloy::primitives::U256;
use execution_relay::{
    funding::{DripDenial, DripEligibility, DripOutcome, DripRequest, TopUpOutcome, TopUpRequest, TopUpSkipReason},
    policy::FundingRecoveryMode,
};
use std::time::Duration;

async fn funded_env(f: impl FnOnce(&mut execution_relay::config::ChainConfig)) -> eyre::Result<Environment> {
    Environment::setup_with(
        EnvironmentConfig::default()
            .with_relayer_balance(U256::ZERO)
            .with_funding_balance(milli_ether(1_000))
            .with_chain(f),
    )
    .await
}

#[tokio::test(flavor = "multi_thread")]
async fn caps_topups_per_hour() -> eyre::Result<()> {
    let env = funded_env(|chain| chain.topup.max_per_hour = 2).await?;
    let funding = &env.chain.funding;

    for _ in 0..2 {
        let outcome = funding.top_up(TopUpRequest::sync("test")).await;
        assert!(matches!(outcome, TopUpOutcome::ToppedUp { amount, .. } if amount == milli_ether(50)));
        // drain the relayer so it needs another top-up
        env.fake.set_balance(env.relayer, U256::ZERO);
    }

    let outcome = funding.top_up(TopUpRequest::sync("test")).await;
    assert_eq!(outcome, TopUpOutcome::Skipped(TopUpSkipReason::HourlyCapReached));

    let status = funding.status().await?;
    assert_eq!(status.usage.topups_last_hour, 2);
    assert_eq!(status.usage.topup_spent_today, milli_ether(100));
    assert_eq!(status.caps.topups_per_hour, 2);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn counts_pending_topups_against_caps() -> eyre::Result<()> {
    let env = funded_env(|chain| {
        chain.topup.max_per_hour = 1;
        chain.topup.receipt_timeout = Duration::from_millis(50);
    })
    .await?;
    env.fake.hold_receipts();
    let funding = &env.chain.funding;

    let first = funding.top_up(TopUpRequest::sync("test")).await;
    assert!(matches!(first, TopUpOutcome::Pending { amount, .. } if amount == milli_ether(50)));
    assert!(!first.is_failure());

    // the unconfirmed transfer is reported again instead of sending another one
    for _ in 0..4 {
        let outcome = funding.top_up(TopUpRequest::sync("test")).await;
        assert_eq!(outcome.reason_code(), "pending");
        assert_eq!(outcome.tx_hash(), first.tx_hash());
    }

    assert_eq!(env.fake.sent_from(env.funder.unwrap()).len(), 1);
    let status = funding.status().await?;
    assert_eq!(status.usage.topups_last_hour, 1);
    assert_eq!(status.usage.topup_spent_today, milli_ether(50));
    assert_eq!(status.last_topup_tx, first.tx_hash());
    assert!(status.last_error.is_none());

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn caps_topup_amount_per_day() -> eyre::Result<()> {
    let env = funded_env(|chain| chain.topup.max_daily_amount = milli_ether(60)).await?;
    let funding = &env.chain.funding;

    let first = funding.top_up(TopUpRequest::sync("test")).await;
    assert!(matches!(first, TopUpOutcome::ToppedUp { amount, .. } if amount == milli_ether(50)));
    env.fake.set_balance(env.relayer, U256::ZERO);

    // only the rest of the daily budget is sent
    let second = funding.top_up(TopUpRequest::sync("test")).await;
    assert!(matches!(second, TopUpOutcome::ToppedUp { amount, .. } if amount == milli_ether(10)));
    env.fake.set_balance(env.relayer, U256::ZERO);

    let third = funding.top_up(TopUpRequest::sync("test")).await;
    assert_eq!(third, TopUpOutcome::Skipped(TopUpSkipReason::DailyCapReached));

    assert_eq!(funding.status().await?.usage.topup_spent_today, milli_ether(60));

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn skips_topup_of_funded_relayer() -> eyre::Result<()> {
    let env = funded_env(|_| {}).await?;
    env.fake.set_balance(env.relayer, milli_ether(50));

    let outcome = env.chain.funding.top_up(TopUpRequest::sync("test")).await;

    assert_eq!(outcome, TopUpOutcome::Skipped(TopUpSkipReason::AboveTarget));
    assert!(env.fake.sent_from(env.funder.unwrap()).is_empty());

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_topups_share_one_transfer() -> eyre::Result<()> {
    let env = funded_env(|_| {}).await?;
    let funding = &env.chain.funding;

    let outcomes = futures_util::future::join_all(
        (0..5).map(|_| funding.top_up(TopUpRequest::sync("test"))),
    )
    .await;

    let hashes: Vec<_> = outcomes.iter().filter_map(TopUpOutcome::tx_hash).collect();
    assert!(!hashes.is_empty());
    assert!(hashes.iter().all(|hash| *hash == hashes[0]));
    assert_eq!(env.fake.sent_from(env.funder.unwrap()).len(), 1);
    assert_eq!(env.fake.balance(env.relayer), milli_ether(50));

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn background_topups_return_immediately() -> eyre::Result<()> {
    let env = funded_env(|_| {}).await?;

    let outcome = env.chain.funding.top_up(TopUpRequest::background("test")).await;
    assert_eq!(outcome, TopUpOutcome::Queued);

    tokio::time::timeout(Duration::from_secs(5), async {
        while env.fake.balance(env.relayer) < milli_ether(50) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn drips_once_per_address_per_day() -> eyre::Result<()> {
    let env = funded_env(|chain| chain.gas_drip.enabled = true).await?;
    let alice = env.user(U256::ZERO);
    let bob = env.user(U256::ZERO);

    let outcome = env.relay.request_gas_drip(CHAIN, alice, DripRequest::new("test")).await?;
    assert!(matches!(outcome, DripOutcome::Dripped { recipient, .. } if recipient == alice));
    assert_eq!(env.fake.balance(alice), milli_ether(2));
    assert_eq!(env.relay.last_recovery_mode().unwrap().mode, FundingRecoveryMode::SponsorGasDrip);

    let outcome = env.relay.request_gas_drip(CHAIN, alice, DripRequest::new("test")).await?;
    assert_eq!(outcome, DripOutcome::Denied(DripDenial::AddressDailyCapReached));
    assert_eq!(
        env.chain.funding.can_sponsor_drip(&alice.to_string(), milli_ether(2)).await,
        DripEligibility::Denied(DripDenial::AddressDailyCapReached)
    );

    // the global caps still have room
    let outcome = env.relay.request_gas_drip(CHAIN, bob, DripRequest::new("test")).await?;
    assert!(outcome.tx_hash().is_some());

    let status = env.relay.get_relayer_status(CHAIN).await?;
    assert_eq!(status.usage.drips_last_hour, 2);
    assert_eq!(status.usage.drip_spent_today, milli_ether(4));

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn counts_pending_drips_against_caps() -> eyre::Result<()> {
    let env = funded_env(|chain| {
        chain.gas_drip.enabled = true;
        chain.topup.receipt_timeout = Duration::from_millis(50);
    })
    .await?;
    env.fake.hold_receipts();
    let alice = env.user(U256::ZERO);

    let outcome = env.relay.request_gas_drip(CHAIN, alice, DripRequest::new("test")).await?;
    assert!(matches!(outcome, DripOutcome::Pending { recipient, .. } if recipient == alice));
    assert!(env.relay.last_recovery_mode().is_none());

    let outcome = env.relay.request_gas_drip(CHAIN, alice, DripRequest::new("test")).await?;
    assert_eq!(outcome, DripOutcome::Denied(DripDenial::AddressDailyCapReached));

    assert_eq!(env.fake.sent_from(env.funder.unwrap()).len(), 1);
    let status = env.relay.get_relayer_status(CHAIN).await?;
    assert_eq!(status.usage.drips_last_hour, 1);
    assert_eq!(status.usage.drip_spent_today, milli_ether(2));

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn caps_drips_globally() -> eyre::Result<()> {
    let env = funded_env(|chain| {
        chain.gas_drip.enabled = true;
        chain.gas_drip.max_per_hour = 1;
    })
    .await?;

    let first = env.relay.request_gas_drip(CHAIN, env.user(U256::ZERO), DripRequest::new("test")).await?;
    assert!(first.tx_hash().is_some());

    let second =
        env.relay.request_gas_drip(CHAIN, env.user(U256::ZERO), DripRequest::new("test")).await?;
    assert_eq!(second, DripOutcome::Denied(DripDenial::HourlyCapReached));

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn caps_drip_amount_per_day() -> eyre::Result<()> {
    let env = funded_env(|chain| {
        chain.gas_drip.enabled = true;
        chain.gas_drip.max_daily_amount = milli_ether(3);
    })
    .await?;

    let first = env.relay.request_gas_drip(CHAIN, env.user(U256::ZERO), DripRequest::new("test")).await?;
    assert!(first.tx_hash().is_some());

    let second =
        env.relay.request_gas_drip(CHAIN, env.user(U256::ZERO), DripRequest::new("test")).await?;
    assert_eq!(second, DripOutcome::Denied(DripDenial::DailyCapReached));

    let smaller = env
        .relay
        .request_gas_drip(CHAIN, env.user(U256::ZERO), DripRequest::new("test").with_amount(milli_ether(1)))
        .await?;
    assert!(smaller.tx_hash().is_some());

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn denies_drips_it_cannot_send() -> eyre::Result<()> {
    let disabled = funded_env(|_| {}).await?;
    let user = disabled.user(U256::ZERO);
    let outcome = disabled.relay.request_gas_drip(CHAIN, user, DripRequest::new("test")).await?;
    assert_eq!(outcome, DripOutcome::Denied(DripDenial::Disabled));

    let env = funded_env(|chain| chain.gas_drip.enabled = true).await?;
    assert_eq!(
        env.chain.funding.can_sponsor_drip("0x1234", milli_ether(2)).await,
        DripEligibility::Denied(DripDenial::InvalidAddress)
    );
    assert_eq!(
        env.chain.funding.can_sponsor_drip(&alloy::primitives::Address::ZERO.to_string(), milli_ether(2)).await,
        DripEligibility::Denied(DripDenial::InvalidAddress)
    );

    env.fake.set_balance(env.funder.unwrap(), milli_ether(1));
    let user = env.user(U256::ZERO);
    let outcome = env.relay.request_gas_drip(CHAIN, user, DripRequest::new("test")).await?;
    assert_eq!(outcome, DripOutcome::Denied(DripDenial::FundingWalletInsufficient));

    let unfunded = Environment::setup_with(
        EnvironmentConfig::default().with_chain(|chain| chain.gas_drip.enabled = true),
    )
    .await?;
    let user = unfunded.user(U256::ZERO);
    let outcome = unfunded.relay.request_gas_drip(CHAIN, user, DripRequest::new("test")).await?;
    assert_eq!(outcome, DripOutcome::Denied(DripDenial::FundingWalletMissing));

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn background_drips_are_sent_by_the_worker() -> eyre::Result<()> {
    let env = funded_env(|chain| chain.gas_drip.enabled = true).await?;
    let user = env.user(U256::ZERO);

    let outcome =
        env.relay.request_gas_drip(CHAIN, user, DripRequest::new("test").in_background()).await?;
    assert_eq!(outcome, DripOutcome::Queued);

    tokio::time::timeout(Duration::from_secs(5), async {
        while env.fake.balance(user).is_zero() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;

    let drips: Vec<_> = env
        .fake
        .sent_from(env.funder.unwrap())
        .into_iter()
        .filter(|event| matches!(event, ChainEvent::Sent { to, .. } if *to == user))
        .collect();
    assert_eq!(drips.len(), 1);

    Ok(())
}
