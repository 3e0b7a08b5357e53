use crate::environment::{CHAIN, Environment, EnvironmentConfig, milli_ether};
use alloy::primitives::{Address, Bytes, U256};
use execution_relay::{
    error::RelayError,
    policy::FundingRecoveryMode,
    queue::{
        EnqueueRequest, QUEUE_TIMEOUT, QueueState, WALLET_FALLBACK, WalletFallbackTx, deferred,
    },
    relayer::RelayRequest,
};
use serde_json::json;
use std::{
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

fn noop(key: &str) -> EnqueueRequest {
    EnqueueRequest::new(key, "corr-1", "req-1", CHAIN, deferred(|| async { Ok(json!("done")) }))
}

fn fallback_tx() -> WalletFallbackTx {
    WalletFallbackTx {
        chain_id: CHAIN.id(),
        to: Address::with_last_byte(0x42),
        data: Bytes::from_static(&[0xab, 0xcd]),
        value: U256::ZERO,
    }
}

async fn stuck_relayer(
    f: impl FnOnce(&mut execution_relay::config::PolicyConfig),
) -> eyre::Result<Environment> {
    Environment::setup_with(
        EnvironmentConfig::default().with_relayer_balance(U256::ZERO).with_policy(f),
    )
    .await
}

/// Scenario D: an execution waits for a relayer that never recovers.
#[tokio::test(flavor = "multi_thread")]
async fn hands_out_wallet_fallback_after_expiry() -> eyre::Result<()> {
    let env = stuck_relayer(|_| {}).await?;
    let queue = env.relay.queue();

    env.relay.enqueue_relayed_execution(
        noop("checkout-1")
            .with_wallet_fallback(fallback_tx())
            .with_max_queue(Duration::from_millis(50)),
    )?;
    env.relay.enqueue_relayed_execution(noop("checkout-2").with_max_queue(Duration::from_millis(50)))?;

    queue.tick().await;
    let pending = env.relay.get_relayed_execution_queue_response("checkout-1");
    assert_eq!(pending.status.as_u16(), 202);
    assert_eq!(pending.body["status"], "queued");
    assert_eq!(pending.body["correlationId"], "corr-1");
    assert_eq!(pending.body["attempts"], 0);

    tokio::time::sleep(Duration::from_millis(100)).await;

    let fallback = env.relay.get_relayed_execution_queue_response("checkout-1");
    assert_eq!(fallback.status.as_u16(), 409);
    assert_eq!(fallback.body["code"], WALLET_FALLBACK);
    assert_eq!(fallback.body["walletFallbackTx"]["to"], json!(Address::with_last_byte(0x42)));

    let timeout = env.relay.get_relayed_execution_queue_response("checkout-2");
    assert_eq!(timeout.status.as_u16(), 503);
    assert_eq!(timeout.body["code"], QUEUE_TIMEOUT);

    assert_eq!(queue.snapshot().count(QueueState::Expired), 2);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn times_out_when_wallet_fallback_is_disabled() -> eyre::Result<()> {
    let env = stuck_relayer(|policy| policy.wallet_fallback_enabled = false).await?;

    env.relay.enqueue_relayed_execution(
        noop("checkout")
            .with_wallet_fallback(fallback_tx())
            .with_max_queue(Duration::from_millis(20)),
    )?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    env.relay.queue().tick().await;

    let response = env.relay.get_relayed_execution_queue_response("checkout");
    assert_eq!(response.status.as_u16(), 503);
    assert_eq!(response.body["code"], QUEUE_TIMEOUT);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn executes_once_the_relayer_can_pay() -> eyre::Result<()> {
    let env = Environment::setup().await?;
    let relay = env.relay.clone();

    env.relay.enqueue_relayed_execution(EnqueueRequest::new(
        "checkout",
        "corr-1",
        "req-1",
        CHAIN,
        deferred(move || {
            let relay = relay.clone();
            async move {
                let request = RelayRequest::new(Address::with_last_byte(0x42), Bytes::new())
                    .with_value(milli_ether(1));
                let tx_hash = relay.send_relayed_tx(CHAIN, request).await?;
                Ok(json!({ "txHash": tx_hash }))
            }
        }),
    ))?;

    env.relay.queue().tick().await;

    let response = env.relay.get_relayed_execution_queue_response("checkout");
    assert_eq!(response.status.as_u16(), 200);
    assert_eq!(response.body["attempts"], 1);
    assert!(response.body["result"]["txHash"].is_string());
    assert_eq!(env.fake.sent_from(env.relayer).len(), 1);
    assert_eq!(env.relay.last_recovery_mode().unwrap().mode, FundingRecoveryMode::Relayed);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn runs_deferred_items_when_capacity_returns() -> eyre::Result<()> {
    let env = stuck_relayer(|_| {}).await?;
    let runs = Arc::new(AtomicU32::new(0));
    let counter = runs.clone();

    env.relay.enqueue_relayed_execution(EnqueueRequest::new(
        "checkout",
        "corr-1",
        "req-1",
        CHAIN,
        deferred(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(json!("done")) }
        }),
    ))?;

    env.relay.queue().tick().await;
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    env.fake.set_balance(env.relayer, milli_ether(1_000));
    env.relay.queue().tick().await;

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(env.relay.get_relayed_execution_queue_response("checkout").status.as_u16(), 200);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn deduplicates_by_key() -> eyre::Result<()> {
    let env = stuck_relayer(|_| {}).await?;

    let first = env.relay.enqueue_relayed_execution(noop("checkout"))?;
    let second = env.relay.enqueue_relayed_execution(noop("checkout"))?;
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(env.relay.queue().snapshot().total(), 1);

    // a finished item is replaced by a new one
    env.fake.set_balance(env.relayer, milli_ether(1_000));
    env.relay.queue().tick().await;
    assert_eq!(first.state(), QueueState::Completed);

    let third = env.relay.enqueue_relayed_execution(noop("checkout"))?;
    assert!(!Arc::ptr_eq(&first, &third));
    assert_eq!(third.state(), QueueState::Queued);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn requeues_retryable_failures() -> eyre::Result<()> {
    let env = Environment::setup().await?;
    let runs = Arc::new(AtomicU32::new(0));
    let counter = runs.clone();

    let item = env.relay.enqueue_relayed_execution(EnqueueRequest::new(
        "checkout",
        "corr-1",
        "req-1",
        CHAIN,
        deferred(move || {
            let run = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if run == 0 {
                    return Err(RelayError::low_balance(milli_ether(10), milli_ether(1)).into());
                }
                Ok(json!("done"))
            }
        }),
    ))?;

    env.relay.queue().tick().await;
    assert_eq!(item.state(), QueueState::Queued);
    assert!(item.last_error().is_some_and(|err| err.contains("relayer balance too low")));

    let response = env.relay.get_relayed_execution_queue_response("checkout");
    assert_eq!(response.status.as_u16(), 202);
    assert_eq!(response.body["attempts"], 1);

    env.relay.queue().tick().await;
    assert_eq!(item.state(), QueueState::Completed);
    assert_eq!(item.attempts(), 2);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn fails_on_non_retryable_errors() -> eyre::Result<()> {
    let env = Environment::setup().await?;

    env.relay.enqueue_relayed_execution(EnqueueRequest::new(
        "checkout",
        "corr-1",
        "req-1",
        CHAIN,
        deferred(|| async { Err(eyre::eyre!("invalid plan")) }),
    ))?;

    env.relay.queue().tick().await;
    env.relay.queue().tick().await;

    let response = env.relay.get_relayed_execution_queue_response("checkout");
    assert_eq!(response.status.as_u16(), 500);
    assert_eq!(response.body["attempts"], 1);
    assert_eq!(response.body["error"], "invalid plan");
    // capacity checks alone do not count as a recovery
    assert!(env.relay.last_recovery_mode().is_none());

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn times_out_slow_executions() -> eyre::Result<()> {
    let env = Environment::setup_with(
        EnvironmentConfig::default()
            .with_queue(|queue| queue.execution_timeout = Duration::from_millis(20)),
    )
    .await?;

    env.relay.enqueue_relayed_execution(EnqueueRequest::new(
        "checkout",
        "corr-1",
        "req-1",
        CHAIN,
        deferred(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(json!("done"))
        }),
    ))?;

    env.relay.queue().tick().await;

    let response = env.relay.get_relayed_execution_queue_response("checkout");
    assert_eq!(response.status.as_u16(), 500);
    assert!(response.body["error"].as_str().is_some_and(|err| err.contains("timed out")));

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn evicts_completed_items_after_retention() -> eyre::Result<()> {
    let env = Environment::setup_with(
        EnvironmentConfig::default().with_queue(|queue| queue.retention = Duration::from_millis(30)),
    )
    .await?;

    env.relay.enqueue_relayed_execution(noop("done"))?;
    env.relay.enqueue_relayed_execution(EnqueueRequest::new(
        "waiting",
        "corr-2",
        "req-2",
        CHAIN,
        deferred(|| async {
            Err(RelayError::low_balance(milli_ether(10), milli_ether(1)).into())
        }),
    ))?;

    env.relay.queue().tick().await;
    assert_eq!(env.relay.get_relayed_execution_queue_response("done").status.as_u16(), 200);
    assert_eq!(env.relay.get_relayed_execution_queue_response("waiting").status.as_u16(), 202);

    tokio::time::sleep(Duration::from_millis(60)).await;
    env.relay.queue().tick().await;

    assert_eq!(env.relay.get_relayed_execution_queue_response("done").status.as_u16(), 404);
    assert_eq!(env.relay.get_relayed_execution_queue_response("waiting").status.as_u16(), 202);
    assert_eq!(env.relay.queue().snapshot().total(), 1);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn evicts_expired_items_after_retention() -> eyre::Result<()> {
    let env = Environment::setup_with(
        EnvironmentConfig::default()
            .with_relayer_balance(U256::ZERO)
            .with_queue(|queue| queue.retention = Duration::from_millis(30)),
    )
    .await?;

    env.relay.enqueue_relayed_execution(noop("expiring").with_max_queue(Duration::from_millis(10)))?;
    env.relay.enqueue_relayed_execution(noop("waiting"))?;

    tokio::time::sleep(Duration::from_millis(20)).await;
    env.relay.queue().tick().await;
    assert_eq!(env.relay.get_relayed_execution_queue_response("expiring").status.as_u16(), 503);

    tokio::time::sleep(Duration::from_millis(60)).await;
    env.relay.queue().tick().await;

    assert_eq!(env.relay.get_relayed_execution_queue_response("expiring").status.as_u16(), 404);
    assert_eq!(env.relay.get_relayed_execution_queue_response("waiting").status.as_u16(), 202);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn answers_unknown_keys_with_not_found() -> eyre::Result<()> {
    let env = Environment::setup().await?;

    let response = env.relay.get_relayed_execution_queue_response("missing");

    assert_eq!(response.status.as_u16(), 404);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn rejects_unknown_chains() -> eyre::Result<()> {
    let env = Environment::setup().await?;

    let request = EnqueueRequest::new(
        "checkout",
        "corr-1",
        "req-1",
        alloy_chains::Chain::from_id(999_999),
        deferred(|| async { Ok(json!("done")) }),
    );

    assert!(env.relay.enqueue_relayed_execution(request).is_err());
    assert_eq!(env.relay.queue().snapshot().total(), 0);

    Ok(())
}
