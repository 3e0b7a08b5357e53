//! Relay spawn utilities.
use crate::{
    chains::{Chain, ChainContext, ChainSigners, Chains},
    config::RelayConfig,
    lock::{BestEffortLock, PgAdvisoryLockStore},
    metrics,
    policy::FundingPolicy,
    provider::AlloyChainClient,
    queue::ExecutionQueue,
    relay::ExecutionRelay,
    signers::DynSigner,
};
use eyre::{Context, OptionExt};
use metrics_exporter_prometheus::PrometheusHandle;
use std::{path::Path, sync::Arc};
use tokio::task::JoinHandle;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Context returned once the relay is launched.
#[derive(Debug)]
pub struct RelayHandle {
    /// The relay.
    pub relay: ExecutionRelay,
    /// Metrics collector handle, if an exporter was configured.
    pub metrics: Option<PrometheusHandle>,
    /// Background tasks: balance monitors and the queue processor.
    pub tasks: Vec<JoinHandle<()>>,
}

impl RelayHandle {
    /// Stops the background tasks.
    pub fn shutdown(self) {
        for task in self.tasks {
            task.abort();
        }
    }
}

/// Installs a `fmt` subscriber filtered by `RUST_LOG`, defaulting to `info`.
///
/// Does nothing if a global subscriber is already set.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder().with_default_directive(LevelFilter::INFO.into()).from_env_lossy(),
        )
        .try_init();
}

/// Loads the configuration at `config_path`, applies environment overrides and spawns the relay.
pub async fn try_spawn_from_file<P: AsRef<Path>>(config_path: P) -> eyre::Result<RelayHandle> {
    let config = RelayConfig::load_from_file(config_path)?.with_env_overrides()?;
    try_spawn(config).await
}

/// Spawns the relay using the provided [`RelayConfig`].
pub async fn try_spawn(config: RelayConfig) -> eyre::Result<RelayHandle> {
    let metrics = match config.metrics.address {
        Some(addr) => Some(metrics::setup_exporter(addr)?),
        None => None,
    };

    let advisory_lock = if let Some(db_url) = &config.database_url {
        info!("Using PostgreSQL advisory locks.");
        let store =
            PgAdvisoryLockStore::connect_lazy(db_url).wrap_err("invalid database url")?;
        BestEffortLock::new(Arc::new(store))
    } else {
        info!("Using process-local relayer locks only.");
        BestEffortLock::disabled()
    };

    let context = ChainContext { advisory_lock, ..Default::default() };
    let mut tasks = Vec::new();

    let chains = futures_util::future::try_join_all(config.chains.iter().map(
        |(chain, chain_config)| {
            let context = &context;
            let config = &config;
            async move {
                let secrets = config
                    .secrets
                    .chains
                    .get(chain)
                    .ok_or_eyre(format!("missing relayer key for {chain}"))?;

                let relayer = DynSigner::load(&secrets.relayer_key, Some(chain.id()))
                    .await
                    .wrap_err_with(|| format!("failed to load relayer key for {chain}"))?;
                let funding = match &secrets.funding_key {
                    Some(key) => Some(
                        DynSigner::load(key, Some(chain.id()))
                            .await
                            .wrap_err_with(|| format!("failed to load funding key for {chain}"))?,
                    ),
                    None => {
                        warn!(%chain, "No funding wallet, relayer top-ups and gas drips are off");
                        None
                    }
                };

                let client = AlloyChainClient::connect(&chain_config.endpoint)
                    .await
                    .wrap_err_with(|| format!("failed to connect to {chain}"))?;

                info!(
                    %chain,
                    relayer = %relayer.address(),
                    funding = ?funding.as_ref().map(DynSigner::address),
                    "Configured chain"
                );

                eyre::Ok(Chain::new(
                    *chain,
                    Arc::new(client),
                    ChainSigners { relayer, funding },
                    chain_config,
                    config.relayer.clone(),
                    context,
                ))
            }
        },
    ))
    .await?;

    for chain in &chains {
        let Some(chain_config) = config.chains.get(&chain.chain) else { continue };
        let interval = chain_config.topup.balance_check_interval;
        if !interval.is_zero() {
            tasks.push(chain.funding.spawn_balance_monitor(interval));
        }
    }

    let chains = Chains::new(chains);
    let policy = FundingPolicy::new(chains.clone(), config.policy.clone(), context.recovery.clone());
    let queue = ExecutionQueue::new(
        policy.clone(),
        chains.clone(),
        config.queue.clone(),
        config.policy.wallet_fallback_enabled,
    );
    tasks.push(queue.spawn());

    info!(chains = config.chains.len(), "Started execution relay");

    Ok(RelayHandle {
        relay: ExecutionRelay::new(chains, policy, queue, context.recovery),
        metrics,
        tasks,
    })
}
