//! The configured settlement chains and their per-chain services.

use crate::{
    config::{ChainConfig, RelayerConfig},
    funding::FundingService,
    lock::BestEffortLock,
    policy::RecoveryTracker,
    provider::ChainClient,
    relayer::{Relayer, SendLocks},
    signers::DynSigner,
};
use std::{collections::HashMap, sync::Arc};

pub use alloy_chains::Chain as SettlementChain;

/// Signing identities of a chain.
#[derive(Debug, Clone)]
pub struct ChainSigners {
    /// The relaying identity.
    pub relayer: DynSigner,
    /// The funding wallet, if top-ups and drips are possible.
    pub funding: Option<DynSigner>,
}

/// State shared by the services of all chains.
#[derive(Debug, Clone, Default)]
pub struct ChainContext {
    /// Local send locks of relaying identities.
    pub send_locks: SendLocks,
    /// Cross-instance lock of relaying identities.
    pub advisory_lock: BestEffortLock,
    /// Last funding recovery mode.
    pub recovery: RecoveryTracker,
}

/// A single supported chain.
#[derive(Debug, Clone)]
pub struct Chain {
    /// The chain.
    pub chain: SettlementChain,
    /// Client of the chain.
    pub client: Arc<dyn ChainClient>,
    /// Relayer of the chain.
    pub relayer: Relayer,
    /// Funding of the chain's relayer.
    pub funding: FundingService,
}

impl Chain {
    /// Wires the services of `chain`.
    ///
    /// Spawns the funding worker, so this must be called within a Tokio runtime.
    pub fn new(
        chain: SettlementChain,
        client: Arc<dyn ChainClient>,
        signers: ChainSigners,
        config: &ChainConfig,
        relayer_config: RelayerConfig,
        context: &ChainContext,
    ) -> Self {
        let funding = FundingService::new(
            chain,
            client.clone(),
            signers.relayer.address(),
            signers.funding,
            config,
            context.recovery.clone(),
        );
        let relayer = Relayer::new(
            chain,
            client.clone(),
            signers.relayer,
            funding.clone(),
            &context.send_locks,
            context.advisory_lock.clone(),
            relayer_config,
            config.relayer.max_gas_limit,
        );
        Self { chain, client, relayer, funding }
    }
}

/// A collection of supported chains.
#[derive(Clone, Default)]
pub struct Chains {
    chains: Arc<HashMap<SettlementChain, Chain>>,
}

impl Chains {
    /// Creates a new instance of [`Chains`].
    pub fn new(chains: impl IntoIterator<Item = Chain>) -> Self {
        Self { chains: Arc::new(chains.into_iter().map(|chain| (chain.chain, chain)).collect()) }
    }

    /// Get a chain.
    pub fn get(&self, chain: SettlementChain) -> Option<Chain> {
        self.chains.get(&chain).cloned()
    }

    /// Whether `chain` is configured.
    pub fn contains(&self, chain: SettlementChain) -> bool {
        self.chains.contains_key(&chain)
    }

    /// Get an iterator over the supported chains.
    pub fn iter(&self) -> impl Iterator<Item = &Chain> {
        self.chains.values()
    }
}

impl std::fmt::Debug for Chains {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chains").field("chains", &self.chains.keys()).finish()
    }
}
