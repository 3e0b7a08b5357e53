//! Relay configuration.
use crate::constants::{
    BACKOFF_BASE, BACKOFF_CAP, BACKOFF_JITTER, DEFAULT_BALANCE_CHECK_INTERVAL,
    DEFAULT_MAX_GAS_LIMIT, DEFAULT_MAX_QUEUE_TIME, DEFAULT_MAX_SEND_ATTEMPTS,
    DEFAULT_POLICY_TOPUP_TIMEOUT, DEFAULT_RECEIPT_TIMEOUT, GAS_ESTIMATE_MULTIPLIER_PERCENT,
    QUEUE_EXECUTION_TIMEOUT, QUEUE_RETENTION, QUEUE_TICK_INTERVAL, RELAYER_SAFETY_BUFFER,
};
use alloy::primitives::{U256, map::HashMap, uint};
use alloy_chains::Chain;
use eyre::{Context, bail};
use serde::{Deserialize, Serialize};
use std::{fmt, net::SocketAddr, path::Path, time::Duration};
use url::Url;

/// Relay configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Chain configurations.
    #[serde(with = "crate::serde::hash_map")]
    pub chains: HashMap<Chain, ChainConfig>,
    /// Relayer send behaviour shared by all chains.
    #[serde(default)]
    pub relayer: RelayerConfig,
    /// Funding policy configuration.
    #[serde(default)]
    pub policy: PolicyConfig,
    /// Execution queue configuration.
    #[serde(default)]
    pub queue: QueueConfig,
    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Database URL of the advisory lock backend.
    ///
    /// Sends are only serialized within this process if unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
    /// Secrets.
    #[serde(skip_serializing, default)]
    pub secrets: SecretsConfig,
}

impl RelayConfig {
    /// Adds a chain.
    pub fn with_chain(mut self, chain: Chain, config: ChainConfig) -> Self {
        self.chains.insert(chain, config);
        self
    }

    /// Sets the keys of a chain.
    pub fn with_chain_secrets(mut self, chain: Chain, secrets: ChainSecrets) -> Self {
        self.secrets.chains.insert(chain, secrets);
        self
    }

    /// Sets the relayer configuration.
    pub fn with_relayer_config(mut self, relayer: RelayerConfig) -> Self {
        self.relayer = relayer;
        self
    }

    /// Sets the policy configuration.
    pub fn with_policy_config(mut self, policy: PolicyConfig) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the queue configuration.
    pub fn with_queue_config(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    /// Sets the database URL.
    pub fn with_database_url(mut self, database_url: Option<String>) -> Self {
        self.database_url = database_url;
        self
    }

    /// Sets the metrics exporter address.
    pub fn with_metrics_address(mut self, address: Option<SocketAddr>) -> Self {
        self.metrics.address = address;
        self
    }

    /// Enables or disables the wallet-paid fallback.
    pub fn with_wallet_fallback(mut self, enabled: bool) -> Self {
        self.policy.wallet_fallback_enabled = enabled;
        self
    }

    /// Enables or disables gas drips on every configured chain.
    pub fn with_gas_drip(mut self, enabled: bool) -> Self {
        for chain in self.chains.values_mut() {
            chain.gas_drip.enabled = enabled;
        }
        self
    }

    /// Applies overrides from the process environment.
    ///
    /// See [`RelayConfig::with_overrides`] for the recognized variables.
    pub fn with_env_overrides(self) -> eyre::Result<Self> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Applies overrides read through `lookup`.
    ///
    /// Recognized variables:
    /// - `RELAY_DB_URL`
    /// - `GAS_DRIP_ENABLED`, `WALLET_FALLBACK_ENABLED`
    /// - `RPC_URL_<CHAIN_ID>`, `RELAYER_PRIVATE_KEY_<CHAIN_ID>`, `FUNDING_PRIVATE_KEY_<CHAIN_ID>`
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> eyre::Result<Self> {
        if let Some(url) = lookup("RELAY_DB_URL") {
            self.database_url = Some(url);
        }
        if let Some(value) = lookup("GAS_DRIP_ENABLED") {
            self = self.with_gas_drip(parse_flag("GAS_DRIP_ENABLED", &value)?);
        }
        if let Some(value) = lookup("WALLET_FALLBACK_ENABLED") {
            self.policy.wallet_fallback_enabled = parse_flag("WALLET_FALLBACK_ENABLED", &value)?;
        }

        for (chain, config) in self.chains.iter_mut() {
            let id = chain.id();
            if let Some(endpoint) = lookup(&format!("RPC_URL_{id}")) {
                config.endpoint = endpoint
                    .parse()
                    .wrap_err_with(|| format!("invalid RPC_URL_{id}: {endpoint}"))?;
            }

            let relayer_key = lookup(&format!("RELAYER_PRIVATE_KEY_{id}"));
            let funding_key = lookup(&format!("FUNDING_PRIVATE_KEY_{id}"));
            if relayer_key.is_none() && funding_key.is_none() {
                continue;
            }

            match self.secrets.chains.get_mut(chain) {
                Some(secrets) => {
                    if let Some(key) = relayer_key {
                        secrets.relayer_key = key;
                    }
                    if funding_key.is_some() {
                        secrets.funding_key = funding_key;
                    }
                }
                None => {
                    let Some(relayer_key) = relayer_key else {
                        bail!("FUNDING_PRIVATE_KEY_{id} is set but chain {chain} has no relayer key")
                    };
                    self.secrets.chains.insert(*chain, ChainSecrets { relayer_key, funding_key });
                }
            }
        }

        Ok(self)
    }

    /// Load from a YAML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> eyre::Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .wrap_err_with(|| format!("failed to read config file: {}", path.display()))?;
        let config = serde_yaml::from_reader(&file)
            .wrap_err_with(|| format!("failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Save to a YAML file.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> eyre::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

fn parse_flag(name: &str, value: &str) -> eyre::Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("invalid boolean for {name}: {other}"),
    }
}

/// Chain configuration for individual chains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// The RPC endpoint of the chain.
    pub endpoint: Url,
    /// Balance thresholds of the relayer.
    #[serde(default)]
    pub relayer: RelayerBalanceConfig,
    /// Relayer top-up settings.
    #[serde(default)]
    pub topup: TopUpConfig,
    /// Gas drip settings.
    #[serde(default)]
    pub gas_drip: GasDripConfig,
}

impl ChainConfig {
    /// Creates a chain configuration with default thresholds and caps.
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            relayer: Default::default(),
            topup: Default::default(),
            gas_drip: Default::default(),
        }
    }
}

/// Balance thresholds of a relayer.
///
/// The relayer may execute while it holds at least `min_balance`. Top-ups refill it to
/// `target_balance`. Below the minimum but above `operational_floor`, execution is still admitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayerBalanceConfig {
    /// Minimum balance to execute.
    #[serde(with = "crate::serde::ether")]
    pub min_balance: U256,
    /// Balance that top-ups refill to.
    #[serde(with = "crate::serde::ether")]
    pub target_balance: U256,
    /// Balance that still admits execution. Zero disables the floor.
    #[serde(with = "crate::serde::ether")]
    pub operational_floor: U256,
    /// Upper bound of the gas limit of relayed transactions.
    pub max_gas_limit: u64,
}

impl Default for RelayerBalanceConfig {
    fn default() -> Self {
        Self {
            // 0.01 ETH
            min_balance: uint!(10_000_000_000_000_000_U256),
            // 0.05 ETH
            target_balance: uint!(50_000_000_000_000_000_U256),
            // 0.003 ETH
            operational_floor: uint!(3_000_000_000_000_000_U256),
            max_gas_limit: DEFAULT_MAX_GAS_LIMIT,
        }
    }
}

/// Relayer top-up settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopUpConfig {
    /// Whether the funding wallet tops up the relayer.
    pub enabled: bool,
    /// Maximum number of top-ups in any trailing hour.
    pub max_per_hour: u32,
    /// Maximum amount topped up in any trailing hour.
    #[serde(with = "crate::serde::ether::option", skip_serializing_if = "Option::is_none")]
    pub max_hourly_amount: Option<U256>,
    /// Maximum amount topped up per UTC day.
    #[serde(with = "crate::serde::ether")]
    pub max_daily_amount: U256,
    /// How long to wait for a top-up transfer to be included.
    #[serde(with = "crate::serde::duration")]
    pub receipt_timeout: Duration,
    /// Interval of the relayer balance monitor. Zero disables the monitor.
    #[serde(with = "crate::serde::duration")]
    pub balance_check_interval: Duration,
}

impl Default for TopUpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_per_hour: 6,
            max_hourly_amount: None,
            // 0.5 ETH
            max_daily_amount: uint!(500_000_000_000_000_000_U256),
            receipt_timeout: DEFAULT_RECEIPT_TIMEOUT,
            balance_check_interval: DEFAULT_BALANCE_CHECK_INTERVAL,
        }
    }
}

/// Settings for sponsoring gas of user wallets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GasDripConfig {
    /// Whether drips are sponsored.
    pub enabled: bool,
    /// Default amount of a drip.
    #[serde(with = "crate::serde::ether")]
    pub amount: U256,
    /// Maximum number of drips in any trailing hour.
    pub max_per_hour: u32,
    /// Maximum number of drips a single address receives per UTC day.
    pub max_per_address_per_day: u32,
    /// Maximum amount dripped per UTC day.
    #[serde(with = "crate::serde::ether")]
    pub max_daily_amount: U256,
}

impl Default for GasDripConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // 0.002 ETH
            amount: uint!(2_000_000_000_000_000_U256),
            max_per_hour: 20,
            max_per_address_per_day: 1,
            // 0.1 ETH
            max_daily_amount: uint!(100_000_000_000_000_000_U256),
        }
    }
}

/// Send behaviour of the relayers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayerConfig {
    /// Attempts per relayed send.
    pub max_attempts: u32,
    /// Percentage applied to gas estimates.
    pub gas_multiplier_percent: u64,
    /// Amount held back on top of gas cost and value.
    #[serde(with = "crate::serde::ether")]
    pub safety_buffer: U256,
    /// Base delay of the retry backoff.
    #[serde(with = "crate::serde::duration::millis")]
    pub backoff_base: Duration,
    /// Cap of the exponential part of the retry backoff.
    #[serde(with = "crate::serde::duration::millis")]
    pub backoff_cap: Duration,
    /// Maximum random jitter added to each backoff.
    #[serde(with = "crate::serde::duration::millis")]
    pub backoff_jitter: Duration,
}

impl Default for RelayerConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_SEND_ATTEMPTS,
            gas_multiplier_percent: GAS_ESTIMATE_MULTIPLIER_PERCENT,
            safety_buffer: RELAYER_SAFETY_BUFFER,
            backoff_base: BACKOFF_BASE,
            backoff_cap: BACKOFF_CAP,
            backoff_jitter: BACKOFF_JITTER,
        }
    }
}

/// Funding policy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Whether users may pay gas from their own wallets when the relayer cannot.
    pub wallet_fallback_enabled: bool,
    /// Balance a user wallet needs to pay for its own execution.
    #[serde(with = "crate::serde::ether")]
    pub min_user_gas: U256,
    /// Default bound of a synchronous top-up requested through the policy.
    #[serde(with = "crate::serde::duration::millis")]
    pub topup_timeout: Duration,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            wallet_fallback_enabled: true,
            // 0.001 ETH
            min_user_gas: uint!(1_000_000_000_000_000_U256),
            topup_timeout: DEFAULT_POLICY_TOPUP_TIMEOUT,
        }
    }
}

/// Execution queue configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Interval between queue ticks.
    #[serde(with = "crate::serde::duration::millis")]
    pub tick_interval: Duration,
    /// Bound of a single execution attempt.
    #[serde(with = "crate::serde::duration")]
    pub execution_timeout: Duration,
    /// Default lifetime of a queued item.
    #[serde(with = "crate::serde::duration")]
    pub default_max_queue: Duration,
    /// How long terminal items stay pollable.
    #[serde(with = "crate::serde::duration")]
    pub retention: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            tick_interval: QUEUE_TICK_INTERVAL,
            execution_timeout: QUEUE_EXECUTION_TIMEOUT,
            default_max_queue: DEFAULT_MAX_QUEUE_TIME,
            retention: QUEUE_RETENTION,
        }
    }
}

/// Metrics configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Address to serve Prometheus metrics on. Metrics are not exported if unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<SocketAddr>,
}

/// Secrets (kept out of serialized output).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecretsConfig {
    /// Keys per chain.
    #[serde(default, deserialize_with = "crate::serde::hash_map::deserialize")]
    pub chains: HashMap<Chain, ChainSecrets>,
}

/// Keys of a chain. Each is either a hex private key or an AWS KMS key id.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct ChainSecrets {
    /// Key of the relaying identity.
    pub relayer_key: String,
    /// Key of the funding wallet. Top-ups and drips are disabled without it.
    #[serde(default)]
    pub funding_key: Option<String>,
}

impl fmt::Debug for ChainSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainSecrets")
            .field("relayer_key", &"<redacted>")
            .field("funding_key", &self.funding_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
