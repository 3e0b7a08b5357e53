use super::FundingUsage;
use alloy::primitives::{Address, B256, U256};
use alloy_chains::Chain;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Point-in-time view of a chain's relayer and funding wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayerStatus {
    /// The chain.
    pub chain: Chain,
    /// Address of the relayer.
    pub relayer_address: Address,
    /// Current relayer balance.
    #[serde(with = "crate::serde::ether")]
    pub balance: U256,
    /// Minimum balance to execute.
    #[serde(with = "crate::serde::ether")]
    pub min_balance: U256,
    /// Balance top-ups refill to.
    #[serde(with = "crate::serde::ether")]
    pub target_balance: U256,
    /// Balance that still admits execution.
    #[serde(with = "crate::serde::ether")]
    pub operational_floor: U256,
    /// Whether the balance is at least the minimum.
    pub ok_to_execute: bool,
    /// Whether the balance is at least the operational floor.
    pub operational: bool,
    /// Error of the last failed top-up, cleared by a successful one.
    pub last_error: Option<String>,
    /// When the relayer was last topped up.
    pub last_topup_at: Option<DateTime<Utc>>,
    /// Transaction of the last top-up.
    pub last_topup_tx: Option<B256>,
    /// Address of the funding wallet.
    pub funding_address: Option<Address>,
    /// Balance of the funding wallet.
    #[serde(with = "crate::serde::ether::option")]
    pub funding_balance: Option<U256>,
    /// Usage of the funding caps.
    pub usage: FundingUsage,
    /// Configured funding caps.
    pub caps: FundingCaps,
}

impl RelayerStatus {
    /// Whether relayed execution may go ahead.
    pub const fn is_operable(&self) -> bool {
        self.ok_to_execute || self.operational
    }

    /// Amount the relayer lacks to reach its minimum balance.
    pub fn missing(&self) -> U256 {
        self.min_balance.saturating_sub(self.balance)
    }
}

/// Configured funding caps of a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingCaps {
    /// Top-ups per trailing hour.
    pub topups_per_hour: u32,
    /// Amount topped up per trailing hour.
    #[serde(with = "crate::serde::ether::option")]
    pub topup_hourly_amount: Option<U256>,
    /// Amount topped up per UTC day.
    #[serde(with = "crate::serde::ether")]
    pub topup_daily_amount: U256,
    /// Drips per trailing hour.
    pub drips_per_hour: u32,
    /// Drips per address and UTC day.
    pub drips_per_address_per_day: u32,
    /// Amount dripped per UTC day.
    #[serde(with = "crate::serde::ether")]
    pub drip_daily_amount: U256,
}
