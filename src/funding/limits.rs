//! Hourly and daily caps on funding transfers.
//!
//! Hourly caps apply to a trailing one hour window, daily caps to the current UTC day.

use super::{DripDenial, TopUpSkipReason};
use crate::config::{GasDripConfig, TopUpConfig};
use alloy::primitives::{Address, B256, U256, map::HashMap};
use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use serde::Serialize;
use std::collections::VecDeque;

/// Length of the trailing window of hourly caps.
const HOUR: TimeDelta = TimeDelta::hours(1);

/// A completed funding transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FundingEvent {
    /// When the transfer was confirmed.
    pub timestamp: DateTime<Utc>,
    /// Amount transferred.
    pub amount: U256,
    /// Recipient of a drip.
    pub recipient: Option<Address>,
    /// Transaction of the transfer.
    pub tx_hash: Option<B256>,
}

impl FundingEvent {
    /// A relayer top-up.
    pub fn topup(timestamp: DateTime<Utc>, amount: U256, tx_hash: B256) -> Self {
        Self { timestamp, amount, recipient: None, tx_hash: Some(tx_hash) }
    }

    /// A gas drip to `recipient`.
    pub fn drip(timestamp: DateTime<Utc>, amount: U256, recipient: Address, tx_hash: B256) -> Self {
        Self { timestamp, amount, recipient: Some(recipient), tx_hash: Some(tx_hash) }
    }
}

/// Usage of the funding caps at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingUsage {
    /// Top-ups in the trailing hour.
    pub topups_last_hour: usize,
    /// Amount topped up in the trailing hour.
    #[serde(with = "crate::serde::ether")]
    pub topup_amount_last_hour: U256,
    /// Amount topped up today.
    #[serde(with = "crate::serde::ether")]
    pub topup_spent_today: U256,
    /// Drips in the trailing hour.
    pub drips_last_hour: usize,
    /// Amount dripped today.
    #[serde(with = "crate::serde::ether")]
    pub drip_spent_today: U256,
}

/// Rate limit state of a chain's funding wallet.
#[derive(Debug, Default)]
pub struct RateLimits {
    /// The UTC day the daily totals belong to.
    day: Option<NaiveDate>,
    topups: VecDeque<FundingEvent>,
    drips: VecDeque<FundingEvent>,
    topup_spent_today: U256,
    drip_spent_today: U256,
    drips_per_address: HashMap<Address, u32>,
}

impl RateLimits {
    /// Resets the daily totals on a new UTC day and drops events that left the hourly window.
    fn roll(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if self.day != Some(today) {
            self.day = Some(today);
            self.topup_spent_today = U256::ZERO;
            self.drip_spent_today = U256::ZERO;
            self.drips_per_address.clear();
        }

        let cutoff = now - HOUR;
        for window in [&mut self.topups, &mut self.drips] {
            while window.front().is_some_and(|event| event.timestamp <= cutoff) {
                window.pop_front();
            }
        }
    }

    /// Returns how much may be topped up right now, or why nothing may be.
    pub fn topup_allowance(
        &mut self,
        now: DateTime<Utc>,
        config: &TopUpConfig,
    ) -> Result<U256, TopUpSkipReason> {
        self.roll(now);

        if self.topups.len() >= config.max_per_hour as usize {
            return Err(TopUpSkipReason::HourlyCapReached);
        }

        let hourly_remaining = match config.max_hourly_amount {
            Some(cap) => cap.saturating_sub(sum(&self.topups)),
            None => U256::MAX,
        };
        if hourly_remaining.is_zero() {
            return Err(TopUpSkipReason::HourlyCapReached);
        }

        let daily_remaining = config.max_daily_amount.saturating_sub(self.topup_spent_today);
        if daily_remaining.is_zero() {
            return Err(TopUpSkipReason::DailyCapReached);
        }

        Ok(hourly_remaining.min(daily_remaining))
    }

    /// Records a confirmed top-up.
    pub fn record_topup(&mut self, event: FundingEvent) {
        self.roll(event.timestamp);
        self.topup_spent_today = self.topup_spent_today.saturating_add(event.amount);
        self.topups.push_back(event);
    }

    /// Returns why a drip of `amount` to `recipient` would exceed a cap, if it would.
    pub fn drip_denial(
        &mut self,
        now: DateTime<Utc>,
        recipient: Address,
        amount: U256,
        config: &GasDripConfig,
    ) -> Option<DripDenial> {
        self.roll(now);

        if self.drips.len() >= config.max_per_hour as usize {
            return Some(DripDenial::HourlyCapReached);
        }
        let received = self.drips_per_address.get(&recipient).copied().unwrap_or_default();
        if received >= config.max_per_address_per_day {
            return Some(DripDenial::AddressDailyCapReached);
        }
        if self.drip_spent_today.saturating_add(amount) > config.max_daily_amount {
            return Some(DripDenial::DailyCapReached);
        }
        None
    }

    /// Records a confirmed drip.
    pub fn record_drip(&mut self, event: FundingEvent) {
        self.roll(event.timestamp);
        self.drip_spent_today = self.drip_spent_today.saturating_add(event.amount);
        if let Some(recipient) = event.recipient {
            *self.drips_per_address.entry(recipient).or_default() += 1;
        }
        self.drips.push_back(event);
    }

    /// Returns the current usage.
    pub fn usage(&mut self, now: DateTime<Utc>) -> FundingUsage {
        self.roll(now);
        FundingUsage {
            topups_last_hour: self.topups.len(),
            topup_amount_last_hour: sum(&self.topups),
            topup_spent_today: self.topup_spent_today,
            drips_last_hour: self.drips.len(),
            drip_spent_today: self.drip_spent_today,
        }
    }
}

fn sum(events: &VecDeque<FundingEvent>) -> U256 {
    events.iter().fold(U256::ZERO, |acc, event| acc.saturating_add(event.amount))
}
