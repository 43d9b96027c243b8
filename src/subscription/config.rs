//! Subscription Configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default billing period length
pub const DEFAULT_RENEWAL_PERIOD_DAYS: u32 = 30;

/// Longest billing period accepted (about ten years)
pub const MAX_RENEWAL_PERIOD_DAYS: u32 = 3650;

/// Default low-balance threshold (10% of the allotment)
pub const DEFAULT_LOW_BALANCE_RATIO: f64 = 0.10;

/// Longest pause between renewal sweeps (1 day)
pub const MAX_RENEWAL_SWEEP_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// Subscription manager configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SubscriptionConfig {
    /// Days between renewals
    pub renewal_period_days: u32,

    /// Remaining/allotment ratio below which a user is low on tokens
    pub low_balance_ratio: f64,

    /// Attempts at a debit when a renewal races it
    pub debit_retry_limit: u32,

    /// Seconds between scheduled renewal sweeps
    pub renewal_sweep_interval_secs: u64,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            renewal_period_days: DEFAULT_RENEWAL_PERIOD_DAYS,
            low_balance_ratio: DEFAULT_LOW_BALANCE_RATIO,
            debit_retry_limit: 3,
            renewal_sweep_interval_secs: 3600,
        }
    }
}

impl SubscriptionConfig {
    /// Billing period, capped at [`MAX_RENEWAL_PERIOD_DAYS`]
    pub fn renewal_period(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.renewal_period_days.min(MAX_RENEWAL_PERIOD_DAYS)))
    }

    /// Sweep interval, capped at [`MAX_RENEWAL_SWEEP_INTERVAL_SECS`]
    pub fn renewal_sweep_interval(&self) -> Duration {
        Duration::from_secs(
            self.renewal_sweep_interval_secs
                .min(MAX_RENEWAL_SWEEP_INTERVAL_SECS),
        )
    }
}

/// Backing store configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Serve users from a local FREE subscription when the store is down at
    /// initialization
    pub fallback_on_unavailable: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            fallback_on_unavailable: true,
        }
    }
}
