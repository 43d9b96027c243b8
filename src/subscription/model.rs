//! Persisted rows and derived views
//!
//! `UserSubscription` maps to the `user_subscription` table and
//! `TokenUsageRecord` to the append-only `token_usage` table.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::catalog::{Feature, PlanTier};

/// One user's plan instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSubscription {
    /// Owner
    pub user_id: String,
    /// Current tier
    pub plan: PlanTier,
    /// Tokens left in this period
    pub tokens_remaining: u32,
    /// Tokens spent in this period
    pub tokens_used: u32,
    /// Tokens bought on top of the allotment in this period
    #[serde(default)]
    pub purchased_tokens: u32,
    /// Counter of the current period, bumped by every renewal and plan change.
    /// Debits and renewals are conditional on it; ledger rows carry it.
    #[serde(default = "first_period")]
    pub period: u64,
    /// Start of the current period
    pub last_reset_at: DateTime<Utc>,
    /// Instant the next renewal becomes due
    pub next_reset_at: DateTime<Utc>,
    /// Inactive subscriptions may not invoke any feature
    pub is_active: bool,
}

impl UserSubscription {
    /// Fresh subscription at the start of a period
    pub fn new(user_id: impl Into<String>, plan: PlanTier, now: DateTime<Utc>, period: Duration) -> Self {
        Self {
            user_id: user_id.into(),
            plan,
            tokens_remaining: plan.total_tokens(),
            tokens_used: 0,
            purchased_tokens: 0,
            period: first_period(),
            last_reset_at: now,
            next_reset_at: now + period,
            is_active: true,
        }
    }

    /// Default subscription for a new account
    pub fn free(user_id: impl Into<String>, now: DateTime<Utc>, period: Duration) -> Self {
        Self::new(user_id, PlanTier::Free, now, period)
    }

    /// Allotment of the plan
    pub fn plan_tokens(&self) -> u32 {
        self.plan.total_tokens()
    }

    /// `remaining + used == allotment + purchased`
    pub fn is_conserved(&self) -> bool {
        u64::from(self.tokens_remaining) + u64::from(self.tokens_used)
            == u64::from(self.plan_tokens()) + u64::from(self.purchased_tokens)
    }

    /// Whether the renewal transition is due
    pub fn is_due_for_renewal(&self, now: DateTime<Utc>) -> bool {
        now >= self.next_reset_at
    }

    /// Whether the balance covers a feature
    pub fn can_afford(&self, feature: Feature) -> bool {
        self.tokens_remaining >= feature.cost()
    }

    /// Share of the plan allotment spent, rounded, clamped to 100
    pub fn usage_percentage(&self) -> u8 {
        let total = self.plan_tokens();
        if total == 0 {
            return 100;
        }
        let percent = (f64::from(self.tokens_used) * 100.0 / f64::from(total)).round();
        percent.min(100.0) as u8
    }

    /// Remaining balance below `ratio` of the plan allotment
    pub fn is_low_on_tokens(&self, ratio: f64) -> bool {
        let total = self.plan_tokens();
        if total == 0 {
            return true;
        }
        f64::from(self.tokens_remaining) / f64::from(total) < ratio
    }

    /// Balance after a debit of `cost`; `None` if it does not cover it
    pub fn debited(&self, cost: u32) -> Option<Self> {
        let tokens_remaining = self.tokens_remaining.checked_sub(cost)?;
        Some(Self {
            tokens_remaining,
            tokens_used: self.tokens_used.saturating_add(cost),
            ..self.clone()
        })
    }

    /// State after the renewal transition at `now`
    pub fn renewed(&self, now: DateTime<Utc>, next_reset_at: DateTime<Utc>) -> Self {
        Self {
            is_active: self.is_active,
            ..self.switched(self.plan, now, next_reset_at)
        }
    }

    /// State after moving to `plan`; a plan change starts a fresh period
    pub fn switched(&self, plan: PlanTier, now: DateTime<Utc>, next_reset_at: DateTime<Utc>) -> Self {
        Self {
            plan,
            tokens_remaining: plan.total_tokens(),
            tokens_used: 0,
            purchased_tokens: 0,
            period: self.period + 1,
            last_reset_at: now,
            next_reset_at,
            is_active: true,
            ..self.clone()
        }
    }

    /// State after a top-up
    pub fn credited(&self, tokens: u32) -> Self {
        Self {
            tokens_remaining: self.tokens_remaining.saturating_add(tokens),
            purchased_tokens: self.purchased_tokens.saturating_add(tokens),
            ..self.clone()
        }
    }
}

/// One successful debit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsageRecord {
    /// Row id
    pub id: Uuid,
    /// Debited user
    pub user_id: String,
    /// Invoked feature
    pub feature: Feature,
    /// Cost charged
    pub tokens_used: u32,
    /// Subscription period the debit was charged against
    #[serde(default = "first_period")]
    pub period: u64,
    /// Document the feature ran on, when there is one
    pub document_name: Option<String>,
    /// Debit instant
    pub created_at: DateTime<Utc>,
}

fn first_period() -> u64 {
    1
}

/// Lifecycle of a user's subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionState {
    /// No row yet; created on first authenticated access
    NoSubscription,
    /// Usable
    Active,
    /// Balance does not cover the last requested feature
    Exhausted,
    /// Period over; renewal pending
    ForRenewal,
}

/// Everything the account page shows
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageSummary {
    /// Current tier
    pub plan: PlanTier,
    /// Lifecycle state
    pub state: SubscriptionState,
    /// Tokens left
    pub tokens_remaining: u32,
    /// Tokens spent this period
    pub tokens_used: u32,
    /// Plan allotment
    pub total_tokens: u32,
    /// Rounded share of the allotment spent
    pub usage_percentage: u8,
    /// Below the low-balance threshold
    pub low_on_tokens: bool,
    /// Tokens spent per feature in the current period
    pub by_feature: BTreeMap<Feature, u32>,
    /// Next renewal
    pub next_reset_at: DateTime<Utc>,
    /// Set when served from the local fallback store
    pub degraded: Option<String>,
}
