//! Subscription Store
//!
//! The backing store is the single source of truth for balances. Every write
//! is conditional so that concurrent tabs, processes and the renewal sweep
//! cannot interleave into an inconsistent total:
//!
//! ```text
//! UPDATE user_subscription
//!    SET tokens_remaining = tokens_remaining - :cost,
//!        tokens_used      = tokens_used + :cost
//!  WHERE user_id = :user
//!    AND period = :period
//!    AND next_reset_at > :now
//!    AND tokens_remaining >= :cost
//! ```
//!
//! `period` is a counter bumped by every renewal and plan change, so two
//! periods that start in the same instant are still told apart. Ledger rows
//! are only ever written by a debit, stamped with the period they were
//! charged against.
//!
//! [`InMemoryStore`] implements the same contract under one lock and doubles
//! as the local fallback when the real store is unreachable.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::catalog::PlanTier;
use super::model::{TokenUsageRecord, UserSubscription};
use crate::error::StoreError;

/// Conditional debit
#[derive(Debug, Clone)]
pub struct DebitRequest {
    /// Period the caller read; the write fails if a renewal or plan change
    /// happened since
    pub period: u64,
    /// Debit instant
    pub now: DateTime<Utc>,
    /// Ledger row written in the same transaction
    pub usage: TokenUsageRecord,
}

/// Outcome of a conditional debit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebitWrite {
    /// Balance and ledger updated together
    Applied(UserSubscription),
    /// Balance does not cover the cost; nothing written
    Insufficient(UserSubscription),
    /// Period changed or renewal due; nothing written
    Stale(UserSubscription),
}

/// Outcome of a conditional renewal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewWrite {
    /// Balance reset to the plan allotment
    Renewed(UserSubscription),
    /// Someone else renewed first, or renewal not due; nothing written
    Skipped(UserSubscription),
}

/// Row-level access to `user_subscription` and `token_usage`
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Read a user's subscription
    async fn fetch(&self, user_id: &str) -> Result<Option<UserSubscription>, StoreError>;

    /// Insert unless a row exists; returns whichever row is stored afterwards
    async fn insert_if_absent(
        &self,
        subscription: UserSubscription,
    ) -> Result<UserSubscription, StoreError>;

    /// Decrement-if-sufficient plus ledger append, atomically
    async fn debit(&self, user_id: &str, request: DebitRequest) -> Result<DebitWrite, StoreError>;

    /// Reset the balance if the row is still in `period` and the renewal is
    /// due at `now`
    async fn renew(
        &self,
        user_id: &str,
        period: u64,
        now: DateTime<Utc>,
        next_reset_at: DateTime<Utc>,
    ) -> Result<RenewWrite, StoreError>;

    /// Atomic top-up
    async fn credit(&self, user_id: &str, tokens: u32) -> Result<UserSubscription, StoreError>;

    /// Switch plan and start a fresh period
    async fn change_plan(
        &self,
        user_id: &str,
        plan: PlanTier,
        now: DateTime<Utc>,
        next_reset_at: DateTime<Utc>,
    ) -> Result<UserSubscription, StoreError>;

    /// Most recent ledger rows first
    async fn usage_history(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<TokenUsageRecord>, StoreError>;

    /// Ledger rows charged against `period`
    async fn usage_in_period(
        &self,
        user_id: &str,
        period: u64,
    ) -> Result<Vec<TokenUsageRecord>, StoreError>;

    /// Users whose renewal is due at `now`
    async fn due_for_renewal(&self, now: DateTime<Utc>) -> Result<Vec<String>, StoreError>;
}

#[derive(Debug, Default)]
struct Tables {
    subscriptions: HashMap<String, UserSubscription>,
    usage: Vec<TokenUsageRecord>,
}

/// In-process store; both tables behind one lock
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of subscription rows
    pub async fn subscription_count(&self) -> usize {
        self.tables.lock().await.subscriptions.len()
    }

    /// Number of ledger rows
    pub async fn usage_count(&self) -> usize {
        self.tables.lock().await.usage.len()
    }
}

#[async_trait]
impl SubscriptionStore for InMemoryStore {
    async fn fetch(&self, user_id: &str) -> Result<Option<UserSubscription>, StoreError> {
        Ok(self.tables.lock().await.subscriptions.get(user_id).cloned())
    }

    async fn insert_if_absent(
        &self,
        subscription: UserSubscription,
    ) -> Result<UserSubscription, StoreError> {
        let mut tables = self.tables.lock().await;
        let stored = tables
            .subscriptions
            .entry(subscription.user_id.clone())
            .or_insert(subscription);
        Ok(stored.clone())
    }

    async fn debit(&self, user_id: &str, request: DebitRequest) -> Result<DebitWrite, StoreError> {
        let mut tables = self.tables.lock().await;
        let current = tables
            .subscriptions
            .get(user_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(user_id.to_string()))?;

        if current.period != request.period || current.is_due_for_renewal(request.now) {
            return Ok(DebitWrite::Stale(current));
        }

        let Some(updated) = current.debited(request.usage.tokens_used) else {
            return Ok(DebitWrite::Insufficient(current));
        };

        tables
            .subscriptions
            .insert(user_id.to_string(), updated.clone());
        tables.usage.push(TokenUsageRecord {
            period: request.period,
            ..request.usage
        });
        Ok(DebitWrite::Applied(updated))
    }

    async fn renew(
        &self,
        user_id: &str,
        period: u64,
        now: DateTime<Utc>,
        next_reset_at: DateTime<Utc>,
    ) -> Result<RenewWrite, StoreError> {
        let mut tables = self.tables.lock().await;
        let current = tables
            .subscriptions
            .get(user_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(user_id.to_string()))?;

        if current.period != period || !current.is_due_for_renewal(now) {
            return Ok(RenewWrite::Skipped(current));
        }

        let renewed = current.renewed(now, next_reset_at);
        tables
            .subscriptions
            .insert(user_id.to_string(), renewed.clone());
        Ok(RenewWrite::Renewed(renewed))
    }

    async fn credit(&self, user_id: &str, tokens: u32) -> Result<UserSubscription, StoreError> {
        let mut tables = self.tables.lock().await;
        let row = tables
            .subscriptions
            .get_mut(user_id)
            .ok_or_else(|| StoreError::NotFound(user_id.to_string()))?;
        *row = row.credited(tokens);
        Ok(row.clone())
    }

    async fn change_plan(
        &self,
        user_id: &str,
        plan: PlanTier,
        now: DateTime<Utc>,
        next_reset_at: DateTime<Utc>,
    ) -> Result<UserSubscription, StoreError> {
        let mut tables = self.tables.lock().await;
        let row = tables
            .subscriptions
            .get_mut(user_id)
            .ok_or_else(|| StoreError::NotFound(user_id.to_string()))?;
        *row = row.switched(plan, now, next_reset_at);
        Ok(row.clone())
    }

    async fn usage_history(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<TokenUsageRecord>, StoreError> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<TokenUsageRecord> = tables
            .usage
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        // Stable sort keeps insertion order for equal timestamps; reverse after
        rows.sort_by_key(|r| r.created_at);
        rows.reverse();
        rows.truncate(limit);
        Ok(rows)
    }

    async fn usage_in_period(
        &self,
        user_id: &str,
        period: u64,
    ) -> Result<Vec<TokenUsageRecord>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .usage
            .iter()
            .filter(|r| r.user_id == user_id && r.period == period)
            .cloned()
            .collect())
    }

    async fn due_for_renewal(&self, now: DateTime<Utc>) -> Result<Vec<String>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .subscriptions
            .values()
            .filter(|s| s.is_due_for_renewal(now))
            .map(|s| s.user_id.clone())
            .collect())
    }
}
