//! Quota Ledger
//!
//! Append-only record of token debits. Rows are never mutated and only the
//! store's conditional debit writes them, so a row exists exactly when its
//! balance change does.

use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use super::catalog::Feature;
use super::model::TokenUsageRecord;
use super::store::SubscriptionStore;
use crate::clock::Clock;
use crate::error::StoreError;

/// Read view over the `token_usage` table
#[derive(Clone)]
pub struct QuotaLedger {
    store: Arc<dyn SubscriptionStore>,
    clock: Arc<dyn Clock>,
}

impl QuotaLedger {
    /// Create a ledger over a store
    pub fn new(store: Arc<dyn SubscriptionStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Build the row for a debit against `period` happening now. It is
    /// written by [`SubscriptionStore::debit`] together with the balance.
    pub fn entry(
        &self,
        user_id: &str,
        period: u64,
        feature: Feature,
        document_name: Option<&str>,
    ) -> TokenUsageRecord {
        TokenUsageRecord {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            feature,
            tokens_used: feature.cost(),
            period,
            document_name: document_name.map(str::to_string),
            created_at: self.clock.now(),
        }
    }

    /// Up to `limit` rows, most recent first. Re-query to restart.
    pub async fn history_for(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<TokenUsageRecord>, StoreError> {
        self.store.usage_history(user_id, limit).await
    }

    /// Tokens spent per feature in the user's current period
    pub async fn summary_by_feature(&self, user_id: &str) -> Result<BTreeMap<Feature, u32>, StoreError> {
        let Some(subscription) = self.store.fetch(user_id).await? else {
            return Ok(BTreeMap::new());
        };

        let rows = self
            .store
            .usage_in_period(user_id, subscription.period)
            .await?;

        let mut summary = BTreeMap::new();
        for row in rows {
            *summary.entry(row.feature).or_insert(0) += row.tokens_used;
        }
        Ok(summary)
    }
}
