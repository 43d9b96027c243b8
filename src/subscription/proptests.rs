//! Property-Based Tests for Token Quotas
//!
//! # Test Strategies
//!
//! - **Conservation**: after every debit, renewal, purchase or plan change,
//!   `tokens_remaining + tokens_used == allotment + purchased_tokens`
//! - **Ledger agreement**: the ledger rows of the current period sum to
//!   `tokens_used`, including when a new period starts in the same instant
//!   as earlier debits
//! - **Debit exactness**: a debit either moves exactly the feature cost or
//!   changes nothing
//! - **Derived views**: usage percentage stays within 0..=100
//!
//! # Running the Tests
//!
//! ```bash
//! cargo test --lib subscription::proptests
//! ```

use async_trait::async_trait;
use chrono::Duration;
use proptest::prelude::*;
use std::sync::Arc;

use crate::clock::{Clock, ManualClock};
use crate::subscription::catalog::{Feature, PlanTier, TOKEN_PACKAGES};
use crate::subscription::config::{StoreConfig, SubscriptionConfig};
use crate::subscription::manager::{DebitOutcome, SubscriptionManager};
use crate::subscription::model::UserSubscription;
use crate::subscription::payment::{PaymentError, PaymentProvider, PurchaseItem};
use crate::subscription::store::{InMemoryStore, SubscriptionStore};

struct ApproveAll;

#[async_trait]
impl PaymentProvider for ApproveAll {
    async fn charge(&self, _user_id: &str, _item: &PurchaseItem) -> Result<(), PaymentError> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum Op {
    Debit(Feature),
    Advance(i64),
    Sweep,
    Purchase(usize),
    ChangePlan(PlanTier),
}

fn arb_feature() -> impl Strategy<Value = Feature> {
    prop::sample::select(Feature::ALL.to_vec())
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => arb_feature().prop_map(Op::Debit),
        2 => (1i64..40).prop_map(Op::Advance),
        1 => Just(Op::Sweep),
        1 => (0..TOKEN_PACKAGES.len()).prop_map(Op::Purchase),
        1 => prop::sample::select(PlanTier::ALL.to_vec()).prop_map(Op::ChangePlan),
    ]
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

async fn stored(store: &InMemoryStore) -> UserSubscription {
    store.fetch("user-1").await.unwrap().unwrap()
}

async fn ledger_sum(store: &InMemoryStore, period: u64) -> u32 {
    store
        .usage_in_period("user-1", period)
        .await
        .unwrap()
        .iter()
        .map(|row| row.tokens_used)
        .sum()
}

proptest! {
    #[test]
    fn prop_balances_are_conserved(ops in prop::collection::vec(arb_op(), 1..60)) {
        runtime().block_on(async {
            let clock = Arc::new(ManualClock::starting_now());
            let store = InMemoryStore::new();
            let manager = SubscriptionManager::new(
                SubscriptionConfig::default(),
                StoreConfig::default(),
                Arc::new(store.clone()),
                clock.clone(),
            )
            .with_payments(Arc::new(ApproveAll));

            manager.get_or_create("user-1").await.unwrap();

            for op in ops {
                let before = stored(&store).await;

                match op {
                    Op::Debit(feature) => {
                        let outcome = manager.deduct_tokens("user-1", feature, None).await.unwrap();
                        let after = stored(&store).await;
                        match outcome {
                            DebitOutcome::Debited { .. } => {
                                if before.period == after.period {
                                    prop_assert_eq!(after.tokens_used, before.tokens_used + feature.cost());
                                }
                            }
                            DebitOutcome::Insufficient { required, remaining } => {
                                prop_assert_eq!(required, feature.cost());
                                prop_assert!(remaining < required);
                                prop_assert_eq!(after.tokens_remaining, remaining);
                            }
                        }
                    }
                    Op::Advance(days) => clock.advance(Duration::days(days)),
                    Op::Sweep => {
                        manager.renew_due().await;
                    }
                    Op::Purchase(index) => {
                        let result = manager.purchase_tokens("user-1", TOKEN_PACKAGES[index].id).await;
                        prop_assert!(result.success);
                    }
                    Op::ChangePlan(plan) => {
                        manager.change_plan("user-1", plan).await;
                    }
                }

                let after = stored(&store).await;
                prop_assert!(after.is_conserved(), "not conserved: {:?}", after);
                prop_assert!(after.next_reset_at > after.last_reset_at);
                prop_assert!(after.period >= before.period);
                prop_assert_eq!(ledger_sum(&store, after.period).await, after.tokens_used);
            }

            // Nothing due is left after a sweep
            manager.renew_due().await;
            let last = stored(&store).await;
            prop_assert!(!last.is_due_for_renewal(clock.now()));
            prop_assert_eq!(ledger_sum(&store, last.period).await, last.tokens_used);

            let summary = manager.usage_summary("user-1").await.unwrap();
            prop_assert_eq!(summary.by_feature.values().sum::<u32>(), summary.tokens_used);
            Ok(())
        })?;
    }

    #[test]
    fn prop_usage_percentage_bounded(used in 0u32..5000, purchased in 0u32..3000) {
        let mut sub = UserSubscription::free("user-1", chrono::Utc::now(), Duration::days(30));
        sub = sub.credited(purchased);
        let used = used.min(sub.tokens_remaining);
        let sub = sub.debited(used).unwrap();
        prop_assert!(sub.usage_percentage() <= 100);
        prop_assert!(sub.is_conserved());
    }
}
