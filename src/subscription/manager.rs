// Subscription Manager
//
// One manager per process, constructed at startup and shared by cloning.
// The backing store owns every balance; the manager only keeps a cached
// view of the last row it saw per user, replaced on every operation.
//
// Per-user state machine:
//
//   NO_SUBSCRIPTION --get_or_create--> ACTIVE <--renewal-- FOR_RENEWAL
//                                        |  ^                  ^
//                        insufficient    |  | renewal/purchase |
//                                        v  |                  |
//                                     EXHAUSTED ---now >= next_reset_at
//
// Degraded mode: when the store is unreachable while a user's subscription
// is first loaded, that user is served from a local FREE subscription held in
// an `InMemoryStore` until `reconnect` succeeds.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::catalog::{Feature, PlanTier, TokenPackage};
use super::config::{StoreConfig, SubscriptionConfig};
use super::ledger::QuotaLedger;
use super::model::{SubscriptionState, TokenUsageRecord, UsageSummary, UserSubscription};
use super::payment::{PaymentProvider, PurchaseItem, PurchaseResult};
use super::store::{DebitRequest, DebitWrite, InMemoryStore, RenewWrite, SubscriptionStore};
use crate::clock::Clock;
use crate::error::{AccessError, StoreError};
use crate::metrics;

/// Result of an atomic debit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebitOutcome {
    /// Balance decremented and ledger row written
    Debited {
        /// Ledger row written with the debit
        record: TokenUsageRecord,
        /// Row as confirmed by the store
        subscription: UserSubscription,
    },
    /// Nothing written
    Insufficient {
        /// Cost of the feature
        required: u32,
        /// Balance the store reported
        remaining: u32,
    },
}

impl DebitOutcome {
    pub fn is_debited(&self) -> bool {
        matches!(self, DebitOutcome::Debited { .. })
    }
}

/// Initialization result shown to the UI
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionSnapshot {
    pub subscription: UserSubscription,
    pub state: SubscriptionState,
    /// Warning to surface when served from the local fallback
    pub degraded: Option<String>,
}

#[derive(Debug, Clone)]
struct CachedView {
    subscription: UserSubscription,
    exhausted: bool,
}

/// Owns the subscription lifecycle for every user
#[derive(Clone)]
pub struct SubscriptionManager {
    config: SubscriptionConfig,
    store_config: StoreConfig,
    clock: Arc<dyn Clock>,
    primary: Arc<dyn SubscriptionStore>,
    fallback: InMemoryStore,
    degraded: Arc<RwLock<HashMap<String, String>>>,
    cache: Arc<RwLock<HashMap<String, CachedView>>>,
    payments: Option<Arc<dyn PaymentProvider>>,
}

impl SubscriptionManager {
    pub fn new(
        config: SubscriptionConfig,
        store_config: StoreConfig,
        primary: Arc<dyn SubscriptionStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            store_config,
            clock,
            primary,
            fallback: InMemoryStore::new(),
            degraded: Arc::new(RwLock::new(HashMap::new())),
            cache: Arc::new(RwLock::new(HashMap::new())),
            payments: None,
        }
    }

    /// Attach the payment provider used by purchases and plan changes
    pub fn with_payments(mut self, payments: Arc<dyn PaymentProvider>) -> Self {
        self.payments = Some(payments);
        self
    }

    pub fn config(&self) -> &SubscriptionConfig {
        &self.config
    }

    /// Load the user's subscription, creating a FREE one on first access and
    /// applying a due renewal
    pub async fn get_or_create(&self, user_id: &str) -> Result<UserSubscription, AccessError> {
        let (_, subscription) = self.resolve(user_id).await?;
        Ok(subscription)
    }

    /// `get_or_create` plus the state and degraded warning
    pub async fn initialize(&self, user_id: &str) -> Result<SubscriptionSnapshot, AccessError> {
        let subscription = self.get_or_create(user_id).await?;
        let state = self.state_of(&subscription, self.is_exhausted(user_id).await);
        Ok(SubscriptionSnapshot {
            subscription,
            state,
            degraded: self.is_degraded(user_id).await,
        })
    }

    /// Current lifecycle state. Does not create a subscription.
    pub async fn state(&self, user_id: &str) -> Result<SubscriptionState, AccessError> {
        let store = self.store_for(user_id).await;
        let Some(subscription) = store.fetch(user_id).await? else {
            return Ok(SubscriptionState::NoSubscription);
        };
        Ok(self.state_of(&subscription, self.is_exhausted(user_id).await))
    }

    pub async fn has_enough_tokens(&self, user_id: &str, feature: Feature) -> Result<bool, AccessError> {
        Ok(self.get_or_create(user_id).await?.can_afford(feature))
    }

    /// Plan gating, independent of the balance
    pub async fn is_feature_available(&self, user_id: &str, feature: Feature) -> Result<bool, AccessError> {
        let subscription = self.get_or_create(user_id).await?;
        Ok(subscription.is_active && subscription.plan.includes(feature))
    }

    /// Debit the feature's cost in one conditional write.
    ///
    /// The write runs on its own task: dropping the returned future does not
    /// cancel a debit that has started, it either lands or does not.
    pub async fn deduct_tokens(
        &self,
        user_id: &str,
        feature: Feature,
        document_name: Option<&str>,
    ) -> Result<DebitOutcome, AccessError> {
        let manager = self.clone();
        let user_id = user_id.to_string();
        let document_name = document_name.map(str::to_string);

        tokio::spawn(async move {
            manager
                .debit_to_completion(&user_id, feature, document_name.as_deref())
                .await
        })
        .await
        .map_err(|e| AccessError::StoreUnavailable(format!("debit task failed: {}", e)))?
    }

    async fn debit_to_completion(
        &self,
        user_id: &str,
        feature: Feature,
        document_name: Option<&str>,
    ) -> Result<DebitOutcome, AccessError> {
        let (store, mut subscription) = self.resolve(user_id).await?;
        let ledger = QuotaLedger::new(store.clone(), self.clock.clone());
        let attempts = self.config.debit_retry_limit.max(1);

        for attempt in 1..=attempts {
            let usage = ledger.entry(user_id, subscription.period, feature, document_name);
            let request = DebitRequest {
                period: subscription.period,
                now: usage.created_at,
                usage: usage.clone(),
            };

            match store.debit(user_id, request).await? {
                DebitWrite::Applied(updated) => {
                    metrics::TOKENS_DEBITED_TOTAL
                        .with_label_values(&[feature.as_str()])
                        .inc_by(u64::from(usage.tokens_used));
                    info!(
                        user_id = %user_id,
                        feature = %feature,
                        cost = usage.tokens_used,
                        remaining = updated.tokens_remaining,
                        "Tokens debited"
                    );
                    self.remember(updated.clone(), false).await;
                    return Ok(DebitOutcome::Debited {
                        record: usage,
                        subscription: updated,
                    });
                }
                DebitWrite::Insufficient(current) => {
                    debug!(
                        user_id = %user_id,
                        feature = %feature,
                        remaining = current.tokens_remaining,
                        "Insufficient tokens"
                    );
                    let remaining = current.tokens_remaining;
                    self.remember(current, true).await;
                    return Ok(DebitOutcome::Insufficient {
                        required: feature.cost(),
                        remaining,
                    });
                }
                DebitWrite::Stale(current) => {
                    debug!(user_id = %user_id, attempt, "Debit raced a renewal, retrying");
                    subscription = if current.is_due_for_renewal(self.clock.now()) {
                        self.renew_in(store.as_ref(), current).await?.0
                    } else {
                        current
                    };
                }
            }
        }

        warn!(user_id = %user_id, attempts, "Debit did not settle");
        Err(AccessError::StoreUnavailable(format!(
            "debit for {} did not settle after {} attempts",
            user_id, attempts
        )))
    }

    /// Apply the renewal transition if it is due. Returns the renewed row when
    /// this call performed the renewal.
    pub async fn renew_if_due(&self, user_id: &str) -> Result<Option<UserSubscription>, AccessError> {
        let store = self.store_for(user_id).await;
        let Some(subscription) = store.fetch(user_id).await? else {
            return Ok(None);
        };
        if !subscription.is_due_for_renewal(self.clock.now()) {
            return Ok(None);
        }

        let (subscription, renewed) = self.renew_in(store.as_ref(), subscription).await?;
        Ok(renewed.then_some(subscription))
    }

    /// Renew every subscription whose period has ended
    pub async fn renew_due(&self) -> usize {
        let now = self.clock.now();
        let mut renewed = 0;

        match self.primary.due_for_renewal(now).await {
            Ok(users) => renewed += self.renew_users(self.primary.as_ref(), &users).await,
            Err(e) => warn!("Renewal sweep could not list due subscriptions: {}", e),
        }

        let degraded: Vec<String> = self.degraded.read().await.keys().cloned().collect();
        if !degraded.is_empty() {
            if let Ok(users) = self.fallback.due_for_renewal(now).await {
                let users: Vec<String> = users.into_iter().filter(|u| degraded.contains(u)).collect();
                renewed += self.renew_users(&self.fallback, &users).await;
            }
        }

        renewed
    }

    async fn renew_users(&self, store: &dyn SubscriptionStore, users: &[String]) -> usize {
        let mut renewed = 0;
        for user_id in users {
            let result = match store.fetch(user_id).await {
                Ok(Some(subscription)) => self.renew_in(store, subscription).await,
                Ok(None) => continue,
                Err(e) => Err(e),
            };
            match result {
                Ok((_, true)) => renewed += 1,
                Ok((_, false)) => {}
                Err(e) => warn!(user_id = %user_id, "Renewal failed: {}", e),
            }
        }
        renewed
    }

    /// Run `renew_due` on the configured interval
    pub fn spawn_renewal_sweep(&self) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(manager.config.renewal_sweep_interval());
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                interval.tick().await;
                let renewed = manager.renew_due().await;
                if renewed > 0 {
                    info!("Renewal sweep renewed {} subscriptions", renewed);
                }
            }
        })
    }

    /// Rounded share of the plan allotment spent, 0..=100
    pub async fn get_usage_percentage(&self, user_id: &str) -> Result<u8, AccessError> {
        Ok(self.get_or_create(user_id).await?.usage_percentage())
    }

    pub async fn is_low_on_tokens(&self, user_id: &str) -> Result<bool, AccessError> {
        Ok(self
            .get_or_create(user_id)
            .await?
            .is_low_on_tokens(self.config.low_balance_ratio))
    }

    /// Charge for a token package, then credit it
    pub async fn purchase_tokens(&self, user_id: &str, package_id: &str) -> PurchaseResult {
        let Some(package) = TokenPackage::find(package_id) else {
            metrics::PURCHASES_TOTAL.with_label_values(&["tokens", "rejected"]).inc();
            return PurchaseResult::failed(format!("Unknown token package: {}", package_id));
        };

        let store = match self.charge(user_id, PurchaseItem::Tokens(package)).await {
            Ok(store) => store,
            Err(result) => return result,
        };

        match store.credit(user_id, package.tokens).await {
            Ok(updated) => {
                info!(
                    user_id = %user_id,
                    package = package.id,
                    tokens = package.tokens,
                    "Token package credited"
                );
                metrics::PURCHASES_TOTAL.with_label_values(&["tokens", "success"]).inc();
                self.remember(updated, false).await;
                PurchaseResult::ok()
            }
            Err(e) => {
                error!(user_id = %user_id, package = package.id, "Charged but credit failed: {}", e);
                metrics::PURCHASES_TOTAL.with_label_values(&["tokens", "failed"]).inc();
                PurchaseResult::failed(AccessError::from(e).to_string())
            }
        }
    }

    /// Switch tier; the balance resets to the new allotment and a new period
    /// starts
    pub async fn change_plan(&self, user_id: &str, plan: PlanTier) -> PurchaseResult {
        match self.get_or_create(user_id).await {
            Ok(current) if current.plan == plan => {
                return PurchaseResult::failed(format!("Already on the {} plan", plan));
            }
            Ok(_) => {}
            Err(e) => return PurchaseResult::failed(e.to_string()),
        }

        let store = match self.charge(user_id, PurchaseItem::Plan(plan)).await {
            Ok(store) => store,
            Err(result) => return result,
        };

        let now = self.clock.now();
        match store
            .change_plan(user_id, plan, now, now + self.config.renewal_period())
            .await
        {
            Ok(updated) => {
                info!(user_id = %user_id, plan = %plan, "Plan changed");
                metrics::PURCHASES_TOTAL.with_label_values(&["plan", "success"]).inc();
                self.remember(updated, false).await;
                PurchaseResult::ok()
            }
            Err(e) => {
                error!(user_id = %user_id, plan = %plan, "Charged but plan change failed: {}", e);
                metrics::PURCHASES_TOTAL.with_label_values(&["plan", "failed"]).inc();
                PurchaseResult::failed(AccessError::from(e).to_string())
            }
        }
    }

    async fn charge(
        &self,
        user_id: &str,
        item: PurchaseItem,
    ) -> Result<Arc<dyn SubscriptionStore>, PurchaseResult> {
        let kind = item.kind();
        let (store, _) = self
            .resolve(user_id)
            .await
            .map_err(|e| PurchaseResult::failed(e.to_string()))?;

        if item.price_usd() == 0 {
            return Ok(store);
        }

        let Some(payments) = &self.payments else {
            metrics::PURCHASES_TOTAL.with_label_values(&[kind, "rejected"]).inc();
            return Err(PurchaseResult::failed("Payments are not configured"));
        };

        if let Err(e) = payments.charge(user_id, &item).await {
            warn!(user_id = %user_id, kind, "Payment failed: {}", e);
            metrics::PURCHASES_TOTAL.with_label_values(&[kind, "failed"]).inc();
            return Err(PurchaseResult::failed(e.to_string()));
        }

        Ok(store)
    }

    /// Up to `limit` ledger rows, most recent first
    pub async fn usage_history(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<TokenUsageRecord>, AccessError> {
        let store = self.store_for(user_id).await;
        Ok(QuotaLedger::new(store, self.clock.clone())
            .history_for(user_id, limit)
            .await?)
    }

    pub async fn usage_summary(&self, user_id: &str) -> Result<UsageSummary, AccessError> {
        let (store, subscription) = self.resolve(user_id).await?;
        let by_feature = QuotaLedger::new(store, self.clock.clone())
            .summary_by_feature(user_id)
            .await?;

        Ok(UsageSummary {
            plan: subscription.plan,
            state: self.state_of(&subscription, self.is_exhausted(user_id).await),
            tokens_remaining: subscription.tokens_remaining,
            tokens_used: subscription.tokens_used,
            total_tokens: subscription.plan_tokens(),
            usage_percentage: subscription.usage_percentage(),
            low_on_tokens: subscription.is_low_on_tokens(self.config.low_balance_ratio),
            by_feature,
            next_reset_at: subscription.next_reset_at,
            degraded: self.is_degraded(user_id).await,
        })
    }

    /// Last row seen for the user. A view only; the store is authoritative.
    pub async fn cached(&self, user_id: &str) -> Option<UserSubscription> {
        self.cache
            .read()
            .await
            .get(user_id)
            .map(|view| view.subscription.clone())
    }

    /// Warning for users served from the local fallback
    pub async fn is_degraded(&self, user_id: &str) -> Option<String> {
        self.degraded.read().await.get(user_id).cloned()
    }

    /// Leave degraded mode once the store answers again. The local balance is
    /// dropped in favor of the stored one.
    pub async fn reconnect(&self, user_id: &str) -> Result<bool, AccessError> {
        if self.is_degraded(user_id).await.is_none() {
            return Ok(false);
        }

        let subscription = self.load_or_insert(self.primary.as_ref(), user_id).await?;
        if self.degraded.write().await.remove(user_id).is_some() {
            metrics::DEGRADED_SUBSCRIPTIONS.dec();
        }
        info!(user_id = %user_id, "Subscription store reachable again");
        self.remember(subscription, false).await;
        Ok(true)
    }

    async fn store_for(&self, user_id: &str) -> Arc<dyn SubscriptionStore> {
        if self.degraded.read().await.contains_key(user_id) {
            Arc::new(self.fallback.clone())
        } else {
            self.primary.clone()
        }
    }

    async fn resolve(
        &self,
        user_id: &str,
    ) -> Result<(Arc<dyn SubscriptionStore>, UserSubscription), AccessError> {
        let store = self.store_for(user_id).await;

        let subscription = match self.load_or_insert(store.as_ref(), user_id).await {
            Ok(subscription) => subscription,
            Err(StoreError::Unavailable(reason)) => {
                if !self.can_degrade(user_id).await {
                    return Err(StoreError::Unavailable(reason).into());
                }
                self.enter_degraded(user_id, &reason).await;
                let fallback: Arc<dyn SubscriptionStore> = Arc::new(self.fallback.clone());
                let subscription = self.load_or_insert(fallback.as_ref(), user_id).await?;
                self.remember(subscription.clone(), false).await;
                return Ok((fallback, subscription));
            }
            Err(e) => return Err(e.into()),
        };

        let subscription = if subscription.is_due_for_renewal(self.clock.now()) {
            self.renew_in(store.as_ref(), subscription).await?.0
        } else {
            subscription
        };

        self.refresh_view(subscription.clone()).await;
        Ok((store, subscription))
    }

    async fn load_or_insert(
        &self,
        store: &dyn SubscriptionStore,
        user_id: &str,
    ) -> Result<UserSubscription, StoreError> {
        if let Some(subscription) = store.fetch(user_id).await? {
            return Ok(subscription);
        }

        let created = store
            .insert_if_absent(UserSubscription::free(
                user_id,
                self.clock.now(),
                self.config.renewal_period(),
            ))
            .await?;
        info!(user_id = %user_id, plan = %created.plan, "Subscription created");
        Ok(created)
    }

    async fn renew_in(
        &self,
        store: &dyn SubscriptionStore,
        subscription: UserSubscription,
    ) -> Result<(UserSubscription, bool), StoreError> {
        let now = self.clock.now();
        let next_reset_at = now + self.config.renewal_period();

        match store
            .renew(&subscription.user_id, subscription.period, now, next_reset_at)
            .await?
        {
            RenewWrite::Renewed(renewed) => {
                metrics::RENEWALS_TOTAL.inc();
                info!(
                    user_id = %renewed.user_id,
                    tokens = renewed.tokens_remaining,
                    next_reset_at = %renewed.next_reset_at,
                    "Subscription renewed"
                );
                self.remember(renewed.clone(), false).await;
                Ok((renewed, true))
            }
            RenewWrite::Skipped(current) => Ok((current, false)),
        }
    }

    async fn can_degrade(&self, user_id: &str) -> bool {
        self.store_config.fallback_on_unavailable
            && !self.cache.read().await.contains_key(user_id)
            && !self.degraded.read().await.contains_key(user_id)
    }

    async fn enter_degraded(&self, user_id: &str, reason: &str) {
        let warning = format!(
            "Subscription service unavailable ({}); using a temporary Free plan",
            reason
        );
        let mut degraded = self.degraded.write().await;
        if degraded.insert(user_id.to_string(), warning).is_none() {
            metrics::DEGRADED_SUBSCRIPTIONS.inc();
            warn!(
                user_id = %user_id,
                reason = %reason,
                "Subscription store unavailable, serving local Free subscription"
            );
        }
    }

    fn state_of(&self, subscription: &UserSubscription, exhausted: bool) -> SubscriptionState {
        if subscription.is_due_for_renewal(self.clock.now()) {
            SubscriptionState::ForRenewal
        } else if exhausted || subscription.tokens_remaining < Feature::cheapest_cost() {
            SubscriptionState::Exhausted
        } else {
            SubscriptionState::Active
        }
    }

    async fn is_exhausted(&self, user_id: &str) -> bool {
        self.cache
            .read()
            .await
            .get(user_id)
            .is_some_and(|view| view.exhausted)
    }

    async fn remember(&self, subscription: UserSubscription, exhausted: bool) {
        self.cache.write().await.insert(
            subscription.user_id.clone(),
            CachedView {
                subscription,
                exhausted,
            },
        );
    }

    /// Replace the cached row, keeping the exhausted flag while the period is
    /// unchanged
    async fn refresh_view(&self, subscription: UserSubscription) {
        let mut cache = self.cache.write().await;
        let exhausted = cache.get(&subscription.user_id).is_some_and(|view| {
            view.exhausted
                && view.subscription.period == subscription.period
                && view.subscription.tokens_remaining == subscription.tokens_remaining
        });
        cache.insert(
            subscription.user_id.clone(),
            CachedView {
                subscription,
                exhausted,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::subscription::payment::PaymentError;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, Utc};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Store wrapper that can be switched off
    #[derive(Clone, Default)]
    struct SwitchableStore {
        inner: InMemoryStore,
        down: Arc<AtomicBool>,
    }

    impl SwitchableStore {
        fn check(&self) -> Result<(), StoreError> {
            if self.down.load(Ordering::SeqCst) {
                Err(StoreError::Unavailable("connection refused".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl SubscriptionStore for SwitchableStore {
        async fn fetch(&self, user_id: &str) -> Result<Option<UserSubscription>, StoreError> {
            self.check()?;
            self.inner.fetch(user_id).await
        }

        async fn insert_if_absent(&self, s: UserSubscription) -> Result<UserSubscription, StoreError> {
            self.check()?;
            self.inner.insert_if_absent(s).await
        }

        async fn debit(&self, user_id: &str, r: DebitRequest) -> Result<DebitWrite, StoreError> {
            self.check()?;
            self.inner.debit(user_id, r).await
        }

        async fn renew(
            &self,
            user_id: &str,
            period: u64,
            now: DateTime<Utc>,
            next: DateTime<Utc>,
        ) -> Result<RenewWrite, StoreError> {
            self.check()?;
            self.inner.renew(user_id, period, now, next).await
        }

        async fn credit(&self, user_id: &str, tokens: u32) -> Result<UserSubscription, StoreError> {
            self.check()?;
            self.inner.credit(user_id, tokens).await
        }

        async fn change_plan(
            &self,
            user_id: &str,
            plan: PlanTier,
            now: DateTime<Utc>,
            next: DateTime<Utc>,
        ) -> Result<UserSubscription, StoreError> {
            self.check()?;
            self.inner.change_plan(user_id, plan, now, next).await
        }

        async fn usage_history(&self, user_id: &str, limit: usize) -> Result<Vec<TokenUsageRecord>, StoreError> {
            self.check()?;
            self.inner.usage_history(user_id, limit).await
        }

        async fn usage_in_period(
            &self,
            user_id: &str,
            period: u64,
        ) -> Result<Vec<TokenUsageRecord>, StoreError> {
            self.check()?;
            self.inner.usage_in_period(user_id, period).await
        }

        async fn due_for_renewal(&self, now: DateTime<Utc>) -> Result<Vec<String>, StoreError> {
            self.check()?;
            self.inner.due_for_renewal(now).await
        }
    }

    struct CountingPayments {
        charges: AtomicUsize,
        decline: bool,
    }

    #[async_trait]
    impl PaymentProvider for CountingPayments {
        async fn charge(&self, _user_id: &str, _item: &PurchaseItem) -> Result<(), PaymentError> {
            self.charges.fetch_add(1, Ordering::SeqCst);
            if self.decline {
                Err(PaymentError::Declined("card expired".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn setup() -> (SubscriptionManager, SwitchableStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let store = SwitchableStore::default();
        let manager = SubscriptionManager::new(
            SubscriptionConfig::default(),
            StoreConfig::default(),
            Arc::new(store.clone()),
            clock.clone(),
        );
        (manager, store, clock)
    }

    fn with_payments(manager: SubscriptionManager, decline: bool) -> (SubscriptionManager, Arc<CountingPayments>) {
        let payments = Arc::new(CountingPayments {
            charges: AtomicUsize::new(0),
            decline,
        });
        (manager.with_payments(payments.clone()), payments)
    }

    #[tokio::test]
    async fn test_get_or_create_free_subscription() {
        let (manager, store, clock) = setup();

        assert_eq!(
            manager.state("user-1").await.unwrap(),
            SubscriptionState::NoSubscription
        );

        let sub = manager.get_or_create("user-1").await.unwrap();
        assert_eq!(sub.plan, PlanTier::Free);
        assert_eq!(sub.tokens_remaining, 50);
        assert_eq!(sub.tokens_used, 0);
        assert_eq!(sub.next_reset_at, clock.now() + Duration::days(30));
        assert!(sub.is_active);
        assert_eq!(store.inner.subscription_count().await, 1);

        // Second access reuses the row
        manager.get_or_create("user-1").await.unwrap();
        assert_eq!(store.inner.subscription_count().await, 1);
        assert_eq!(manager.state("user-1").await.unwrap(), SubscriptionState::Active);
    }

    #[tokio::test]
    async fn test_oversized_renewal_period_is_capped() {
        let clock = Arc::new(ManualClock::starting_now());
        let manager = SubscriptionManager::new(
            SubscriptionConfig {
                renewal_period_days: 100_000_000,
                ..SubscriptionConfig::default()
            },
            StoreConfig::default(),
            Arc::new(SwitchableStore::default()),
            clock.clone(),
        );

        let sub = manager.get_or_create("user-1").await.unwrap();
        assert_eq!(sub.next_reset_at, clock.now() + Duration::days(3650));
    }

    #[tokio::test]
    async fn test_deduct_until_insufficient() {
        let (manager, store, _clock) = setup();

        for _ in 0..5 {
            let outcome = manager
                .deduct_tokens("user-1", Feature::DocumentAnalysis, Some("lease.pdf"))
                .await
                .unwrap();
            assert!(outcome.is_debited());
        }

        let outcome = manager
            .deduct_tokens("user-1", Feature::DocumentAnalysis, None)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            DebitOutcome::Insufficient {
                required: 10,
                remaining: 0
            }
        );

        let sub = manager.get_or_create("user-1").await.unwrap();
        assert_eq!(sub.tokens_remaining, 0);
        assert_eq!(sub.tokens_used, 50);
        assert!(sub.is_conserved());
        assert_eq!(store.inner.usage_count().await, 5);
        assert_eq!(manager.state("user-1").await.unwrap(), SubscriptionState::Exhausted);
    }

    #[tokio::test]
    async fn test_insufficient_marks_exhausted_with_balance_left() {
        let (manager, _store, _clock) = setup();
        manager.get_or_create("user-1").await.unwrap();
        manager.deduct_tokens("user-1", Feature::DocumentAnalysis, None).await.unwrap();
        // 40 left; deep search costs 25, twice is too much
        manager.deduct_tokens("user-1", Feature::DeepSearch, None).await.unwrap();
        let outcome = manager.deduct_tokens("user-1", Feature::DeepSearch, None).await.unwrap();

        assert!(!outcome.is_debited());
        assert_eq!(manager.state("user-1").await.unwrap(), SubscriptionState::Exhausted);

        // A cheaper feature still goes through and clears the flag
        assert!(manager
            .deduct_tokens("user-1", Feature::ClauseExplanation, None)
            .await
            .unwrap()
            .is_debited());
        assert_eq!(manager.state("user-1").await.unwrap(), SubscriptionState::Active);
    }

    #[tokio::test]
    async fn test_concurrent_debits_never_overspend() {
        let (manager, _store, _clock) = setup();
        for _ in 0..4 {
            manager.deduct_tokens("user-1", Feature::DocumentAnalysis, None).await.unwrap();
        }

        let (a, b) = tokio::join!(
            manager.deduct_tokens("user-1", Feature::DocumentAnalysis, None),
            manager.deduct_tokens("user-1", Feature::DocumentAnalysis, None),
        );
        let successes = [a.unwrap(), b.unwrap()]
            .iter()
            .filter(|o| o.is_debited())
            .count();

        assert_eq!(successes, 1);
        assert_eq!(manager.get_or_create("user-1").await.unwrap().tokens_remaining, 0);
    }

    #[tokio::test]
    async fn test_lazy_renewal_on_access() {
        let (manager, _store, clock) = setup();
        manager.deduct_tokens("user-1", Feature::DocumentAnalysis, None).await.unwrap();

        clock.advance(Duration::days(30));
        assert_eq!(
            manager.state("user-1").await.unwrap(),
            SubscriptionState::ForRenewal
        );

        let sub = manager.get_or_create("user-1").await.unwrap();
        assert_eq!(sub.tokens_remaining, 50);
        assert_eq!(sub.tokens_used, 0);
        assert_eq!(sub.last_reset_at, clock.now());
        assert_eq!(sub.next_reset_at, clock.now() + Duration::days(30));
    }

    #[tokio::test]
    async fn test_debit_after_period_end_applies_to_new_period() {
        let (manager, _store, clock) = setup();
        manager.deduct_tokens("user-1", Feature::DocumentAnalysis, None).await.unwrap();
        clock.advance(Duration::days(31));

        let outcome = manager
            .deduct_tokens("user-1", Feature::DocumentAnalysis, None)
            .await
            .unwrap();
        match outcome {
            DebitOutcome::Debited { subscription, .. } => {
                assert_eq!(subscription.tokens_remaining, 40);
                assert_eq!(subscription.last_reset_at, clock.now());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_renew_if_due_is_idempotent() {
        let (manager, _store, clock) = setup();
        manager.deduct_tokens("user-1", Feature::DocumentAnalysis, None).await.unwrap();

        assert!(manager.renew_if_due("user-1").await.unwrap().is_none());

        clock.advance(Duration::days(30));
        let first = manager.renew_if_due("user-1").await.unwrap();
        let second = manager.renew_if_due("user-1").await.unwrap();

        assert_eq!(first.map(|s| s.tokens_remaining), Some(50));
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_renew_due_sweep() {
        let (manager, _store, clock) = setup();
        manager.get_or_create("user-1").await.unwrap();
        clock.advance(Duration::days(10));
        manager.get_or_create("user-2").await.unwrap();

        clock.advance(Duration::days(20));
        assert_eq!(manager.renew_due().await, 1);
        assert_eq!(manager.renew_due().await, 0);
    }

    #[tokio::test]
    async fn test_usage_percentage_and_low_balance() {
        let (manager, _store, _clock) = setup();
        for _ in 0..4 {
            manager.deduct_tokens("user-1", Feature::DocumentAnalysis, None).await.unwrap();
        }
        assert_eq!(manager.get_usage_percentage("user-1").await.unwrap(), 80);
        assert!(!manager.is_low_on_tokens("user-1").await.unwrap());

        manager.deduct_tokens("user-1", Feature::ClauseExplanation, None).await.unwrap();
        assert_eq!(manager.get_usage_percentage("user-1").await.unwrap(), 90);
        // 5 of 50 left is exactly 10%, not below it
        assert!(!manager.is_low_on_tokens("user-1").await.unwrap());

        manager.deduct_tokens("user-1", Feature::ClauseExplanation, None).await.unwrap();
        assert!(manager.is_low_on_tokens("user-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_feature_gating() {
        let (manager, _store, _clock) = setup();
        assert!(manager
            .is_feature_available("user-1", Feature::DocumentAnalysis)
            .await
            .unwrap());
        assert!(!manager
            .is_feature_available("user-1", Feature::DeepSearch)
            .await
            .unwrap());
        assert!(manager
            .has_enough_tokens("user-1", Feature::DeepSearch)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_purchase_tokens() {
        let (manager, _store, _clock) = setup();
        let (manager, payments) = with_payments(manager, false);

        manager.deduct_tokens("user-1", Feature::DocumentAnalysis, None).await.unwrap();
        let before = manager.get_or_create("user-1").await.unwrap();

        assert_eq!(manager.purchase_tokens("user-1", "small").await, PurchaseResult::ok());

        let after = manager.get_or_create("user-1").await.unwrap();
        assert_eq!(after.tokens_remaining, 140);
        assert_eq!(after.tokens_used, before.tokens_used);
        assert_eq!(after.next_reset_at, before.next_reset_at);
        assert!(after.is_conserved());
        assert_eq!(payments.charges.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_purchase_failures() {
        let (manager, _store, _clock) = setup();
        let result = manager.purchase_tokens("user-1", "small").await;
        assert_eq!(result.error.as_deref(), Some("Payments are not configured"));

        let (manager, payments) = with_payments(manager, true);
        let result = manager.purchase_tokens("user-1", "huge").await;
        assert!(!result.success);
        assert_eq!(payments.charges.load(Ordering::SeqCst), 0);

        let result = manager.purchase_tokens("user-1", "small").await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("card expired"));
        assert_eq!(manager.get_or_create("user-1").await.unwrap().tokens_remaining, 50);
    }

    #[tokio::test]
    async fn test_change_plan() {
        let (manager, _store, clock) = setup();
        let (manager, _payments) = with_payments(manager, false);
        manager.deduct_tokens("user-1", Feature::DocumentAnalysis, None).await.unwrap();
        clock.advance(Duration::days(3));

        assert!(manager.change_plan("user-1", PlanTier::Pro).await.success);
        let sub = manager.get_or_create("user-1").await.unwrap();
        assert_eq!(sub.plan, PlanTier::Pro);
        assert_eq!(sub.tokens_remaining, 2000);
        assert_eq!(sub.tokens_used, 0);
        assert_eq!(sub.last_reset_at, clock.now());
        assert!(manager
            .is_feature_available("user-1", Feature::DeepSearch)
            .await
            .unwrap());

        assert!(!manager.change_plan("user-1", PlanTier::Pro).await.success);
    }

    #[tokio::test]
    async fn test_change_plan_in_debit_instant_resets_ledger_view() {
        let (manager, store, _clock) = setup();
        let (manager, _payments) = with_payments(manager, false);

        manager
            .deduct_tokens("user-1", Feature::DocumentAnalysis, None)
            .await
            .unwrap();
        // The clock does not move: the new period starts in the same instant
        assert!(manager.change_plan("user-1", PlanTier::Starter).await.success);

        let summary = manager.usage_summary("user-1").await.unwrap();
        assert_eq!(summary.tokens_used, 0);
        assert_eq!(summary.by_feature.values().sum::<u32>(), summary.tokens_used);

        manager
            .deduct_tokens("user-1", Feature::RedactionReview, None)
            .await
            .unwrap();
        let sub = store.inner.fetch("user-1").await.unwrap().unwrap();
        let ledger_sum: u32 = store
            .inner
            .usage_in_period("user-1", sub.period)
            .await
            .unwrap()
            .iter()
            .map(|r| r.tokens_used)
            .sum();
        assert_eq!(ledger_sum, sub.tokens_used);
        assert_eq!(ledger_sum, 15);
        assert_eq!(manager.usage_history("user-1", 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_sweep_in_debit_instant_keeps_ledger_in_step() {
        let (manager, store, clock) = setup();
        manager
            .deduct_tokens("user-1", Feature::DocumentAnalysis, None)
            .await
            .unwrap();
        clock.advance(Duration::days(30));

        // The debit renews lazily, then lands in the new period; the sweep in
        // the same instant finds nothing due
        manager
            .deduct_tokens("user-1", Feature::ClauseExplanation, None)
            .await
            .unwrap();
        assert_eq!(manager.renew_due().await, 0);

        let sub = store.inner.fetch("user-1").await.unwrap().unwrap();
        assert_eq!(sub.period, 2);
        assert_eq!(sub.tokens_used, 5);
        let summary = manager.usage_summary("user-1").await.unwrap();
        assert_eq!(summary.by_feature.values().sum::<u32>(), 5);
    }

    #[tokio::test]
    async fn test_degraded_fallback_at_initialization() {
        let (manager, store, _clock) = setup();
        store.down.store(true, Ordering::SeqCst);

        let snapshot = manager.initialize("user-1").await.unwrap();
        assert_eq!(snapshot.subscription.plan, PlanTier::Free);
        assert_eq!(snapshot.state, SubscriptionState::Active);
        assert!(snapshot.degraded.unwrap().contains("connection refused"));

        // Features keep working against the local subscription
        assert!(manager
            .deduct_tokens("user-1", Feature::DocumentAnalysis, None)
            .await
            .unwrap()
            .is_debited());
        assert_eq!(manager.usage_history("user-1", 10).await.unwrap().len(), 1);

        store.down.store(false, Ordering::SeqCst);
        assert!(manager.reconnect("user-1").await.unwrap());
        assert!(manager.is_degraded("user-1").await.is_none());
        assert_eq!(manager.get_or_create("user-1").await.unwrap().tokens_remaining, 50);
    }

    #[tokio::test]
    async fn test_store_failure_after_initialization_is_reported() {
        let (manager, store, _clock) = setup();
        manager.get_or_create("user-1").await.unwrap();
        store.down.store(true, Ordering::SeqCst);

        let result = manager
            .deduct_tokens("user-1", Feature::DocumentAnalysis, None)
            .await;
        assert!(matches!(result, Err(AccessError::StoreUnavailable(_))));
        assert!(manager.is_degraded("user-1").await.is_none());

        store.down.store(false, Ordering::SeqCst);
        assert_eq!(store.inner.usage_count().await, 0);
        assert_eq!(manager.get_or_create("user-1").await.unwrap().tokens_remaining, 50);
    }

    #[tokio::test]
    async fn test_fallback_disabled() {
        let clock = Arc::new(ManualClock::starting_now());
        let store = SwitchableStore::default();
        store.down.store(true, Ordering::SeqCst);
        let manager = SubscriptionManager::new(
            SubscriptionConfig::default(),
            StoreConfig {
                fallback_on_unavailable: false,
            },
            Arc::new(store),
            clock,
        );

        assert!(matches!(
            manager.get_or_create("user-1").await,
            Err(AccessError::StoreUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_usage_summary() {
        let (manager, _store, _clock) = setup();
        manager
            .deduct_tokens("user-1", Feature::DocumentAnalysis, Some("a.pdf"))
            .await
            .unwrap();
        manager
            .deduct_tokens("user-1", Feature::ClauseExplanation, None)
            .await
            .unwrap();

        let summary = manager.usage_summary("user-1").await.unwrap();
        assert_eq!(summary.tokens_remaining, 35);
        assert_eq!(summary.tokens_used, 15);
        assert_eq!(summary.total_tokens, 50);
        assert_eq!(summary.usage_percentage, 30);
        assert_eq!(summary.by_feature.get(&Feature::DocumentAnalysis), Some(&10));
        assert!(summary.degraded.is_none());
        assert_eq!(manager.cached("user-1").await.map(|s| s.tokens_remaining), Some(35));
    }
}
