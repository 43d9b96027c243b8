//! Shared fixtures for the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use lexgate::clock::{Clock, ManualClock};
use lexgate::rate_limit::{AttemptLimiter, RateLimitConfig};
use lexgate::session::{
    AuthGateway, Credentials, IdentityProvider, ProviderError, Session, SessionConfig,
    SessionValidator,
};
use lexgate::subscription::{
    DebitRequest, DebitWrite, InMemoryStore, PaymentError, PaymentProvider, PlanTier,
    PurchaseItem, RenewWrite, StoreConfig, SubscriptionConfig, SubscriptionManager,
    SubscriptionStore, TokenUsageRecord, UserSubscription,
};
use lexgate::{AccessGuard, StoreError};

/// Identity provider with a fixed account table
pub struct FakeIdentity {
    clock: Arc<ManualClock>,
    accounts: HashMap<String, (String, String)>,
    pub sign_in_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub fail_refresh: AtomicBool,
}

impl FakeIdentity {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        let mut accounts = HashMap::new();
        accounts.insert(
            "a@b.com".to_string(),
            ("user-1".to_string(), "correct horse".to_string()),
        );
        accounts.insert(
            "c@d.com".to_string(),
            ("user-2".to_string(), "battery staple".to_string()),
        );
        Self {
            clock,
            accounts,
            sign_in_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            fail_refresh: AtomicBool::new(false),
        }
    }

    fn session_for(&self, user_id: &str) -> Session {
        Session::new(
            user_id,
            format!("access-{}", uuid::Uuid::new_v4()),
            format!("refresh-{}", user_id),
            self.clock.now() + Duration::hours(1),
        )
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentity {
    async fn sign_in(&self, credentials: &Credentials) -> Result<Session, ProviderError> {
        self.sign_in_calls.fetch_add(1, Ordering::SeqCst);
        match self.accounts.get(&credentials.email.to_lowercase()) {
            Some((user_id, password)) if password == credentials.password.expose_secret() => {
                Ok(self.session_for(user_id))
            }
            _ => Err(ProviderError::from_code("invalid_credentials")),
        }
    }

    async fn sign_up(&self, credentials: &Credentials) -> Result<Option<Session>, ProviderError> {
        if self.accounts.contains_key(&credentials.email.to_lowercase()) {
            return Err(ProviderError::from_code("user_already_exists"));
        }
        Ok(None)
    }

    async fn reset_password(&self, _email: &str) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn oauth_redirect(&self, provider: &str) -> Result<String, ProviderError> {
        Ok(format!("https://auth.example.com/authorize?provider={}", provider))
    }

    async fn verify_phone_code(&self, _phone: &str, code: &str) -> Result<Session, ProviderError> {
        if code == "123456" {
            Ok(self.session_for("user-1"))
        } else {
            Err(ProviderError::from_code("otp_expired"))
        }
    }

    async fn refresh_session(&self, refresh_token: &SecretString) -> Result<Session, ProviderError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_refresh.load(Ordering::SeqCst) {
            return Err(ProviderError::from_code("refresh_token_not_found"));
        }
        let user_id = refresh_token
            .expose_secret()
            .strip_prefix("refresh-")
            .unwrap_or("unknown")
            .to_string();
        Ok(self.session_for(&user_id))
    }

    async fn sign_out(&self, _session: &Session) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Payment provider that approves every charge
pub struct ApprovingPayments {
    pub charges: AtomicUsize,
}

#[async_trait]
impl PaymentProvider for ApprovingPayments {
    async fn charge(&self, _user_id: &str, _item: &PurchaseItem) -> Result<(), PaymentError> {
        self.charges.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Store that can be taken offline
#[derive(Clone, Default)]
pub struct FlakyStore {
    pub inner: InMemoryStore,
    pub down: Arc<AtomicBool>,
}

impl FlakyStore {
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.down.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("connection timed out".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SubscriptionStore for FlakyStore {
    async fn fetch(&self, user_id: &str) -> Result<Option<UserSubscription>, StoreError> {
        self.check()?;
        self.inner.fetch(user_id).await
    }

    async fn insert_if_absent(
        &self,
        subscription: UserSubscription,
    ) -> Result<UserSubscription, StoreError> {
        self.check()?;
        self.inner.insert_if_absent(subscription).await
    }

    async fn debit(&self, user_id: &str, request: DebitRequest) -> Result<DebitWrite, StoreError> {
        self.check()?;
        self.inner.debit(user_id, request).await
    }

    async fn renew(
        &self,
        user_id: &str,
        period: u64,
        now: DateTime<Utc>,
        next_reset_at: DateTime<Utc>,
    ) -> Result<RenewWrite, StoreError> {
        self.check()?;
        self.inner.renew(user_id, period, now, next_reset_at).await
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
        next_reset_at: DateTime<Utc>,
    ) -> Result<UserSubscription, StoreError> {
        self.check()?;
        self.inner.change_plan(user_id, plan, now, next_reset_at).await
    }

    async fn usage_history(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<TokenUsageRecord>, StoreError> {
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

/// Every service wired the way the binary would wire them
pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub identity: Arc<FakeIdentity>,
    pub store: FlakyStore,
    pub payments: Arc<ApprovingPayments>,
    pub limiter: AttemptLimiter,
    pub gateway: AuthGateway,
    pub subscriptions: SubscriptionManager,
    pub guard: AccessGuard,
}

impl Harness {
    pub fn new() -> Self {
        let clock = Arc::new(ManualClock::starting_now());
        let identity = Arc::new(FakeIdentity::new(clock.clone()));
        let store = FlakyStore::default();
        let payments = Arc::new(ApprovingPayments {
            charges: AtomicUsize::new(0),
        });

        let limiter = AttemptLimiter::new(RateLimitConfig::default(), clock.clone());
        let sessions = SessionValidator::new(identity.clone(), clock.clone(), SessionConfig::default());
        let gateway = AuthGateway::new(limiter.clone(), identity.clone(), sessions.clone());

        let subscriptions = SubscriptionManager::new(
            SubscriptionConfig::default(),
            StoreConfig::default(),
            Arc::new(store.clone()),
            clock.clone(),
        )
        .with_payments(payments.clone());
        let guard = AccessGuard::new(sessions, subscriptions.clone());

        Self {
            clock,
            identity,
            store,
            payments,
            limiter,
            gateway,
            subscriptions,
            guard,
        }
    }

    /// Harness with `a@b.com` (user-1) signed in
    pub async fn signed_in() -> Self {
        let harness = Self::new();
        harness
            .gateway
            .sign_in("a@b.com", "correct horse")
            .await
            .unwrap();
        harness
    }
}
