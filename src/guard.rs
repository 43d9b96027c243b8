//! Access Guard
//!
//! The single entry point feature code calls before running a metered
//! feature. A call walks the checks in order and stops at the first failure:
//!
//! ```text
//! session ──▶ plan gating ──▶ token pre-check ──▶ conditional debit ──▶ Allowed
//!    │             │                 │                    │
//!    ▼             ▼                 ▼                    ▼
//! SESSION_EXPIRED  PLAN_RESTRICTED   INSUFFICIENT_TOKENS  INSUFFICIENT_TOKENS
//! ```
//!
//! `Allowed` is only returned once the debit is confirmed by the store, so no
//! feature can run between the decision and the debit.

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::AccessError;
use crate::metrics;
use crate::session::SessionValidator;
use crate::subscription::{
    DebitOutcome, Feature, PurchaseResult, SubscriptionManager, TokenUsageRecord, UsageSummary,
};

/// Why a feature invocation was turned away
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DenialReason {
    SessionExpired,
    PlanRestricted,
    InsufficientTokens {
        required: u32,
        remaining: u32,
    },
}

impl DenialReason {
    /// Metrics label
    pub fn as_str(&self) -> &'static str {
        match self {
            DenialReason::SessionExpired => "session_expired",
            DenialReason::PlanRestricted => "plan_restricted",
            DenialReason::InsufficientTokens { .. } => "insufficient_tokens",
        }
    }

    /// The matching error, for callers that surface denials as errors
    pub fn into_error(self, feature: Feature) -> AccessError {
        match self {
            DenialReason::SessionExpired => AccessError::SessionExpired,
            DenialReason::PlanRestricted => AccessError::PlanRestricted(feature.to_string()),
            DenialReason::InsufficientTokens {
                required,
                remaining,
            } => AccessError::InsufficientTokens {
                required,
                remaining,
            },
        }
    }
}

/// Outcome of [`AccessGuard::authorize`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    /// The feature may run; its cost is already debited
    Allowed {
        record: TokenUsageRecord,
        tokens_remaining: u32,
        /// Set when the debit went to the local fallback store
        degraded: Option<String>,
    },
    Denied(DenialReason),
}

impl AuthDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AuthDecision::Allowed { .. })
    }

    pub fn denial(&self) -> Option<DenialReason> {
        match self {
            AuthDecision::Denied(reason) => Some(*reason),
            AuthDecision::Allowed { .. } => None,
        }
    }
}

/// Session + subscription composition
#[derive(Clone)]
pub struct AccessGuard {
    sessions: SessionValidator,
    subscriptions: SubscriptionManager,
}

impl AccessGuard {
    pub fn new(sessions: SessionValidator, subscriptions: SubscriptionManager) -> Self {
        Self {
            sessions,
            subscriptions,
        }
    }

    /// Decide whether `user_id` may invoke `feature` and debit it if so.
    ///
    /// Errors are infrastructure failures only; every expected denial is an
    /// [`AuthDecision::Denied`].
    pub async fn authorize(
        &self,
        user_id: &str,
        feature: Feature,
        document_name: Option<&str>,
    ) -> Result<AuthDecision, AccessError> {
        let decision = self.decide(user_id, feature, document_name).await;

        let outcome = match &decision {
            Ok(AuthDecision::Allowed { .. }) => "allowed",
            Ok(AuthDecision::Denied(reason)) => reason.as_str(),
            Err(_) => "error",
        };
        metrics::AUTHORIZE_DECISIONS_TOTAL
            .with_label_values(&[feature.as_str(), outcome])
            .inc();
        debug!(user_id = %user_id, feature = %feature, outcome, "Authorization decided");

        decision
    }

    /// [`authorize`](Self::authorize) for callers that propagate denials as
    /// errors: the debit record on success, the matching [`AccessError`]
    /// otherwise.
    pub async fn require(
        &self,
        user_id: &str,
        feature: Feature,
        document_name: Option<&str>,
    ) -> Result<TokenUsageRecord, AccessError> {
        match self.authorize(user_id, feature, document_name).await? {
            AuthDecision::Allowed { record, .. } => Ok(record),
            AuthDecision::Denied(reason) => {
                let err = reason.into_error(feature);
                if !err.is_user_recoverable() {
                    warn!(user_id = %user_id, feature = %feature, "Re-authentication required");
                }
                Err(err)
            }
        }
    }

    async fn decide(
        &self,
        user_id: &str,
        feature: Feature,
        document_name: Option<&str>,
    ) -> Result<AuthDecision, AccessError> {
        match self.sessions.get_valid_session().await {
            Some(session) if session.user_id() == user_id => {}
            Some(session) => {
                warn!(
                    user_id = %user_id,
                    session_user = %session.user_id(),
                    "Session belongs to another user"
                );
                return Ok(AuthDecision::Denied(DenialReason::SessionExpired));
            }
            None => return Ok(AuthDecision::Denied(DenialReason::SessionExpired)),
        }

        if !self.subscriptions.is_feature_available(user_id, feature).await? {
            return Ok(AuthDecision::Denied(DenialReason::PlanRestricted));
        }

        let subscription = self.subscriptions.get_or_create(user_id).await?;
        if !subscription.can_afford(feature) {
            return Ok(AuthDecision::Denied(DenialReason::InsufficientTokens {
                required: feature.cost(),
                remaining: subscription.tokens_remaining,
            }));
        }

        match self
            .subscriptions
            .deduct_tokens(user_id, feature, document_name)
            .await?
        {
            DebitOutcome::Debited {
                record,
                subscription,
            } => Ok(AuthDecision::Allowed {
                record,
                tokens_remaining: subscription.tokens_remaining,
                degraded: self.subscriptions.is_degraded(user_id).await,
            }),
            DebitOutcome::Insufficient {
                required,
                remaining,
            } => Ok(AuthDecision::Denied(DenialReason::InsufficientTokens {
                required,
                remaining,
            })),
        }
    }

    pub async fn get_usage_percentage(&self, user_id: &str) -> Result<u8, AccessError> {
        self.subscriptions.get_usage_percentage(user_id).await
    }

    pub async fn is_low_on_tokens(&self, user_id: &str) -> Result<bool, AccessError> {
        self.subscriptions.is_low_on_tokens(user_id).await
    }

    pub async fn purchase_tokens(&self, user_id: &str, package_id: &str) -> PurchaseResult {
        self.subscriptions.purchase_tokens(user_id, package_id).await
    }

    /// Most recent debits first
    pub async fn get_usage_history(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<TokenUsageRecord>, AccessError> {
        self.subscriptions.usage_history(user_id, limit).await
    }

    pub async fn usage_summary(&self, user_id: &str) -> Result<UsageSummary, AccessError> {
        self.subscriptions.usage_summary(user_id).await
    }

    pub fn sessions(&self) -> &SessionValidator {
        &self.sessions
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }
}
