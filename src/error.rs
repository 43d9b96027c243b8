//! Control Plane Error Types
//!
//! Infrastructure failures are errors. Expected denials (rate limited, plan
//! restricted, insufficient tokens) are also representable here so callers can
//! surface them uniformly, but the happy path never produces one.

use std::time::Duration;

use crate::session::ProviderError;

/// Error taxonomy surfaced to UI callers
#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    /// Too many attempts for a security-sensitive operation
    #[error("Too many attempts, try again in {} seconds", retry_after.as_secs())]
    RateLimited {
        /// Remaining cooldown
        retry_after: Duration,
    },

    /// No valid session could be obtained; re-authentication is required
    #[error("Session expired, please sign in again")]
    SessionExpired,

    /// The current plan does not include the requested feature
    #[error("Feature {0} is not included in the current plan")]
    PlanRestricted(String),

    /// Not enough tokens left for the requested feature
    #[error("Insufficient tokens: {required} required, {remaining} remaining")]
    InsufficientTokens {
        /// Cost of the feature
        required: u32,
        /// Balance at the time of the check
        remaining: u32,
    },

    /// The backing store could not be reached
    #[error("Subscription store unavailable: {0}")]
    StoreUnavailable(String),

    /// Identity provider failure, already mapped to a presentable message
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl AccessError {
    /// Whether the user can act on this outcome (wait, upgrade, buy tokens)
    pub fn is_user_recoverable(&self) -> bool {
        matches!(
            self,
            AccessError::RateLimited { .. }
                | AccessError::PlanRestricted(_)
                | AccessError::InsufficientTokens { .. }
        )
    }
}

/// Backing store failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Store not reachable; nothing was written
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// No subscription row for the user
    #[error("no subscription for user {0}")]
    NotFound(String),
}

impl From<StoreError> for AccessError {
    fn from(err: StoreError) -> Self {
        AccessError::StoreUnavailable(err.to_string())
    }
}
