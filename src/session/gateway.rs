//! Authentication entry points
//!
//! Every entry point is screened by the [`AttemptLimiter`] before the
//! identity provider is contacted.

use std::sync::Arc;
use tracing::{info, warn};

use super::provider::{Credentials, IdentityProvider, Session};
use super::validator::SessionValidator;
use crate::error::AccessError;
use crate::rate_limit::{AttemptKey, AttemptLimiter};

/// Rate-limited front door to the identity provider
#[derive(Clone)]
pub struct AuthGateway {
    limiter: AttemptLimiter,
    provider: Arc<dyn IdentityProvider>,
    sessions: SessionValidator,
}

impl AuthGateway {
    /// Create a gateway sharing the process-wide limiter
    pub fn new(
        limiter: AttemptLimiter,
        provider: Arc<dyn IdentityProvider>,
        sessions: SessionValidator,
    ) -> Self {
        Self {
            limiter,
            provider,
            sessions,
        }
    }

    fn screen(&self, key: &AttemptKey) -> Result<(), AccessError> {
        let result = self.limiter.check(key);
        if result.allowed {
            Ok(())
        } else {
            Err(AccessError::RateLimited {
                retry_after: result.retry_after,
            })
        }
    }

    async fn open_session(&self, session: Session) {
        self.sessions.install(session).await;
        self.sessions.start_revalidation();
    }

    /// Email/password sign-in. Success clears the email's attempt window.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AccessError> {
        let key = AttemptKey::sign_in(email);
        self.screen(&key)?;

        let credentials = Credentials::new(email.trim(), password);
        match self.provider.sign_in(&credentials).await {
            Ok(session) => {
                self.limiter.clear(&key);
                info!(user_id = %session.user_id(), "User signed in");
                self.open_session(session.clone()).await;
                Ok(session)
            }
            Err(e) => {
                warn!(key = %key, code = %e.code, "Sign-in rejected by identity provider");
                Err(e.into())
            }
        }
    }

    /// Account creation. `None` when email confirmation is pending.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<Session>, AccessError> {
        self.screen(&AttemptKey::sign_up(email))?;

        let credentials = Credentials::new(email.trim(), password);
        let session = self.provider.sign_up(&credentials).await?;
        if let Some(session) = &session {
            info!(user_id = %session.user_id(), "User signed up");
            self.open_session(session.clone()).await;
        }
        Ok(session)
    }

    /// Send a password reset email
    pub async fn reset_password(&self, email: &str) -> Result<(), AccessError> {
        self.screen(&AttemptKey::password_reset(email))?;
        self.provider.reset_password(email.trim()).await?;
        Ok(())
    }

    /// Start an OAuth flow; returns the redirect URL
    pub async fn sign_in_with_oauth(&self, provider: &str) -> Result<String, AccessError> {
        self.screen(&AttemptKey::oauth(provider))?;
        Ok(self.provider.oauth_redirect(provider).await?)
    }

    /// Verify a phone one-time code
    pub async fn verify_phone_code(&self, phone: &str, code: &str) -> Result<Session, AccessError> {
        let key = AttemptKey::phone_code(phone);
        self.screen(&key)?;

        let session = self.provider.verify_phone_code(phone, code).await?;
        self.limiter.clear(&key);
        self.open_session(session.clone()).await;
        Ok(session)
    }

    /// Sign out: stop revalidation, drop the local session, revoke it remotely.
    ///
    /// The local session is gone even when the revocation call fails.
    pub async fn sign_out(&self) -> Result<(), AccessError> {
        self.sessions.stop_revalidation();
        let Some(session) = self.sessions.clear().await else {
            return Ok(());
        };

        info!(user_id = %session.user_id(), "User signed out");
        self.provider.sign_out(&session).await?;
        Ok(())
    }

    /// Session validator fed by this gateway
    pub fn sessions(&self) -> &SessionValidator {
        &self.sessions
    }
}
