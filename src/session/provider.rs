//! Identity Provider Contract
//!
//! Credential verification, OAuth and phone-code delivery live in an external
//! identity service. This module defines the narrow interface the control
//! plane consumes and maps the provider's error codes onto a small internal
//! set with user-presentable messages.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Credential bundle issued by the identity provider.
///
/// Only the owner and the expiry are interpreted here; the tokens are passed
/// back to the provider untouched.
#[derive(Debug, Clone)]
pub struct Session {
    user_id: String,
    access_token: SecretString,
    refresh_token: SecretString,
    expires_at: DateTime<Utc>,
}

impl Session {
    /// Create a session
    pub fn new(
        user_id: impl Into<String>,
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            access_token: SecretString::from(access_token.into()),
            refresh_token: SecretString::from(refresh_token.into()),
            expires_at,
        }
    }

    /// Opaque identifier of the signed-in user
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Bearer token for downstream calls
    pub fn access_token(&self) -> &SecretString {
        &self.access_token
    }

    /// Token exchanged for a fresh session
    pub fn refresh_token(&self) -> &SecretString {
        &self.refresh_token
    }

    /// Expiry instant
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Valid iff the expiry lies strictly in the future
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    /// Whether two sessions carry the same access token
    pub fn same_token(&self, other: &Session) -> bool {
        self.access_token.expose_secret() == other.access_token.expose_secret()
    }
}

/// Email/password pair
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Account email
    pub email: String,
    /// Account password
    pub password: SecretString,
}

impl Credentials {
    /// Create credentials
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: SecretString::from(password.into()),
        }
    }
}

/// Internal classification of provider failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// Wrong email or password
    InvalidCredentials,
    /// Account exists but the email was never confirmed
    EmailNotConfirmed,
    /// Sign-up for an already registered email
    UserAlreadyExists,
    /// Password rejected by the provider's policy
    WeakPassword,
    /// Phone or email one-time code wrong or expired
    InvalidOtp,
    /// Refresh token unknown, revoked or expired
    SessionNotFound,
    /// Provider could not be reached
    Network,
    /// Anything else
    Unknown,
}

impl ProviderErrorKind {
    /// Map a provider error code (or legacy message) onto a kind
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_lowercase().as_str() {
            "invalid_credentials" | "invalid_grant" | "invalid login credentials" => {
                ProviderErrorKind::InvalidCredentials
            }
            "email_not_confirmed" | "email not confirmed" => ProviderErrorKind::EmailNotConfirmed,
            "user_already_exists" | "email_exists" | "user already registered" => {
                ProviderErrorKind::UserAlreadyExists
            }
            "weak_password" => ProviderErrorKind::WeakPassword,
            "otp_expired" | "otp_disabled" | "invalid_otp" => ProviderErrorKind::InvalidOtp,
            "session_not_found" | "session_expired" | "refresh_token_not_found"
            | "refresh_token_already_used" => ProviderErrorKind::SessionNotFound,
            "network_error" | "fetch_failed" | "timeout" => ProviderErrorKind::Network,
            _ => ProviderErrorKind::Unknown,
        }
    }

    /// Message safe to show to the user
    pub fn user_message(&self) -> &'static str {
        match self {
            ProviderErrorKind::InvalidCredentials => "Invalid email or password",
            ProviderErrorKind::EmailNotConfirmed => {
                "Please confirm your email address before signing in"
            }
            ProviderErrorKind::UserAlreadyExists => "An account with this email already exists",
            ProviderErrorKind::WeakPassword => "Password does not meet the security requirements",
            ProviderErrorKind::InvalidOtp => "The verification code is invalid or has expired",
            ProviderErrorKind::SessionNotFound => "Your session has ended, please sign in again",
            ProviderErrorKind::Network => "Could not reach the sign-in service, try again shortly",
            ProviderErrorKind::Unknown => "Something went wrong, please try again",
        }
    }
}

/// Identity provider failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    /// Internal classification
    pub kind: ProviderErrorKind,
    /// Raw provider code, kept for logs
    pub code: String,
}

impl ProviderError {
    /// Build from a provider error code
    pub fn from_code(code: impl Into<String>) -> Self {
        let code = code.into();
        Self {
            kind: ProviderErrorKind::from_code(&code),
            code,
        }
    }

    /// Build with an explicit kind
    pub fn new(kind: ProviderErrorKind, code: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
        }
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind.user_message())
    }
}

impl std::error::Error for ProviderError {}

/// External identity service
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Verify email/password and open a session
    async fn sign_in(&self, credentials: &Credentials) -> Result<Session, ProviderError>;

    /// Create an account. `None` when the provider requires email confirmation
    /// before issuing a session.
    async fn sign_up(&self, credentials: &Credentials) -> Result<Option<Session>, ProviderError>;

    /// Send a password reset email
    async fn reset_password(&self, email: &str) -> Result<(), ProviderError>;

    /// Start an OAuth flow; returns the redirect URL
    async fn oauth_redirect(&self, provider: &str) -> Result<String, ProviderError>;

    /// Verify a phone one-time code and open a session
    async fn verify_phone_code(&self, phone: &str, code: &str) -> Result<Session, ProviderError>;

    /// Exchange a refresh token for a fresh session
    async fn refresh_session(&self, refresh_token: &SecretString) -> Result<Session, ProviderError>;

    /// Revoke a session
    async fn sign_out(&self, session: &Session) -> Result<(), ProviderError>;
}
