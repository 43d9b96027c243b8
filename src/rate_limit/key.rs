//! Attempt Keys
//!
//! A key is always an operation plus a normalized, stable identifier. There is
//! no constructor that accepts free-form text, so a key can never carry a
//! timestamp or other per-call value.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Security-sensitive operations screened by the limiter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthOperation {
    /// Email/password sign-in
    SignIn,
    /// Account creation
    SignUp,
    /// Password reset email
    PasswordReset,
    /// OAuth redirect
    OAuth,
    /// Phone verification code
    PhoneCode,
}

impl AuthOperation {
    /// Key prefix for this operation
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthOperation::SignIn => "signin",
            AuthOperation::SignUp => "signup",
            AuthOperation::PasswordReset => "reset",
            AuthOperation::OAuth => "oauth",
            AuthOperation::PhoneCode => "phone",
        }
    }
}

impl fmt::Display for AuthOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Limiter key, e.g. `signin:a@b.com`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttemptKey {
    operation: AuthOperation,
    identifier: String,
}

impl AttemptKey {
    /// Build a key from an operation and an identifier.
    ///
    /// The identifier is trimmed and lower-cased, so `" A@B.com "` and
    /// `"a@b.com"` share one window.
    pub fn new(operation: AuthOperation, identifier: &str) -> Self {
        Self {
            operation,
            identifier: normalize(identifier),
        }
    }

    /// Key for an email sign-in
    pub fn sign_in(email: &str) -> Self {
        Self::new(AuthOperation::SignIn, email)
    }

    /// Key for an account creation
    pub fn sign_up(email: &str) -> Self {
        Self::new(AuthOperation::SignUp, email)
    }

    /// Key for a password reset
    pub fn password_reset(email: &str) -> Self {
        Self::new(AuthOperation::PasswordReset, email)
    }

    /// Key for an OAuth attempt against a named provider
    pub fn oauth(provider: &str) -> Self {
        Self::new(AuthOperation::OAuth, provider)
    }

    /// Key for a phone code verification
    ///
    /// Formatting is stripped so `+1 (555) 010-0000` and `+15550100000`
    /// share a window. Input without any digit keeps its normalized text
    /// instead of collapsing onto an empty identifier.
    pub fn phone_code(phone: &str) -> Self {
        if !phone.chars().any(|c| c.is_ascii_digit()) {
            return Self::new(AuthOperation::PhoneCode, phone);
        }
        let digits: String = phone
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '+')
            .collect();
        Self::new(AuthOperation::PhoneCode, &digits)
    }

    /// Operation this key screens
    pub fn operation(&self) -> AuthOperation {
        self.operation
    }

    /// Normalized identifier
    pub fn identifier(&self) -> &str {
        &self.identifier
    }
}

impl fmt::Display for AttemptKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.operation, self.identifier)
    }
}

fn normalize(identifier: &str) -> String {
    identifier.trim().to_lowercase()
}
