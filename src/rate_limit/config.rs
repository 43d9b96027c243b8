//! Rate Limit Configuration
//!
//! Window and attempt limits for authentication entry points.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default window length (15 minutes)
pub const DEFAULT_WINDOW_SECS: u64 = 15 * 60;

/// Default attempts allowed per window
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Longest window accepted (1 day)
pub const MAX_WINDOW_SECS: u64 = 24 * 60 * 60;

/// Rate limit configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting
    pub enabled: bool,

    /// Window length in seconds
    pub window_secs: u64,

    /// Attempts allowed within one window
    pub max_attempts: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_secs: DEFAULT_WINDOW_SECS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl RateLimitConfig {
    /// Window as a std duration, capped at [`MAX_WINDOW_SECS`]
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs.min(MAX_WINDOW_SECS))
    }

    /// Window as a chrono duration, for timestamp arithmetic
    pub fn window_chrono(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.window_secs.min(MAX_WINDOW_SECS) as i64)
    }

    /// Disable rate limiting (for testing)
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}
