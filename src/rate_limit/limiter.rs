//! Fixed-window attempt limiter
//!
//! One record per [`AttemptKey`]. A record whose window has elapsed is treated
//! as absent and replaced on the next attempt; records are never deleted on
//! the hot path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

use super::config::RateLimitConfig;
use super::key::AttemptKey;
use crate::clock::Clock;
use crate::metrics;

/// Attempt counter for one key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRecord {
    /// Attempts seen in the current window
    pub attempt_count: u32,

    /// End of the current window
    pub window_reset_at: DateTime<Utc>,
}

impl RateLimitRecord {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.window_reset_at
    }
}

/// Result of a rate limit check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitResult {
    /// Whether the attempt may proceed
    pub allowed: bool,

    /// Attempts counted in the current window, including this one
    pub attempts: u32,

    /// Cooldown before the window resets (zero when allowed)
    pub retry_after: Duration,
}

impl RateLimitResult {
    /// Create an allowed result
    pub fn allowed(attempts: u32) -> Self {
        Self {
            allowed: true,
            attempts,
            retry_after: Duration::ZERO,
        }
    }

    /// Create a denied result
    pub fn denied(attempts: u32, retry_after: Duration) -> Self {
        Self {
            allowed: false,
            attempts,
            retry_after,
        }
    }
}

/// Process-local attempt limiter.
///
/// Construct one per process and share it (it is cheap to clone). State is not
/// shared across instances: behind a load balancer each instance counts its
/// own attempts, so the effective limit is `max_attempts * instances`.
#[derive(Debug, Clone)]
pub struct AttemptLimiter {
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    records: Arc<Mutex<HashMap<AttemptKey, RateLimitRecord>>>,
}

impl AttemptLimiter {
    /// Create a limiter
    pub fn new(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            records: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn records(&self) -> MutexGuard<'_, HashMap<AttemptKey, RateLimitRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record an attempt for `key` and decide whether it may proceed
    pub fn check(&self, key: &AttemptKey) -> RateLimitResult {
        if !self.config.enabled {
            return RateLimitResult::allowed(0);
        }

        let now = self.clock.now();
        let mut records = self.records();

        let record = match records.get_mut(key) {
            Some(record) if !record.is_expired(now) => record,
            _ => {
                let fresh = RateLimitRecord {
                    attempt_count: 1,
                    window_reset_at: now + self.config.window_chrono(),
                };
                records.insert(key.clone(), fresh);
                debug!(key = %key, "Opened new rate limit window");
                return RateLimitResult::allowed(1);
            }
        };

        // Saturate one past the limit: enough to keep rejecting, never undercounts.
        if record.attempt_count <= self.config.max_attempts {
            record.attempt_count += 1;
        }

        if record.attempt_count > self.config.max_attempts {
            let retry_after = (record.window_reset_at - now)
                .to_std()
                .unwrap_or(Duration::ZERO);
            warn!(
                key = %key,
                attempts = record.attempt_count,
                retry_after_secs = retry_after.as_secs(),
                "Rate limit exceeded"
            );
            metrics::RATE_LIMITED_TOTAL
                .with_label_values(&[key.operation().as_str()])
                .inc();
            return RateLimitResult::denied(record.attempt_count, retry_after);
        }

        RateLimitResult::allowed(record.attempt_count)
    }

    /// Record an attempt; `true` when the caller must be turned away
    pub fn is_rate_limited(&self, key: &AttemptKey) -> bool {
        !self.check(key).allowed
    }

    /// Time until the key's window resets, zero when no live window exists
    pub fn remaining_time(&self, key: &AttemptKey) -> Duration {
        let now = self.clock.now();
        self.records()
            .get(key)
            .filter(|record| !record.is_expired(now))
            .and_then(|record| (record.window_reset_at - now).to_std().ok())
            .unwrap_or(Duration::ZERO)
    }

    /// Current record for a key, if it is still live
    pub fn record(&self, key: &AttemptKey) -> Option<RateLimitRecord> {
        let now = self.clock.now();
        self.records()
            .get(key)
            .filter(|record| !record.is_expired(now))
            .cloned()
    }

    /// Forget a key (after a successful sign-in)
    pub fn clear(&self, key: &AttemptKey) {
        self.records().remove(key);
    }

    /// Drop records whose window has elapsed; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut records = self.records();
        let before = records.len();
        records.retain(|_, record| !record.is_expired(now));
        before - records.len()
    }

    /// Number of keys currently held
    pub fn tracked_keys(&self) -> usize {
        self.records().len()
    }

    /// Active configuration
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }
}
