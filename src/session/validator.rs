//! Session Validation and Refresh
//!
//! Holds the current session, answers "is it still valid", and refreshes it
//! through the identity provider when it is not. Refreshes are serialized:
//! callers that arrive while one is in flight wait for it and reuse its
//! result instead of issuing their own.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::provider::{IdentityProvider, Session};
use crate::clock::Clock;
use crate::metrics;

/// Default background revalidation period (5 minutes)
pub const DEFAULT_REVALIDATE_INTERVAL_SECS: u64 = 5 * 60;

/// Longest revalidation period accepted (1 day)
pub const MAX_REVALIDATE_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Background revalidation period in seconds
    pub revalidate_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            revalidate_interval_secs: DEFAULT_REVALIDATE_INTERVAL_SECS,
        }
    }
}

impl SessionConfig {
    /// Revalidation period, capped at [`MAX_REVALIDATE_INTERVAL_SECS`]
    pub fn revalidate_interval(&self) -> Duration {
        Duration::from_secs(self.revalidate_interval_secs.min(MAX_REVALIDATE_INTERVAL_SECS))
    }
}

/// What a background revalidation tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevalidationOutcome {
    /// Nobody is signed in
    NoSession,
    /// Held session still valid
    Valid,
    /// Held session was expired and has been replaced
    Refreshed,
    /// Refresh failed; the session was cleared
    SignedOut,
    /// Another refresh was already running; tick skipped
    RefreshInFlight,
}

/// Session validator
#[derive(Clone)]
pub struct SessionValidator {
    provider: Arc<dyn IdentityProvider>,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
    current: Arc<RwLock<Option<Session>>>,
    refresh_lock: Arc<Mutex<()>>,
    revalidation_task: Arc<StdMutex<Option<JoinHandle<()>>>>,
}

impl SessionValidator {
    /// Create a validator with no session held
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
    ) -> Self {
        Self {
            provider,
            clock,
            config,
            current: Arc::new(RwLock::new(None)),
            refresh_lock: Arc::new(Mutex::new(())),
            revalidation_task: Arc::new(StdMutex::new(None)),
        }
    }

    /// Pure expiry check: valid iff a session is present and not yet expired
    pub fn is_session_valid(&self, session: Option<&Session>) -> bool {
        session.is_some_and(|s| s.is_valid_at(self.clock.now()))
    }

    /// Replace the held session (after sign-in)
    pub async fn install(&self, session: Session) {
        debug!(user_id = %session.user_id(), expires_at = %session.expires_at(), "Session installed");
        *self.current.write().await = Some(session);
    }

    /// Drop the held session without contacting the provider
    pub async fn clear(&self) -> Option<Session> {
        self.current.write().await.take()
    }

    /// Held session, valid or not
    pub async fn current(&self) -> Option<Session> {
        self.current.read().await.clone()
    }

    /// Return a valid session, refreshing the held one if it has expired.
    ///
    /// `None` means re-authentication is required. A failed refresh clears the
    /// held session, so it is never retried silently.
    pub async fn get_valid_session(&self) -> Option<Session> {
        if let Some(session) = self.current().await {
            if self.is_session_valid(Some(&session)) {
                return Some(session);
            }
        }

        let _guard = self.refresh_lock.lock().await;

        // A refresh may have completed while we waited for the lock
        let session = self.current().await?;
        if self.is_session_valid(Some(&session)) {
            return Some(session);
        }

        self.refresh_locked(session).await
    }

    /// Caller must hold `refresh_lock`
    async fn refresh_locked(&self, expired: Session) -> Option<Session> {
        debug!(user_id = %expired.user_id(), "Refreshing expired session");

        match self.provider.refresh_session(expired.refresh_token()).await {
            Ok(fresh) => {
                metrics::SESSION_REFRESH_TOTAL
                    .with_label_values(&["success"])
                    .inc();
                info!(user_id = %fresh.user_id(), expires_at = %fresh.expires_at(), "Session refreshed");
                *self.current.write().await = Some(fresh.clone());
                Some(fresh)
            }
            Err(e) => {
                metrics::SESSION_REFRESH_TOTAL
                    .with_label_values(&["failure"])
                    .inc();
                warn!(
                    user_id = %expired.user_id(),
                    code = %e.code,
                    "Session refresh failed, signing out"
                );
                *self.current.write().await = None;
                None
            }
        }
    }

    /// One background revalidation step.
    ///
    /// Never waits on an in-flight refresh: if one is running the tick is a
    /// no-op.
    pub async fn revalidate(&self) -> RevalidationOutcome {
        let Some(session) = self.current().await else {
            return RevalidationOutcome::NoSession;
        };
        if self.is_session_valid(Some(&session)) {
            return RevalidationOutcome::Valid;
        }

        let Ok(_guard) = self.refresh_lock.try_lock() else {
            debug!("Refresh already in flight, skipping revalidation tick");
            return RevalidationOutcome::RefreshInFlight;
        };

        // Re-read under the lock; a refresh may have just finished
        let Some(session) = self.current().await else {
            return RevalidationOutcome::NoSession;
        };
        if self.is_session_valid(Some(&session)) {
            return RevalidationOutcome::Refreshed;
        }

        match self.refresh_locked(session).await {
            Some(_) => RevalidationOutcome::Refreshed,
            None => RevalidationOutcome::SignedOut,
        }
    }

    /// Start the periodic revalidation timer.
    ///
    /// A single task runs the ticks one after another, so ticks never overlap.
    /// Calling this while a timer is already running does nothing. The timer
    /// stops by itself once nobody is signed in.
    pub fn start_revalidation(&self) {
        let mut task = self
            .revalidation_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let validator = self.clone();
        let period = self.config.revalidate_interval();
        *task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately
            interval.tick().await;

            loop {
                interval.tick().await;
                match validator.revalidate().await {
                    RevalidationOutcome::NoSession | RevalidationOutcome::SignedOut => {
                        debug!("No session held, stopping revalidation timer");
                        break;
                    }
                    outcome => debug!(?outcome, "Session revalidated"),
                }
            }
        }));
    }

    /// Stop the periodic revalidation timer
    pub fn stop_revalidation(&self) {
        let handle = self
            .revalidation_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    /// Whether the revalidation timer is running
    pub fn is_revalidating(&self) -> bool {
        self.revalidation_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}
