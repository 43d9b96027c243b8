//! Lexgate Access Control Plane
//!
//! Account access and usage-quota control for the legal advisory assistant:
//! rate-limited authentication, session validation with de-duplicated
//! refresh, and per-feature token metering against a subscription plan.
//!
//! Construct one of each service at process start and share them by cloning;
//! there is no global state apart from the metrics registry.

pub mod clock;
pub mod config;
pub mod error;
pub mod guard;
pub mod logging;
pub mod metrics;
pub mod metrics_server;
pub mod rate_limit;
pub mod session;
pub mod subscription;


pub use error::{AccessError, StoreError};
pub use guard::{AccessGuard, AuthDecision, DenialReason};
