//! Authentication Rate Limiting
//!
//! Fixed-window attempt counting for security-sensitive authentication
//! operations (sign-in, sign-up, password reset, OAuth, phone codes).
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   AttemptKey    ┌──────────────────────────────┐
//! │ AuthGateway  │ ──────────────▶ │ AttemptLimiter               │
//! │              │ ◀────────────── │  HashMap<AttemptKey, Record> │
//! └──────────────┘ RateLimitResult └──────────────────────────────┘
//! ```
//!
//! The limiter is process-local. Running several instances behind a load
//! balancer multiplies the effective limit by the instance count.

pub mod config;
pub mod key;
pub mod limiter;

pub use config::RateLimitConfig;
pub use key::{AttemptKey, AuthOperation};
pub use limiter::{AttemptLimiter, RateLimitRecord, RateLimitResult};
