//! Subscriptions and Token Quotas
//!
//! Every metered feature costs a fixed number of tokens. Each user holds one
//! subscription whose allotment is granted per period and reset on renewal.
//!
//! - [`catalog`]: plans, feature costs, token packages
//! - [`model`]: persisted rows and derived views
//! - [`store`]: the conditional-write store contract and an in-memory store
//! - [`ledger`]: append-only debit history
//! - [`manager`]: lifecycle, debits, renewal, purchases, degraded mode
//! - [`payment`]: the external payment signal
//!
//! Balances always satisfy
//! `tokens_remaining + tokens_used == allotment + purchased_tokens`.

pub mod catalog;
pub mod config;
pub mod ledger;
pub mod manager;
pub mod model;
pub mod payment;
pub mod store;

#[cfg(test)]
mod proptests;

pub use catalog::{Feature, PlanDefinition, PlanTier, TokenPackage, TOKEN_PACKAGES};
pub use config::{StoreConfig, SubscriptionConfig};
pub use ledger::QuotaLedger;
pub use manager::{DebitOutcome, SubscriptionManager, SubscriptionSnapshot};
pub use model::{SubscriptionState, TokenUsageRecord, UsageSummary, UserSubscription};
pub use payment::{PaymentError, PaymentProvider, PurchaseItem, PurchaseResult};
pub use store::{DebitRequest, DebitWrite, InMemoryStore, RenewWrite, SubscriptionStore};
