//! Payment signal
//!
//! Charging is done by an external payment provider. The control plane only
//! needs a success/failure answer before crediting tokens or switching plans.

use async_trait::async_trait;
use serde::Serialize;

use super::catalog::{PlanTier, TokenPackage};

/// What is being bought
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PurchaseItem {
    /// One-off token package
    Tokens(TokenPackage),
    /// Plan change
    Plan(PlanTier),
}

impl PurchaseItem {
    /// Price in whole US dollars
    pub fn price_usd(&self) -> u32 {
        match self {
            PurchaseItem::Tokens(package) => package.price_usd,
            PurchaseItem::Plan(tier) => tier.definition().monthly_price_usd,
        }
    }

    /// Metrics label
    pub fn kind(&self) -> &'static str {
        match self {
            PurchaseItem::Tokens(_) => "tokens",
            PurchaseItem::Plan(_) => "plan",
        }
    }
}

/// Payment failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PaymentError {
    /// The charge was refused
    #[error("Payment declined: {0}")]
    Declined(String),

    /// The provider could not be reached
    #[error("Payment provider unavailable: {0}")]
    Unavailable(String),
}

/// External payment provider
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Charge the user for an item
    async fn charge(&self, user_id: &str, item: &PurchaseItem) -> Result<(), PaymentError>;
}

/// Result reported to the purchase caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurchaseResult {
    /// Whether tokens were credited / the plan switched
    pub success: bool,
    /// Presentable reason on failure
    pub error: Option<String>,
}

impl PurchaseResult {
    /// Successful purchase
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    /// Failed purchase
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}
