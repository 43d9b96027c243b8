//! Plan Catalog, Feature Costs and Token Packages
//!
//! Static configuration shared by every user. Nothing in here changes at
//! runtime.
//!
//! | Tier | Price/month | Tokens | Features |
//! |------|-------------|--------|----------|
//! | Free | $0 | 50 | document analysis, clause explanation |
//! | Starter | $19 | 500 | + redaction review |
//! | Pro | $49 | 2000 | + deep search |

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Metered features
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// Full document analysis
    DocumentAnalysis,
    /// Deep legal research search
    DeepSearch,
    /// Redaction review of a document
    RedactionReview,
    /// Plain-language explanation of a clause
    ClauseExplanation,
}

impl Feature {
    /// Every metered feature
    pub const ALL: [Feature; 4] = [
        Feature::DocumentAnalysis,
        Feature::DeepSearch,
        Feature::RedactionReview,
        Feature::ClauseExplanation,
    ];

    /// Fixed token cost per invocation
    pub fn cost(&self) -> u32 {
        match self {
            Feature::DocumentAnalysis => 10,
            Feature::DeepSearch => 25,
            Feature::RedactionReview => 15,
            Feature::ClauseExplanation => 5,
        }
    }

    /// Cost of the cheapest feature; below this a balance is exhausted
    pub fn cheapest_cost() -> u32 {
        Self::ALL.iter().map(Feature::cost).min().unwrap_or(0)
    }

    /// Stable identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::DocumentAnalysis => "document_analysis",
            Feature::DeepSearch => "deep_search",
            Feature::RedactionReview => "redaction_review",
            Feature::ClauseExplanation => "clause_explanation",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Feature {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        Feature::ALL
            .into_iter()
            .find(|f| f.as_str() == normalized)
            .ok_or_else(|| format!("Unknown feature: {}", s))
    }
}

/// Subscription tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PlanTier {
    /// Default tier for every new account
    Free,
    /// Entry paid tier
    Starter,
    /// Full access
    Pro,
}

impl PlanTier {
    /// Every tier, cheapest first
    pub const ALL: [PlanTier; 3] = [PlanTier::Free, PlanTier::Starter, PlanTier::Pro];

    /// Catalog entry for this tier
    pub fn definition(&self) -> &'static PlanDefinition {
        match self {
            PlanTier::Free => &FREE_PLAN,
            PlanTier::Starter => &STARTER_PLAN,
            PlanTier::Pro => &PRO_PLAN,
        }
    }

    /// Token allotment per period
    pub fn total_tokens(&self) -> u32 {
        self.definition().total_tokens
    }

    /// Whether the tier includes a feature
    pub fn includes(&self, feature: Feature) -> bool {
        self.definition().included_features.contains(&feature)
    }
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.definition().name)
    }
}

impl FromStr for PlanTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "free" => Ok(PlanTier::Free),
            "starter" => Ok(PlanTier::Starter),
            "pro" => Ok(PlanTier::Pro),
            _ => Err(format!("Unknown plan: {}", s)),
        }
    }
}

/// Immutable plan definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanDefinition {
    /// Tier this entry describes
    pub tier: PlanTier,
    /// Display name
    pub name: &'static str,
    /// Monthly price in whole US dollars
    pub monthly_price_usd: u32,
    /// Tokens granted every period
    pub total_tokens: u32,
    /// Features the tier may invoke
    pub included_features: &'static [Feature],
    /// Marketing copy shown on the pricing page
    pub highlights: &'static [&'static str],
}

static FREE_PLAN: PlanDefinition = PlanDefinition {
    tier: PlanTier::Free,
    name: "Free",
    monthly_price_usd: 0,
    total_tokens: 50,
    included_features: &[Feature::DocumentAnalysis, Feature::ClauseExplanation],
    highlights: &[
        "50 tokens per month",
        "Document analysis",
        "Clause explanations",
    ],
};

static STARTER_PLAN: PlanDefinition = PlanDefinition {
    tier: PlanTier::Starter,
    name: "Starter",
    monthly_price_usd: 19,
    total_tokens: 500,
    included_features: &[
        Feature::DocumentAnalysis,
        Feature::ClauseExplanation,
        Feature::RedactionReview,
    ],
    highlights: &[
        "500 tokens per month",
        "Everything in Free",
        "Redaction review",
        "Email support",
    ],
};

static PRO_PLAN: PlanDefinition = PlanDefinition {
    tier: PlanTier::Pro,
    name: "Pro",
    monthly_price_usd: 49,
    total_tokens: 2000,
    included_features: &[
        Feature::DocumentAnalysis,
        Feature::ClauseExplanation,
        Feature::RedactionReview,
        Feature::DeepSearch,
    ],
    highlights: &[
        "2,000 tokens per month",
        "Everything in Starter",
        "Deep legal search",
        "Priority support",
    ],
};

/// One-off token top-up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TokenPackage {
    /// Package identifier used by the purchase call
    pub id: &'static str,
    /// Tokens credited on success
    pub tokens: u32,
    /// Price in whole US dollars
    pub price_usd: u32,
}

/// Packages offered for purchase
pub const TOKEN_PACKAGES: [TokenPackage; 3] = [
    TokenPackage {
        id: "small",
        tokens: 100,
        price_usd: 5,
    },
    TokenPackage {
        id: "medium",
        tokens: 500,
        price_usd: 20,
    },
    TokenPackage {
        id: "large",
        tokens: 1500,
        price_usd: 50,
    },
];

impl TokenPackage {
    /// Look up a package by id
    pub fn find(id: &str) -> Option<TokenPackage> {
        TOKEN_PACKAGES.into_iter().find(|p| p.id == id)
    }
}
