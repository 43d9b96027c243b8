// Prometheus metrics for the access control plane
//
// Exposes metrics on /metrics HTTP endpoint:
// - Authorization decisions by outcome (counter)
// - Tokens debited by feature (counter)
// - Renewals and purchases (counter)
// - Rate-limited authentication attempts (counter)
// - Session refresh results (counter)
// - Subscriptions running on the local fallback store (gauge)

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder};
use std::sync::{Arc, Mutex, PoisonError};

lazy_static! {
    /// Every metric below is exported with the `lexgate_` prefix
    pub static ref REGISTRY: Arc<Registry> = Arc::new(
        Registry::new_custom(Some("lexgate".to_string()), None)
            .expect("Failed to create metrics registry")
    );

    // Access guard
    pub static ref AUTHORIZE_DECISIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("authorize_decisions_total", "Feature authorization decisions"),
        &["feature", "outcome"]
    ).expect("Failed to create authorize decisions metric");

    // Subscription manager
    pub static ref TOKENS_DEBITED_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("tokens_debited_total", "Tokens debited from subscriptions"),
        &["feature"]
    ).expect("Failed to create tokens debited metric");

    pub static ref RENEWALS_TOTAL: IntCounter = IntCounter::new(
        "subscription_renewals_total",
        "Total number of subscription period renewals"
    ).expect("Failed to create renewals metric");

    pub static ref PURCHASES_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("purchases_total", "Token package and plan purchases"),
        &["kind", "status"]
    ).expect("Failed to create purchases metric");

    pub static ref DEGRADED_SUBSCRIPTIONS: IntGauge = IntGauge::new(
        "degraded_subscriptions",
        "Subscriptions served from the local fallback store"
    ).expect("Failed to create degraded subscriptions metric");

    // Authentication
    pub static ref RATE_LIMITED_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("rate_limited_total", "Authentication attempts rejected by the rate limiter"),
        &["operation"]
    ).expect("Failed to create rate limited metric");

    pub static ref SESSION_REFRESH_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("session_refresh_total", "Session refresh calls to the identity provider"),
        &["status"]
    ).expect("Failed to create session refresh metric");
}

/// Register every metric with [`REGISTRY`]; later calls are no-ops
pub fn init() -> prometheus::Result<()> {
    static REGISTERED: Mutex<bool> = Mutex::new(false);
    let mut registered = REGISTERED.lock().unwrap_or_else(PoisonError::into_inner);
    if *registered {
        return Ok(());
    }

    REGISTRY.register(Box::new(AUTHORIZE_DECISIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(TOKENS_DEBITED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RENEWALS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(PURCHASES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DEGRADED_SUBSCRIPTIONS.clone()))?;
    REGISTRY.register(Box::new(RATE_LIMITED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SESSION_REFRESH_TOTAL.clone()))?;
    *registered = true;
    Ok(())
}

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))?;
    String::from_utf8(buffer).map_err(|e| anyhow::anyhow!("Invalid UTF-8 in metrics: {}", e))
}
