//! Prometheus scrape endpoint
//!
//! `GET /metrics` returns the text exposition of the process registry.
//! `GET /health` answers 200 with a small JSON body; its `status` turns to
//! `"degraded"` while any user is served from the local fallback store, so a
//! load balancer can keep routing while operators get paged.

use anyhow::{Context, Result};
use axum::{http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::metrics;

#[derive(Debug, Serialize, PartialEq)]
struct Health {
    status: &'static str,
    degraded_subscriptions: i64,
}

/// Routes served by the metrics listener
pub fn router() -> Router {
    Router::new()
        .route("/metrics", get(scrape))
        .route("/health", get(health))
}

/// Serve on `0.0.0.0:port` until the process exits
pub async fn start_metrics_server(port: u16) -> Result<()> {
    serve(SocketAddr::from(([0, 0, 0, 0], port)), std::future::pending()).await
}

/// Serve on `addr` until `shutdown` resolves
pub async fn serve<F>(addr: SocketAddr, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    metrics::init().context("Failed to register metrics")?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind metrics listener on {}", addr))?;
    info!("Metrics listening on {}", listener.local_addr()?);

    axum::serve(listener, router())
        .with_graceful_shutdown(shutdown)
        .await
        .context("Metrics listener failed")
}

async fn scrape() -> (StatusCode, String) {
    match metrics::gather_metrics() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => {
            warn!("Metrics scrape failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn health() -> Json<Health> {
    let degraded_subscriptions = metrics::DEGRADED_SUBSCRIPTIONS.get();
    Json(Health {
        status: if degraded_subscriptions > 0 { "degraded" } else { "ok" },
        degraded_subscriptions,
    })
}
