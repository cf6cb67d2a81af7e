//! Liveness and metrics HTTP surface: a minimal `axum` server exposing
//! `/healthz` and `/metrics`. This is the one outer HTTP surface the
//! specification's Non-goals permit, since observability is carried
//! regardless of the query-API Non-goal.

use crate::metrics::Metrics;
use axum::extract::State;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

async fn healthz() -> &'static str {
    "ok"
}

async fn metrics_text(State(metrics): State<Arc<Metrics>>) -> String {
    let encoder = TextEncoder::new();
    let metric_families = metrics.registry.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap_or_default();
    String::from_utf8(buffer).unwrap_or_default()
}

pub async fn serve(port: u16, metrics: Arc<Metrics>) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_text))
        .with_state(metrics);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "health/metrics endpoint listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
