//! Health & Status API endpoints
//!
//! - GET /health  - Liveness probe
//! - GET /status  - Relayer status snapshot (JSON)
//! - GET /metrics - Prometheus metrics

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use eyre::{eyre, Result, WrapErr};
use prometheus::{Encoder, TextEncoder};
use tracing::info;

use crate::relayer::Relayer;
use crate::status::RelayerStatus;

/// Liveness probe (always returns OK if server is running)
async fn health() -> &'static str {
    "OK"
}

async fn status(State(relayer): State<Arc<Relayer>>) -> Json<RelayerStatus> {
    Json(relayer.status())
}

/// Prometheus metrics endpoint
async fn prometheus_metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response();
    }

    ([(header::CONTENT_TYPE, encoder.format_type().to_string())], buffer).into_response()
}

pub fn router(relayer: Arc<Relayer>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/metrics", get(prometheus_metrics))
        .with_state(relayer)
}

/// Serve the API until the task is dropped
pub async fn start_api_server(bind_address: &str, relayer: Arc<Relayer>) -> Result<()> {
    let addr: SocketAddr = bind_address
        .parse()
        .map_err(|e| eyre!("Invalid API bind address {}: {}", bind_address, e))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("Failed to bind API server on {}", addr))?;
    info!(%addr, "API server started");

    axum::serve(listener, router(relayer))
        .await
        .wrap_err("API server failed")?;

    Ok(())
}
