//! Observability HTTP Routes
//!
//! Liveness of the coordinator itself and its counters.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;

use crate::monitor::ClusterHandle;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// `GET /health` and `GET /metrics`
pub fn health_routes(handle: ClusterHandle) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(handle)
}

async fn health_handler() -> impl IntoResponse {
    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    (StatusCode::OK, Json(response))
}

async fn metrics_handler(State(handle): State<ClusterHandle>) -> impl IntoResponse {
    (StatusCode::OK, Json(handle.metrics().to_json()))
}
