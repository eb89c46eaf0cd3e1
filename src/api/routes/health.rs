//! Health Routes
//!
//! Liveness/readiness probes and a full health status.
//!
//! - GET /health/live - Liveness probe
//! - GET /health/ready - Readiness probe
//! - GET /health - Full health status

use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use crate::api::dto::HealthResponse;
use crate::api::state::AppState;

/// GET /health/live
///
/// Process is up.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// GET /health/ready
///
/// Ready to serve: the sync status is readable (engine wired up).
pub async fn readiness(State(state): State<Arc<AppState>>) -> StatusCode {
    let _ = state.engine.status().await;
    StatusCode::OK
}

/// GET /health
///
/// Full health status.
pub async fn full_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.uptime_secs(),
        external_source_available: state.engine.has_external_source(),
    })
}
