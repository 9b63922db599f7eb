//! Health Routes
//!
//! - GET /health/live - Liveness probe (process is alive)
//! - GET /health - Connection and subscription counts

use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use crate::api::dto::HealthResponse;
use crate::api::state::AppState;

/// GET /health/live
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// GET /health
pub async fn full_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let stats = state.transmit.manager().stats().await;

    Json(HealthResponse {
        status: "healthy".to_string(),
        connections: stats.connections,
        channels: stats.channels,
        secured_patterns: stats.secured_patterns,
        uptime_seconds: state.uptime_seconds(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
