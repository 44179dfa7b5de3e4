//! Health check endpoint
//!
//! Uptime tracking and last-failure diagnostics

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok", or "degraded" until the store answers again after a failure
    pub status: String,
    /// Module name ("erg-verify")
    pub module: String,
    /// Crate version from Cargo.toml
    pub version: String,
    /// Seconds since service started
    pub uptime_seconds: u64,
    /// Most recent unrecovered store failure
    pub last_error: Option<String>,
}

/// GET /health
///
/// Health check endpoint for monitoring. Never touches the database, so it
/// answers even when the store is down; `last_error` tells why.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let last_error = state.last_error.read().await.clone();

    Json(HealthResponse {
        status: if last_error.is_some() { "degraded" } else { "ok" }.to_string(),
        module: "erg-verify".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        last_error,
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
