//! Health check API endpoint.
//!
//! Provides a simple health check endpoint for monitoring and load balancers.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::state::SharedState;

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "status": "ok",
    "version": "0.1.0",
    "engine_running": true,
    "started_at_utc": "2025-01-15T04:30:00Z"
}))]
pub struct HealthResponse {
    /// `ok` while the engine runs, `stopped` otherwise.
    #[schema(example = "ok")]
    pub status: String,

    /// Service version from Cargo.toml.
    #[schema(example = "0.1.0")]
    pub version: String,

    /// Whether the engine is accepting sightings.
    #[schema(example = true)]
    pub engine_running: bool,

    /// When the server started.
    pub started_at_utc: DateTime<Utc>,
}

/// Creates the health router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/", get(health_check))
}

/// Health check endpoint.
#[utoipa::path(
    get,
    path = "/health",
    tag = "system",
    operation_id = "healthCheck",
    summary = "Check service health",
    description = "Returns service status and whether the detection engine is running. \
        Use this endpoint for load balancer health checks and monitoring.",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<SharedState>) -> Json<HealthResponse> {
    let engine_running = state.engine().is_running().await;

    Json(HealthResponse {
        status: if engine_running { "ok" } else { "stopped" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        engine_running,
        started_at_utc: state.started_at(),
    })
}
