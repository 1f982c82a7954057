//! Presence, event feed and counter endpoints.

use axum::extract::{Query, State};
use axum::Json;
use beacon_core::{BeaconEvent, EngineStats, PresenceSnapshot};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::api::error::{ApiResult, ErrorResponse};
use crate::state::SharedState;

/// Default page size for `/api/events`.
const DEFAULT_EVENT_LIMIT: usize = 50;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Currently tracked beacons.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BeaconsResponse {
    /// Engine clock reading when the snapshot was taken, in milliseconds.
    #[schema(example = 15000)]
    pub now_ms: u64,

    /// One entry per tracked beacon, ordered by identifier.
    pub beacons: Vec<PresenceSnapshot>,
}

/// Query parameters for the event feed.
#[derive(Debug, Clone, Copy, Deserialize, IntoParams)]
pub struct EventsQuery {
    /// Maximum number of events to return (default 50).
    #[param(example = 20, minimum = 1)]
    pub limit: Option<usize>,
}

/// Recent events, newest first.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EventsResponse {
    /// Events returned.
    pub events: Vec<BeaconEvent>,

    /// Maximum number of events the server keeps.
    #[schema(example = 256)]
    pub capacity: usize,
}

// ============================================================================
// Handlers
// ============================================================================

/// List tracked beacons.
#[utoipa::path(
    get,
    path = "/api/beacons",
    tag = "presence",
    operation_id = "listBeacons",
    summary = "List tracked beacons",
    description = "Returns the presence state, last sighting and range estimate of every \
        beacon the engine currently tracks, including beacons still entering or exiting.",
    responses(
        (status = 200, description = "Presence snapshot", body = BeaconsResponse),
        (status = 503, description = "Engine is not running", body = ErrorResponse)
    )
)]
pub async fn list_beacons(State(state): State<SharedState>) -> ApiResult<Json<BeaconsResponse>> {
    let engine = state.engine();
    let beacons = engine.snapshot().await?;
    Ok(Json(BeaconsResponse {
        now_ms: engine.now().as_millis(),
        beacons,
    }))
}

/// Recent events.
#[utoipa::path(
    get,
    path = "/api/events",
    tag = "presence",
    operation_id = "recentEvents",
    summary = "Recent presence events",
    params(EventsQuery),
    responses(
        (status = 200, description = "Recent events, newest first", body = EventsResponse)
    )
)]
pub async fn recent_events(
    State(state): State<SharedState>,
    Query(query): Query<EventsQuery>,
) -> Json<EventsResponse> {
    let recent = state.recent();
    let limit = query.limit.unwrap_or(DEFAULT_EVENT_LIMIT);
    Json(EventsResponse {
        events: recent.latest(limit),
        capacity: recent.capacity(),
    })
}

/// Engine counters.
#[utoipa::path(
    get,
    path = "/api/stats",
    tag = "system",
    operation_id = "engineStats",
    summary = "Engine counters",
    description = "Cumulative ingestion, rejection, event and observer counters since startup.",
    responses(
        (status = 200, description = "Counter snapshot", body = EngineStats)
    )
)]
pub async fn engine_stats(State(state): State<SharedState>) -> Json<EngineStats> {
    Json(state.engine().stats())
}
