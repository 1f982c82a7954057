//! OpenAPI specification generation for the beacon API.

use axum::Json;
use beacon_core::{
    BeaconEvent, BeaconIdentifier, EngineStats, EventKind, PresenceSnapshot, PresenceStatus,
    RangeEstimate, RawRecord, RejectReason, Timestamp,
};
use utoipa::OpenApi;

use super::beacons::{BeaconsResponse, EventsResponse};
use super::error::ErrorResponse;
use super::health::HealthResponse;
use super::sightings::{IngestRequest, IngestResponse, Rejection};

/// Serve the OpenAPI specification as JSON at `/api/openapi.json`.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Returns the OpenAPI specification as a string (for writing to file).
/// Used by the gen-openapi binary.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn get_openapi_json() -> Result<String, serde_json::Error> {
    ApiDoc::openapi().to_pretty_json()
}

/// Main OpenAPI document structure for the beacon server.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "beacon API",
        version = "0.1.0",
        description = r#"
# beacon API

Turns a noisy stream of BLE beacon sightings into stable presence events.

## Overview

1. **Ingestion**: Submit raw sightings in batches. Invalid records are rejected per record.
2. **Presence**: Beacons become `present` after enough corroborating sightings and
   `absent` again after a period of silence.
3. **Events**: `enter`, rate-limited `update` and `exit` events are kept in a recent-events feed.

Timestamps are milliseconds on the engine's monotonic clock.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local beacon server")
    ),
    tags(
        (name = "system", description = "Health checks and engine counters"),
        (name = "sightings", description = "Raw sighting ingestion"),
        (name = "presence", description = "Tracked beacons and presence events")
    ),
    paths(
        super::health::health_check,
        super::sightings::ingest_sightings,
        super::beacons::list_beacons,
        super::beacons::recent_events,
        super::beacons::engine_stats,
    ),
    components(
        schemas(
            // Error types
            ErrorResponse,
            // Health types
            HealthResponse,
            // Ingestion types
            RawRecord,
            RejectReason,
            IngestRequest,
            IngestResponse,
            Rejection,
            // Presence types
            Timestamp,
            BeaconIdentifier,
            RangeEstimate,
            PresenceStatus,
            EventKind,
            BeaconEvent,
            PresenceSnapshot,
            BeaconsResponse,
            EventsResponse,
            EngineStats,
        )
    )
)]
pub struct ApiDoc;
