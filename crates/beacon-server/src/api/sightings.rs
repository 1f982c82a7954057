//! Sighting ingestion endpoint.

use axum::extract::State;
use axum::Json;
use beacon_core::{IngestionError, RawRecord, RejectReason};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::{ApiError, ApiResult, ErrorResponse};
use crate::state::SharedState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Batch of raw advertisement records.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "sightings": [{
        "namespace": "f7826da6-4fa2-4e98-8024-bc5b71e0893e",
        "major": 1,
        "minor": 42,
        "rssi": -67,
        "tx_power": -59
    }]
}))]
pub struct IngestRequest {
    /// Records in arrival order.
    pub sightings: Vec<RawRecord>,
}

/// One record that was not queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Rejection {
    /// Position in the request batch.
    #[schema(example = 0)]
    pub index: usize,

    /// Why the record was refused.
    pub reason: RejectReason,
}

/// Outcome of a batch ingestion.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "accepted": 9,
    "rejected": 1,
    "dropped": 0,
    "rejections": [{"index": 3, "reason": "out_of_range_signal"}]
}))]
pub struct IngestResponse {
    /// Records queued for detection.
    #[schema(example = 9)]
    pub accepted: usize,

    /// Records that failed validation.
    #[schema(example = 1)]
    pub rejected: usize,

    /// Records dropped because the engine queue was full.
    #[schema(example = 0)]
    pub dropped: usize,

    /// Per-record rejection reasons.
    pub rejections: Vec<Rejection>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Submit raw sightings.
///
/// Validation failures and queue saturation are reported per record; the
/// batch as a whole only fails when the engine is stopped.
#[utoipa::path(
    post,
    path = "/api/sightings",
    tag = "sightings",
    operation_id = "ingestSightings",
    summary = "Submit beacon sightings",
    description = "Validates each raw record and queues the valid ones for detection. \
        Records without `timestamp_ms` are stamped on arrival with the engine clock.",
    request_body = IngestRequest,
    responses(
        (status = 200, description = "Batch processed", body = IngestResponse),
        (status = 503, description = "Engine is not running", body = ErrorResponse)
    )
)]
pub async fn ingest_sightings(
    State(state): State<SharedState>,
    Json(request): Json<IngestRequest>,
) -> ApiResult<Json<IngestResponse>> {
    let handle = state.engine().handle();
    let mut response = IngestResponse::default();

    for (index, raw) in request.sightings.iter().enumerate() {
        match handle.ingest(raw) {
            Ok(()) => response.accepted += 1,
            Err(IngestionError::Rejected(reason)) => {
                response.rejected += 1;
                response.rejections.push(Rejection { index, reason });
            }
            Err(IngestionError::QueueFull) => response.dropped += 1,
            Err(err @ IngestionError::NotRunning) => return Err(ApiError::from(err)),
        }
    }

    tracing::debug!(
        accepted = response.accepted,
        rejected = response.rejected,
        dropped = response.dropped,
        "Sighting batch ingested"
    );
    Ok(Json(response))
}
