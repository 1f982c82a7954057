//! HTTP API routes and handlers.
//!
//! - `health` - Service health checks
//! - `sightings` - Raw sighting ingestion
//! - `beacons` - Presence snapshot, event feed and counters
//! - `error` - API error types
//! - `openapi` - OpenAPI specification generation

use axum::routing::{get, post};
use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::state::SharedState;

pub mod beacons;
pub mod error;
pub mod health;
pub mod openapi;
pub mod sightings;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use openapi::{get_openapi_json, ApiDoc};

/// Creates the combined API router with all endpoints.
///
/// # Route Structure
///
/// ```text
/// /health                - Health check
/// /api
/// ├── /sightings         - Submit raw sightings (POST)
/// ├── /beacons           - Presence snapshot
/// ├── /events            - Recent events feed
/// ├── /stats             - Engine counters
/// └── /openapi.json      - OpenAPI specification
/// /swagger-ui            - Interactive documentation
/// ```
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .nest("/health", health::router())
        .nest(
            "/api",
            Router::new()
                .route("/sightings", post(sightings::ingest_sightings))
                .route("/beacons", get(beacons::list_beacons))
                .route("/events", get(beacons::recent_events))
                .route("/stats", get(beacons::engine_stats))
                .route("/openapi.json", get(openapi::get_openapi_spec)),
        )
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use beacon_core::{BeaconEngine, EngineConfig, PresenceStatus};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;

    const NS: &str = "f7826da6-4fa2-4e98-8024-bc5b71e0893e";

    async fn app() -> (Router, Arc<BeaconEngine>) {
        let config = EngineConfig {
            min_enter_samples: 2,
            ..EngineConfig::default()
        };
        let engine = Arc::new(BeaconEngine::new(config).unwrap());
        let state = SharedState::new(Arc::clone(&engine), 16).await;
        engine.start().await.unwrap();
        (create_router(state), engine)
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_sightings(body: &Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/sightings")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn sighting(minor: i64, rssi: i64) -> Value {
        json!({ "namespace": NS, "major": 1, "minor": minor, "rssi": rssi })
    }

    #[tokio::test]
    async fn test_health_reports_running_engine() {
        let (app, engine) = app().await;
        let (status, body) = send(&app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["engine_running"], true);
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_ingest_reports_rejections_per_record() {
        let (app, engine) = app().await;
        let request = json!({
            "sightings": [
                sighting(1, -60),
                sighting(1, 40),
                { "namespace": "garbage", "major": 1, "minor": 1, "rssi": -60 },
                sighting(1, -61),
            ]
        });
        let (status, body) = send(&app, post_sightings(&request)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["accepted"], 2);
        assert_eq!(body["rejected"], 2);
        assert_eq!(body["rejections"][0]["index"], 1);
        assert_eq!(body["rejections"][0]["reason"], "out_of_range_signal");
        assert_eq!(body["rejections"][1]["reason"], "malformed_identifier");
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_beacons_and_events_after_enter() {
        let (app, engine) = app().await;
        let request = json!({ "sightings": [sighting(9, -55), sighting(9, -57)] });
        let (status, _) = send(&app, post_sightings(&request)).await;
        assert_eq!(status, StatusCode::OK);

        // Let the actor and observers catch up.
        let mut body = Value::Null;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            body = send(&app, get("/api/events?limit=5")).await.1;
            if body["events"].as_array().is_some_and(|e| !e.is_empty()) {
                break;
            }
        }
        assert_eq!(body["events"][0]["kind"], "enter");
        assert_eq!(body["capacity"], 16);

        let (status, body) = send(&app, get("/api/beacons")).await;
        assert_eq!(status, StatusCode::OK);
        let beacons = body["beacons"].as_array().unwrap();
        assert_eq!(beacons.len(), 1);
        assert_eq!(
            beacons[0]["status"],
            serde_json::to_value(PresenceStatus::Present).unwrap()
        );

        let (_, stats) = send(&app, get("/api/stats")).await;
        assert_eq!(stats["ingested"], 2);
        assert_eq!(stats["enters"], 1);
        engine.stop().await;
    }

    #[tokio::test]
    async fn test_stopped_engine_returns_503() {
        let (app, engine) = app().await;
        engine.stop().await;

        let request = json!({ "sightings": [sighting(1, -60)] });
        let (status, body) = send(&app, post_sightings(&request)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "engine_not_running");

        let (status, _) = send(&app, get("/api/beacons")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (_, health) = send(&app, get("/health")).await;
        assert_eq!(health["status"], "stopped");
    }

    #[tokio::test]
    async fn test_openapi_route_serves_document() {
        let (app, engine) = app().await;
        let (status, body) = send(&app, get("/api/openapi.json")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["info"]["title"], "beacon API");
        engine.stop().await;
    }
}
