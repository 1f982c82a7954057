//! API error types and response handling.
//!
//! Every handler returns [`ApiResult`]; errors render as a consistent JSON
//! [`ErrorResponse`] with the matching HTTP status.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use beacon_core::BeaconError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Result type alias for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Unified API error type.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// 400 Bad Request - Invalid input from client.
    #[error("Bad Request: {message}")]
    BadRequest {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 409 Conflict - Operation cannot be completed in the current state.
    #[error("Conflict: {message}")]
    Conflict {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 429 Too Many Requests - The engine is shedding load.
    #[error("Too Many Requests: {message}")]
    TooManyRequests {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 500 Internal Server Error - Unexpected server-side error.
    #[error("Internal Error: {message}")]
    InternalError {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
        /// Optional details.
        details: Option<String>,
    },

    /// 503 Service Unavailable - The engine is stopped or unresponsive.
    #[error("Service Unavailable: {message}")]
    ServiceUnavailable {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },
}

/// Standard JSON error response body.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "engine_not_running",
    "message": "Engine is not running. Start it before ingesting or querying.",
    "details": null
}))]
pub struct ErrorResponse {
    /// Machine-readable error code (e.g., "out_of_range_signal").
    #[schema(example = "engine_not_running")]
    pub error: String,

    /// Human-readable error message.
    #[schema(example = "Engine is not running. Start it before ingesting or querying.")]
    pub message: String,

    /// Optional additional details for debugging.
    #[schema(nullable)]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::InternalError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_response = match self {
            Self::BadRequest {
                error_code,
                message,
            }
            | Self::Conflict {
                error_code,
                message,
            }
            | Self::TooManyRequests {
                error_code,
                message,
            }
            | Self::ServiceUnavailable {
                error_code,
                message,
            } => ErrorResponse {
                error: error_code,
                message,
                details: None,
            },

            Self::InternalError {
                error_code,
                message,
                details,
            } => {
                tracing::error!(
                    error_code = %error_code,
                    message = %message,
                    details = ?details,
                    "Internal server error"
                );
                ErrorResponse {
                    error: error_code,
                    message,
                    details: details.map(serde_json::Value::String),
                }
            }
        };

        (status, Json(error_response)).into_response()
    }
}

/// Convert from beacon_core errors.
impl From<BeaconError> for ApiError {
    fn from(err: BeaconError) -> Self {
        let error_code = err.error_code().to_ascii_lowercase();
        let message = err.to_string();
        match err.http_status_code() {
            400 | 404 | 422 => Self::BadRequest {
                error_code,
                message,
            },
            409 => Self::Conflict {
                error_code,
                message,
            },
            429 => Self::TooManyRequests {
                error_code,
                message,
            },
            503 => Self::ServiceUnavailable {
                error_code,
                message,
            },
            _ => Self::InternalError {
                error_code,
                message,
                details: None,
            },
        }
    }
}

impl From<beacon_core::EngineError> for ApiError {
    fn from(err: beacon_core::EngineError) -> Self {
        Self::from(BeaconError::from(err))
    }
}

impl From<beacon_core::IngestionError> for ApiError {
    fn from(err: beacon_core::IngestionError) -> Self {
        Self::from(BeaconError::from(err))
    }
}

#[cfg(test)]
mod tests {
    use beacon_core::{EngineError, IngestionError, RejectReason};

    use super::*;

    #[test]
    fn test_bad_request_error() {
        let err = ApiError::BadRequest {
            error_code: "test_error".to_string(),
            message: "Test message".to_string(),
        };
        assert!(err.to_string().contains("Bad Request"));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_error_response_serialization() {
        let response = ErrorResponse {
            error: "test_error".to_string(),
            message: "Test message".to_string(),
            details: None,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("test_error"));
    }

    #[test]
    fn test_engine_errors_map_to_statuses() {
        let err = ApiError::from(EngineError::NotRunning);
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);

        let err = ApiError::from(EngineError::AlreadyRunning);
        assert_eq!(err.status(), StatusCode::CONFLICT);

        let err = ApiError::from(IngestionError::QueueFull);
        assert_eq!(err.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn test_reject_reason_becomes_lowercase_code() {
        let err = ApiError::from(IngestionError::Rejected(RejectReason::OutOfRangeSignal));
        let ApiError::BadRequest { error_code, .. } = err else {
            panic!("expected bad request");
        };
        assert_eq!(error_code, "out_of_range_signal");
    }
}
