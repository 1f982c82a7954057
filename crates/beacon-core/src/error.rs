//! Unified error type for the beacon core library.
//!
//! Each module keeps its own error type ([`ConfigError`], [`IngestionError`],
//! [`EngineError`], [`ObserverError`]). [`BeaconError`] folds them into one
//! enum that carries an HTTP status and a stable error code, so outer layers
//! can report failures without matching on every module type.
//!
//! # Example
//!
//! ```rust
//! use beacon_core::error::{BeaconError, Result};
//! use beacon_core::normalize::RejectReason;
//!
//! fn check(rssi: i64) -> Result<()> {
//!     if rssi > 0 {
//!         return Err(RejectReason::OutOfRangeSignal.into());
//!     }
//!     Ok(())
//! }
//!
//! assert_eq!(check(10).unwrap_err().http_status_code(), 400);
//! ```

use thiserror::Error;

use crate::config::ConfigError;
use crate::dispatch::ObserverError;
use crate::engine::{EngineError, IngestionError};
use crate::normalize::RejectReason;

/// The unified error type for all beacon operations.
#[derive(Debug, Error)]
pub enum BeaconError {
    // =========================================================================
    // INGESTION ERRORS
    // =========================================================================
    /// A raw record failed validation.
    #[error("Sighting rejected: {0}")]
    SightingRejected(RejectReason),

    /// The engine queue is saturated; retry later.
    #[error("Engine is saturated, sighting dropped. Retry after a short delay.")]
    QueueFull,

    // =========================================================================
    // ENGINE ERRORS
    // =========================================================================
    /// The engine is not running.
    #[error("Engine is not running. Start it before ingesting or querying.")]
    EngineNotRunning,

    /// The engine was started twice.
    #[error("Engine is already running")]
    EngineAlreadyRunning,

    /// The engine did not answer in time.
    #[error("Engine unavailable: {0}")]
    EngineUnavailable(String),

    // =========================================================================
    // OBSERVER ERRORS
    // =========================================================================
    /// An observer failed to handle an event.
    #[error("Observer error: {0}")]
    Observer(ObserverError),

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file was not found.
    #[error("Configuration file not found at: {0}")]
    ConfigNotFound(String),

    /// The configuration could not be parsed or written.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    /// Low-level I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A specialized [`Result`] type for beacon operations.
pub type Result<T> = std::result::Result<T, BeaconError>;

impl BeaconError {
    /// Returns `true` if a submitted record was refused.
    #[inline]
    #[must_use]
    pub const fn is_ingestion_error(&self) -> bool {
        matches!(self, Self::SightingRejected(_) | Self::QueueFull)
    }

    /// Returns `true` if this error concerns the engine lifecycle.
    #[inline]
    #[must_use]
    pub const fn is_engine_error(&self) -> bool {
        matches!(
            self,
            Self::EngineNotRunning | Self::EngineAlreadyRunning | Self::EngineUnavailable(_)
        )
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_) | Self::ConfigParseError(_) | Self::ConfigValidationError(_)
        )
    }

    /// Returns `true` if retrying the same call later may succeed.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::QueueFull | Self::EngineUnavailable(_))
    }

    /// Returns an HTTP-appropriate status code for this error.
    #[inline]
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - malformed input
            Self::SightingRejected(_) => 400,

            // 404 Not Found
            Self::ConfigNotFound(_) => 404,

            // 409 Conflict - lifecycle misuse
            Self::EngineAlreadyRunning => 409,

            // 422 Unprocessable Entity - semantic errors
            Self::ConfigParseError(_) | Self::ConfigValidationError(_) => 422,

            // 429 Too Many Requests - backpressure
            Self::QueueFull => 429,

            // 500 Internal Server Error
            Self::Observer(_) | Self::IoError(_) => 500,

            // 503 Service Unavailable
            Self::EngineNotRunning | Self::EngineUnavailable(_) => 503,
        }
    }

    /// Returns a machine-readable error code for API responses.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::SightingRejected(RejectReason::MalformedIdentifier) => "MALFORMED_IDENTIFIER",
            Self::SightingRejected(RejectReason::OutOfRangeSignal) => "OUT_OF_RANGE_SIGNAL",
            Self::SightingRejected(RejectReason::InvalidTimestamp) => "INVALID_TIMESTAMP",
            Self::QueueFull => "QUEUE_FULL",
            Self::EngineNotRunning => "ENGINE_NOT_RUNNING",
            Self::EngineAlreadyRunning => "ENGINE_ALREADY_RUNNING",
            Self::EngineUnavailable(_) => "ENGINE_UNAVAILABLE",
            Self::Observer(_) => "OBSERVER_ERROR",
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::IoError(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<RejectReason> for BeaconError {
    fn from(reason: RejectReason) -> Self {
        Self::SightingRejected(reason)
    }
}

impl From<IngestionError> for BeaconError {
    fn from(err: IngestionError) -> Self {
        match err {
            IngestionError::Rejected(reason) => Self::SightingRejected(reason),
            IngestionError::QueueFull => Self::QueueFull,
            IngestionError::NotRunning => Self::EngineNotRunning,
        }
    }
}

impl From<EngineError> for BeaconError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::AlreadyRunning => Self::EngineAlreadyRunning,
            EngineError::NotRunning => Self::EngineNotRunning,
            EngineError::Unavailable(message) => Self::EngineUnavailable(message.to_string()),
            EngineError::Config(err) => err.into(),
        }
    }
}

impl From<ObserverError> for BeaconError {
    fn from(err: ObserverError) -> Self {
        Self::Observer(err)
    }
}

impl From<ConfigError> for BeaconError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NotFound(path) => Self::ConfigNotFound(path),
            ConfigError::Load(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::Serialize(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::WriteError { source, .. } => Self::IoError(source),
            e @ ConfigError::ValidationError { .. } => Self::ConfigValidationError(e.to_string()),
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
                Self::ConfigValidationError(messages.join("; "))
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
