//! # beacon-core
//!
//! Proximity tracking for BLE beacons.
//!
//! Raw advertisement records go in; `Enter`, `Update` and `Exit` events come
//! out. Between the two, sightings are validated, smoothed into range
//! estimates, debounced into presence states and aged out by a periodic
//! sweep.
//!
//! ## Architecture
//!
//! - [`types`] - Identifiers, sightings, estimates, events and snapshots
//! - [`config`] - Layered engine configuration and validation
//! - [`normalize`] - Raw record validation into canonical sightings
//! - [`ranging`] - Per-beacon smoothing window and distance estimate
//! - [`presence`] - Debounced presence state machine
//! - [`eviction`] - Periodic timeout sweeps
//! - [`dispatch`] - Isolated fan-out to observers
//! - [`engine`] - The actor tying the pipeline together
//! - [`error`] - Unified error type
//!
//! ## Example
//!
//! ```rust,no_run
//! use beacon_core::{observer_fn, BeaconEngine, EngineConfig, RawRecord};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = BeaconEngine::new(EngineConfig::default())?;
//! engine
//!     .subscribe(observer_fn("print", |event| {
//!         println!("{} {}", event.kind, event.identifier);
//!         Ok(())
//!     }))
//!     .await;
//! engine.start().await?;
//!
//! engine.ingest(&RawRecord {
//!     namespace: "f7826da6-4fa2-4e98-8024-bc5b71e0893e".into(),
//!     major: 1,
//!     minor: 7,
//!     rssi: -63,
//!     tx_power: None,
//!     timestamp_ms: None,
//! })?;
//!
//! engine.stop().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod eviction;
pub mod normalize;
pub mod presence;
pub mod ranging;
pub mod types;

// Re-export primary types for convenience
pub use config::{default_config_path, ConfigError, ConfigResult, EngineConfig};
pub use dispatch::{
    observer_fn, BeaconObserver, EventDispatcher, ObserverError, ObserverFailure, ObserverFn,
    SubscriptionHandle,
};
pub use engine::{BeaconEngine, EngineClock, EngineError, EngineHandle, EngineStats, IngestionError};
pub use error::{BeaconError, Result};
pub use eviction::EvictionScheduler;
pub use normalize::{RejectReason, SightingNormalizer};
pub use presence::{PresenceState, PresenceTracker, TimeoutOutcome};
pub use ranging::{RangingFilter, RangingWindow};
pub use types::{
    BeaconEvent, BeaconIdentifier, BeaconNamespace, EventKind, PresenceSnapshot, PresenceStatus,
    RangeEstimate, RawRecord, Sighting, Timestamp,
};
