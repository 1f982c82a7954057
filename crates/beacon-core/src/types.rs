//! Shared data model.
//!
//! Identifiers, sightings, estimates and events flow between every stage of
//! the engine, so they live here rather than in the module that creates them.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

static EDDYSTONE_NAMESPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9a-fA-F]{20}$").expect("valid regex"));

// ============================================================================
// Time
// ============================================================================

/// Monotonic timestamp in milliseconds since the engine clock's epoch.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(transparent)]
#[schema(example = 2000)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The clock epoch.
    pub const ZERO: Self = Self(0);

    /// Build a timestamp from milliseconds since the epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Build a timestamp from whole seconds since the epoch.
    #[must_use]
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs * 1000)
    }

    /// Milliseconds since the epoch.
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// Time elapsed since `earlier`, zero if `earlier` is in the future.
    #[must_use]
    pub const fn saturating_since(self, earlier: Self) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }

    /// `self - duration`, clamped at the epoch.
    #[must_use]
    pub fn saturating_sub(self, duration: Duration) -> Self {
        Self(self.0.saturating_sub(duration_millis(duration)))
    }

    /// `self + duration`, saturating at `u64::MAX`.
    #[must_use]
    pub fn saturating_add(self, duration: Duration) -> Self {
        Self(self.0.saturating_add(duration_millis(duration)))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// Identifiers
// ============================================================================

/// Namespace part of a beacon identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BeaconNamespace {
    /// iBeacon proximity UUID.
    Uuid(Uuid),
    /// Eddystone 10-byte namespace.
    Eddystone([u8; 10]),
}

/// Error returned when a namespace string is neither a UUID nor 20 hex digits.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid beacon namespace: '{0}'")]
pub struct InvalidNamespace(pub String);

impl FromStr for BeaconNamespace {
    type Err = InvalidNamespace;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if EDDYSTONE_NAMESPACE.is_match(trimmed) {
            let mut bytes = [0u8; 10];
            for (i, byte) in bytes.iter_mut().enumerate() {
                *byte = u8::from_str_radix(&trimmed[i * 2..i * 2 + 2], 16)
                    .map_err(|_| InvalidNamespace(s.to_string()))?;
            }
            return Ok(Self::Eddystone(bytes));
        }
        Uuid::parse_str(trimmed)
            .map(Self::Uuid)
            .map_err(|_| InvalidNamespace(s.to_string()))
    }
}

impl TryFrom<String> for BeaconNamespace {
    type Error = InvalidNamespace;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BeaconNamespace> for String {
    fn from(value: BeaconNamespace) -> Self {
        value.to_string()
    }
}

impl fmt::Display for BeaconNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uuid(uuid) => write!(f, "{}", uuid.hyphenated()),
            Self::Eddystone(bytes) => {
                for byte in bytes {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}

/// Identity of one beacon: namespace plus major/minor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "namespace": "f7826da6-4fa2-4e98-8024-bc5b71e0893e",
    "major": 1,
    "minor": 42
}))]
pub struct BeaconIdentifier {
    /// iBeacon UUID or Eddystone namespace.
    #[schema(value_type = String, example = "f7826da6-4fa2-4e98-8024-bc5b71e0893e")]
    pub namespace: BeaconNamespace,

    /// Major group number.
    #[schema(example = 1)]
    pub major: u16,

    /// Minor number within the group.
    #[schema(example = 42)]
    pub minor: u16,
}

impl BeaconIdentifier {
    /// Create an identifier.
    #[must_use]
    pub const fn new(namespace: BeaconNamespace, major: u16, minor: u16) -> Self {
        Self {
            namespace,
            major,
            minor,
        }
    }
}

impl fmt::Display for BeaconIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.major, self.minor)
    }
}

// ============================================================================
// Sightings
// ============================================================================

/// Advertisement record as decoded by the radio stack, before validation.
///
/// Numeric fields are wider than their canonical types so that garbage
/// reaches the normalizer instead of failing deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "namespace": "f7826da6-4fa2-4e98-8024-bc5b71e0893e",
    "major": 1,
    "minor": 42,
    "rssi": -67,
    "tx_power": -59,
    "timestamp_ms": null
}))]
pub struct RawRecord {
    /// Namespace as text (UUID or 20 hex digits).
    pub namespace: String,

    /// Major number, expected in `0..=65535`.
    pub major: i64,

    /// Minor number, expected in `0..=65535`.
    pub minor: i64,

    /// Received signal strength in dBm.
    pub rssi: i64,

    /// Calibrated transmit power at 1m, if advertised.
    #[serde(default)]
    pub tx_power: Option<i64>,

    /// Engine-clock timestamp; `None` stamps the record on arrival.
    #[serde(default)]
    pub timestamp_ms: Option<i64>,
}

/// One validated observation of a beacon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sighting {
    /// Which beacon was seen.
    pub identifier: BeaconIdentifier,
    /// Received signal strength in dBm.
    pub signal_strength: i16,
    /// Calibrated transmit power at 1m, if advertised.
    pub tx_power: Option<i16>,
    /// When the advertisement was observed.
    pub observed_at: Timestamp,
}

/// Smoothed view of a beacon's recent signal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RangeEstimate {
    /// Which beacon this estimate describes.
    pub identifier: BeaconIdentifier,

    /// Age-weighted mean signal strength in dBm.
    #[schema(example = -66.4)]
    pub smoothed_strength: f64,

    /// Samples left in the window; zero means the estimate is stale.
    #[schema(example = 5)]
    pub sample_count: usize,

    /// Timestamp of the newest sample (or of the query, when stale).
    pub last_updated: Timestamp,

    /// Estimated distance in meters.
    #[schema(example = 2.1)]
    pub distance_m: Option<f64>,

    /// Confidence in `[0, 1]`.
    #[schema(example = 0.8)]
    pub confidence: f64,
}

impl RangeEstimate {
    /// An estimate with no samples behind it, carrying the last known strength.
    #[must_use]
    pub const fn stale(identifier: BeaconIdentifier, at: Timestamp, last_strength: f64) -> Self {
        Self {
            identifier,
            smoothed_strength: last_strength,
            sample_count: 0,
            last_updated: at,
            distance_m: None,
            confidence: 0.0,
        }
    }

    /// Whether the window was empty when this estimate was produced.
    #[must_use]
    pub const fn is_stale(&self) -> bool {
        self.sample_count == 0
    }
}

// ============================================================================
// Presence and events
// ============================================================================

/// Presence status of a tracked beacon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    /// Not nearby. Kept only while the removal grace period runs.
    Absent,
    /// Seen, but not yet corroborated enough.
    Entering,
    /// Nearby.
    Present,
    /// Silent past the soft timeout; `Exit` pending.
    Exiting,
}

/// Kind of a presence event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// The beacon came into range.
    Enter,
    /// The beacon is still in range; carries a fresh estimate.
    Update,
    /// The beacon left range.
    Exit,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Enter => "enter",
            Self::Update => "update",
            Self::Exit => "exit",
        })
    }
}

/// Event delivered to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "identifier": {
        "namespace": "f7826da6-4fa2-4e98-8024-bc5b71e0893e",
        "major": 1,
        "minor": 42
    },
    "kind": "enter",
    "estimate": {
        "identifier": {
            "namespace": "f7826da6-4fa2-4e98-8024-bc5b71e0893e",
            "major": 1,
            "minor": 42
        },
        "smoothed_strength": -66.4,
        "sample_count": 3,
        "last_updated": 2000,
        "distance_m": 2.1,
        "confidence": 1.0
    },
    "timestamp": 2000,
    "emitted_at_utc": "2025-01-15T03:30:00Z"
}))]
pub struct BeaconEvent {
    /// Which beacon the event is about.
    pub identifier: BeaconIdentifier,

    /// What happened.
    pub kind: EventKind,

    /// Latest estimate at the time of the event.
    pub estimate: RangeEstimate,

    /// Engine-clock time of the transition.
    pub timestamp: Timestamp,

    /// Wall-clock time the event was produced.
    pub emitted_at_utc: DateTime<Utc>,
}

impl BeaconEvent {
    /// Build an event stamped with the current wall-clock time.
    #[must_use]
    pub fn new(kind: EventKind, estimate: RangeEstimate, timestamp: Timestamp) -> Self {
        Self {
            identifier: estimate.identifier,
            kind,
            estimate,
            timestamp,
            emitted_at_utc: Utc::now(),
        }
    }
}

/// Read-only copy of one tracked presence record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PresenceSnapshot {
    /// Which beacon.
    pub identifier: BeaconIdentifier,

    /// Current status.
    pub status: PresenceStatus,

    /// Last corroborating sighting.
    pub last_seen_at: Timestamp,

    /// Latest estimate.
    pub estimate: RangeEstimate,
}
