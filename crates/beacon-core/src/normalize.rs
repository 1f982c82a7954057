//! Raw advertisement records to canonical sightings.
//!
//! Normalization is pure: the same record always yields the same outcome,
//! and malformed input produces a [`RejectReason`] rather than a panic.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::config::EngineConfig;
use crate::types::{BeaconIdentifier, BeaconNamespace, RawRecord, Sighting, Timestamp};

/// Advertised transmit power outside this range is not a real calibration value.
const TX_POWER_RANGE: std::ops::RangeInclusive<i64> = -127..=20;

/// Why a raw record was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Namespace, major or minor cannot form a beacon identifier.
    #[error("malformed beacon identifier")]
    MalformedIdentifier,

    /// Signal strength or transmit power outside the accepted range.
    #[error("signal strength out of range")]
    OutOfRangeSignal,

    /// Missing, negative, out-of-order or far-future timestamp.
    #[error("invalid timestamp")]
    InvalidTimestamp,
}

impl RejectReason {
    /// Every reason, for building per-reason counters.
    pub const ALL: [Self; 3] = [
        Self::MalformedIdentifier,
        Self::OutOfRangeSignal,
        Self::InvalidTimestamp,
    ];

    /// Machine-readable code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::MalformedIdentifier => "malformed_identifier",
            Self::OutOfRangeSignal => "out_of_range_signal",
            Self::InvalidTimestamp => "invalid_timestamp",
        }
    }
}

/// Validates raw records against the configured signal bounds.
#[derive(Debug, Clone, Copy)]
pub struct SightingNormalizer {
    min_signal_dbm: i16,
    max_signal_dbm: i16,
}

impl Default for SightingNormalizer {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

impl SightingNormalizer {
    /// Create a normalizer using the signal bounds from `config`.
    #[must_use]
    pub const fn new(config: &EngineConfig) -> Self {
        Self {
            min_signal_dbm: config.min_signal_dbm,
            max_signal_dbm: config.max_signal_dbm,
        }
    }

    /// Normalize a record that must carry its own timestamp.
    ///
    /// # Errors
    ///
    /// Returns the first [`RejectReason`] that applies, checking the
    /// identifier, then the signal, then the timestamp.
    pub fn normalize(&self, raw: &RawRecord) -> Result<Sighting, RejectReason> {
        self.normalize_at(raw, None)
    }

    /// Normalize a record, stamping it with `received_at` when it has no
    /// timestamp of its own.
    ///
    /// # Errors
    ///
    /// Same as [`SightingNormalizer::normalize`].
    pub fn normalize_at(
        &self,
        raw: &RawRecord,
        received_at: Option<Timestamp>,
    ) -> Result<Sighting, RejectReason> {
        let identifier = parse_identifier(raw)?;

        let signal_strength = i16::try_from(raw.rssi)
            .ok()
            .filter(|rssi| (self.min_signal_dbm..=self.max_signal_dbm).contains(rssi))
            .ok_or(RejectReason::OutOfRangeSignal)?;

        let tx_power = match raw.tx_power {
            Some(power) if TX_POWER_RANGE.contains(&power) => {
                Some(i16::try_from(power).map_err(|_| RejectReason::OutOfRangeSignal)?)
            }
            Some(_) => return Err(RejectReason::OutOfRangeSignal),
            None => None,
        };

        let observed_at = match (raw.timestamp_ms, received_at) {
            (Some(ms), _) => u64::try_from(ms)
                .map(Timestamp::from_millis)
                .map_err(|_| RejectReason::InvalidTimestamp)?,
            (None, Some(at)) => at,
            (None, None) => return Err(RejectReason::InvalidTimestamp),
        };

        Ok(Sighting {
            identifier,
            signal_strength,
            tx_power,
            observed_at,
        })
    }
}

fn parse_identifier(raw: &RawRecord) -> Result<BeaconIdentifier, RejectReason> {
    let namespace: BeaconNamespace = raw
        .namespace
        .parse()
        .map_err(|_| RejectReason::MalformedIdentifier)?;
    let major = u16::try_from(raw.major).map_err(|_| RejectReason::MalformedIdentifier)?;
    let minor = u16::try_from(raw.minor).map_err(|_| RejectReason::MalformedIdentifier)?;
    Ok(BeaconIdentifier::new(namespace, major, minor))
}
