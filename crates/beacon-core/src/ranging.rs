//! Signal smoothing and distance estimation.
//!
//! Each beacon has a [`RangingWindow`] bounded by both capacity and age. The
//! smoothed strength is an age-weighted mean: a sample's weight halves every
//! `ranging_half_life`, so a single outlier is damped while the estimate
//! still follows a beacon that is really moving.
//!
//! Distance uses the log-distance path-loss model
//! `d = 10^((tx_power - rssi) / (10 * n))`.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use crate::config::EngineConfig;
use crate::types::{BeaconIdentifier, RangeEstimate, Sighting, Timestamp};

#[derive(Debug, Clone, Copy)]
struct Sample {
    strength: i16,
    tx_power: Option<i16>,
    at: Timestamp,
}

/// Recent samples for one beacon, oldest first.
#[derive(Debug, Clone)]
pub struct RangingWindow {
    samples: VecDeque<Sample>,
    capacity: usize,
    last_strength: f64,
}

impl RangingWindow {
    fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity.min(64)),
            capacity,
            last_strength: f64::NAN,
        }
    }

    fn push(&mut self, sighting: &Sighting) {
        let sample = Sample {
            strength: sighting.signal_strength,
            tx_power: sighting.tx_power,
            at: sighting.observed_at,
        };
        // Keep the deque sorted even if a late sample slips through.
        match self.samples.back() {
            Some(last) if last.at > sample.at => {
                let idx = self.samples.partition_point(|s| s.at <= sample.at);
                self.samples.insert(idx, sample);
            }
            _ => self.samples.push_back(sample),
        }
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    fn purge_before(&mut self, cutoff: Timestamp) {
        while self.samples.front().is_some_and(|s| s.at < cutoff) {
            self.samples.pop_front();
        }
    }

    /// Number of samples currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the window holds no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Timestamp of the newest sample.
    #[must_use]
    pub fn newest(&self) -> Option<Timestamp> {
        self.samples.back().map(|s| s.at)
    }
}

/// Per-identifier windows plus the smoothing parameters.
#[derive(Debug)]
pub struct RangingFilter {
    windows: HashMap<BeaconIdentifier, RangingWindow>,
    horizon: Duration,
    capacity: usize,
    half_life: Duration,
    full_confidence_samples: usize,
    default_tx_power: i16,
    path_loss_exponent: f64,
    floor_dbm: f64,
}

impl RangingFilter {
    /// Create an empty filter.
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            windows: HashMap::new(),
            horizon: config.ranging_window_horizon,
            capacity: config.ranging_window_capacity.max(1),
            half_life: config.ranging_half_life,
            full_confidence_samples: config.min_enter_samples.max(1),
            default_tx_power: config.default_tx_power,
            path_loss_exponent: config.path_loss_exponent,
            floor_dbm: f64::from(config.min_signal_dbm),
        }
    }

    /// Add a sighting to its window and return the refreshed estimate.
    pub fn observe(&mut self, sighting: &Sighting) -> RangeEstimate {
        let capacity = self.capacity;
        let window = self
            .windows
            .entry(sighting.identifier)
            .or_insert_with(|| RangingWindow::new(capacity));
        window.push(sighting);

        let now = window.newest().unwrap_or(sighting.observed_at);
        window.purge_before(now.saturating_sub(self.horizon));
        let estimate = self.compute(sighting.identifier, now);
        tracing::trace!(
            identifier = %sighting.identifier,
            smoothed = estimate.smoothed_strength,
            samples = estimate.sample_count,
            "Ranging window updated"
        );
        estimate
    }

    /// Purge stale samples for `identifier` and return its current estimate.
    ///
    /// An estimate with `sample_count == 0` means the beacon has gone quiet
    /// for longer than the horizon.
    pub fn estimate(&mut self, identifier: BeaconIdentifier, now: Timestamp) -> RangeEstimate {
        if let Some(window) = self.windows.get_mut(&identifier) {
            window.purge_before(now.saturating_sub(self.horizon));
        }
        self.compute(identifier, now)
    }

    /// Timestamp of the newest sample held for `identifier`.
    #[must_use]
    pub fn last_observed(&self, identifier: &BeaconIdentifier) -> Option<Timestamp> {
        self.windows.get(identifier).and_then(RangingWindow::newest)
    }

    /// Drop the window for `identifier`.
    pub fn forget(&mut self, identifier: &BeaconIdentifier) -> bool {
        self.windows.remove(identifier).is_some()
    }

    /// Drop windows whose samples have all aged past the horizon.
    ///
    /// Returns how many windows were dropped.
    pub fn purge_idle(&mut self, now: Timestamp) -> usize {
        let cutoff = now.saturating_sub(self.horizon);
        let before = self.windows.len();
        self.windows.retain(|_, window| {
            window.purge_before(cutoff);
            !window.is_empty()
        });
        before - self.windows.len()
    }

    /// Number of beacons with a window.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.windows.len()
    }

    /// Window for `identifier`, if any.
    #[must_use]
    pub fn window(&self, identifier: &BeaconIdentifier) -> Option<&RangingWindow> {
        self.windows.get(identifier)
    }

    fn compute(&mut self, identifier: BeaconIdentifier, now: Timestamp) -> RangeEstimate {
        let floor = self.floor_dbm;
        let Some(window) = self.windows.get_mut(&identifier) else {
            return RangeEstimate::stale(identifier, now, floor);
        };
        let Some(newest) = window.samples.back().copied() else {
            let last = if window.last_strength.is_finite() {
                window.last_strength
            } else {
                floor
            };
            return RangeEstimate::stale(identifier, now, last);
        };

        let half_life = self.half_life.as_secs_f64().max(f64::EPSILON);
        let (weighted, total) = window
            .samples
            .iter()
            .fold((0.0_f64, 0.0_f64), |(weighted, total), sample| {
                let age = newest.at.saturating_since(sample.at).as_secs_f64();
                let weight = 0.5_f64.powf(age / half_life);
                (weighted + weight * f64::from(sample.strength), total + weight)
            });
        let smoothed = weighted / total;
        window.last_strength = smoothed;

        let tx_power = newest.tx_power.unwrap_or(self.default_tx_power);
        let distance =
            10_f64.powf((f64::from(tx_power) - smoothed) / (10.0 * self.path_loss_exponent));

        #[allow(clippy::cast_precision_loss)]
        let coverage =
            (window.len() as f64 / self.full_confidence_samples as f64).min(1.0);
        let recency = 0.5_f64.powf(now.saturating_since(newest.at).as_secs_f64() / half_life);

        RangeEstimate {
            identifier,
            smoothed_strength: smoothed,
            sample_count: window.len(),
            last_updated: newest.at,
            distance_m: distance.is_finite().then_some(distance),
            confidence: coverage * recency,
        }
    }
}
