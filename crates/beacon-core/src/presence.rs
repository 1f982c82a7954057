//! Per-beacon presence state machine.
//!
//! ```text
//!            sighting                 min_enter_samples reached
//!  Absent ────────────▶ Entering ───────────────────────────────▶ Present
//!    ▲                     │ silence ≥ soft (no event)      ▲        │ silence ≥ soft
//!    │                     ▼                                │        ▼
//!    │◀──────────────── Absent                  re-sighting └──── Exiting
//!    │                                                              │ silence ≥ hard
//!    └────────────────────────── Exit ◀─────────────────────────────┘
//! ```
//!
//! Events for one identifier are always ordered Enter, Update*, Exit. An
//! absent record is kept for `removal_grace_period` and then dropped.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use crate::config::EngineConfig;
use crate::types::{
    BeaconEvent, BeaconIdentifier, EventKind, PresenceSnapshot, PresenceStatus, RangeEstimate,
    Timestamp,
};

/// Mutable presence record for one beacon.
#[derive(Debug, Clone)]
pub struct PresenceState {
    identifier: BeaconIdentifier,
    status: PresenceStatus,
    last_seen_at: Timestamp,
    estimate: RangeEstimate,
    corroborations: VecDeque<Timestamp>,
    last_update_at: Option<Timestamp>,
}

impl PresenceState {
    fn new(estimate: RangeEstimate) -> Self {
        Self {
            identifier: estimate.identifier,
            status: PresenceStatus::Absent,
            last_seen_at: estimate.last_updated,
            estimate,
            corroborations: VecDeque::new(),
            last_update_at: None,
        }
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> PresenceStatus {
        self.status
    }

    /// Last corroborating sighting.
    #[must_use]
    pub const fn last_seen_at(&self) -> Timestamp {
        self.last_seen_at
    }

    /// Latest estimate.
    #[must_use]
    pub const fn estimate(&self) -> &RangeEstimate {
        &self.estimate
    }

    /// Read-only copy for queries.
    #[must_use]
    pub const fn snapshot(&self) -> PresenceSnapshot {
        PresenceSnapshot {
            identifier: self.identifier,
            status: self.status,
            last_seen_at: self.last_seen_at,
            estimate: self.estimate,
        }
    }
}

/// Result of a timeout check for one identifier.
#[derive(Debug, Clone, PartialEq)]
pub enum TimeoutOutcome {
    /// Nothing changed.
    Unchanged,
    /// Status changed without an event (Present to Exiting, Entering to Absent).
    Transitioned(PresenceStatus),
    /// `Exit` was emitted.
    Exited(BeaconEvent),
    /// The record was removed after its grace period.
    Removed,
}

/// Owner of every [`PresenceState`].
#[derive(Debug)]
pub struct PresenceTracker {
    states: HashMap<BeaconIdentifier, PresenceState>,
    min_enter_samples: usize,
    debounce_window: Duration,
    enter_threshold_dbm: f64,
    update_interval: Duration,
    soft_exit_timeout: Duration,
    hard_exit_timeout: Duration,
    removal_grace_period: Duration,
}

impl PresenceTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            states: HashMap::new(),
            min_enter_samples: config.min_enter_samples.max(1),
            debounce_window: config.debounce_window,
            enter_threshold_dbm: f64::from(config.enter_threshold_dbm),
            update_interval: config.update_interval,
            soft_exit_timeout: config.soft_exit_timeout,
            hard_exit_timeout: config.hard_exit_timeout,
            removal_grace_period: config.removal_grace_period,
        }
    }

    /// Feed a fresh estimate for one beacon.
    ///
    /// Returns `Enter` when the debounce threshold is reached, a rate-limited
    /// `Update` while present, and `None` otherwise. Stale estimates are
    /// ignored.
    pub fn on_sighting(&mut self, estimate: RangeEstimate) -> Option<BeaconEvent> {
        if estimate.is_stale() {
            return None;
        }
        let now = estimate.last_updated;
        let corroborates = estimate.smoothed_strength >= self.enter_threshold_dbm;

        let state = self
            .states
            .entry(estimate.identifier)
            .or_insert_with(|| PresenceState::new(estimate));
        state.estimate = estimate;

        if !corroborates {
            tracing::trace!(
                identifier = %estimate.identifier,
                strength = estimate.smoothed_strength,
                "Sighting below enter threshold"
            );
            return None;
        }

        state.last_seen_at = state.last_seen_at.max(now);
        if state.status == PresenceStatus::Absent {
            state.corroborations.clear();
            state.last_update_at = None;
            state.status = PresenceStatus::Entering;
        }
        state.corroborations.push_back(now);
        let cutoff = now.saturating_sub(self.debounce_window);
        while state.corroborations.front().is_some_and(|t| *t < cutoff) {
            state.corroborations.pop_front();
        }

        match state.status {
            PresenceStatus::Entering if state.corroborations.len() >= self.min_enter_samples => {
                state.status = PresenceStatus::Present;
                state.last_update_at = Some(now);
                tracing::debug!(identifier = %state.identifier, at = %now, "Beacon entered");
                Some(BeaconEvent::new(EventKind::Enter, estimate, now))
            }
            PresenceStatus::Exiting => {
                // Back before the hard timeout: the Enter already happened.
                state.status = PresenceStatus::Present;
                tracing::debug!(identifier = %state.identifier, "Beacon recovered before exit");
                Self::rate_limited_update(state, self.update_interval, now)
            }
            PresenceStatus::Present => Self::rate_limited_update(state, self.update_interval, now),
            PresenceStatus::Entering | PresenceStatus::Absent => None,
        }
    }

    fn rate_limited_update(
        state: &mut PresenceState,
        interval: Duration,
        now: Timestamp,
    ) -> Option<BeaconEvent> {
        let due = state
            .last_update_at
            .map_or(true, |last| now.saturating_since(last) >= interval);
        if !due {
            return None;
        }
        state.last_update_at = Some(now);
        Some(BeaconEvent::new(EventKind::Update, state.estimate, now))
    }

    /// Apply the silence timeouts to one identifier.
    ///
    /// Returns `Exit` at most once per enter/exit cycle.
    pub fn on_timeout_check(
        &mut self,
        identifier: &BeaconIdentifier,
        now: Timestamp,
    ) -> Option<BeaconEvent> {
        match self.check(identifier, now) {
            TimeoutOutcome::Exited(event) => Some(event),
            _ => None,
        }
    }

    /// Like [`PresenceTracker::on_timeout_check`] but reports every outcome.
    pub fn check(&mut self, identifier: &BeaconIdentifier, now: Timestamp) -> TimeoutOutcome {
        let Some(state) = self.states.get_mut(identifier) else {
            return TimeoutOutcome::Unchanged;
        };
        let silence = now.saturating_since(state.last_seen_at);

        match state.status {
            PresenceStatus::Present | PresenceStatus::Exiting
                if silence >= self.hard_exit_timeout =>
            {
                state.status = PresenceStatus::Absent;
                state.corroborations.clear();
                state.last_update_at = None;
                tracing::debug!(
                    identifier = %state.identifier,
                    silence_ms = silence.as_millis(),
                    "Beacon exited"
                );
                TimeoutOutcome::Exited(BeaconEvent::new(EventKind::Exit, state.estimate, now))
            }
            PresenceStatus::Present if silence >= self.soft_exit_timeout => {
                state.status = PresenceStatus::Exiting;
                TimeoutOutcome::Transitioned(PresenceStatus::Exiting)
            }
            PresenceStatus::Entering if silence >= self.soft_exit_timeout => {
                state.status = PresenceStatus::Absent;
                state.corroborations.clear();
                TimeoutOutcome::Transitioned(PresenceStatus::Absent)
            }
            PresenceStatus::Absent if silence >= self.removal_grace_period => {
                self.states.remove(identifier);
                tracing::trace!(identifier = %identifier, "Presence record removed");
                TimeoutOutcome::Removed
            }
            _ => TimeoutOutcome::Unchanged,
        }
    }

    /// Run the timeout check over every tracked identifier.
    ///
    /// Returns the emitted `Exit` events and the identifiers whose records
    /// were removed.
    pub fn sweep(&mut self, now: Timestamp) -> (Vec<BeaconEvent>, Vec<BeaconIdentifier>) {
        let identifiers: Vec<BeaconIdentifier> = self.states.keys().copied().collect();
        let mut exits = Vec::new();
        let mut removed = Vec::new();
        for identifier in identifiers {
            match self.check(&identifier, now) {
                TimeoutOutcome::Exited(event) => exits.push(event),
                TimeoutOutcome::Removed => removed.push(identifier),
                TimeoutOutcome::Unchanged | TimeoutOutcome::Transitioned(_) => {}
            }
        }
        (exits, removed)
    }

    /// Emit `Exit` for every present or exiting beacon, as on shutdown.
    pub fn exit_all(&mut self, now: Timestamp) -> Vec<BeaconEvent> {
        let mut exits: Vec<BeaconEvent> = self
            .states
            .values_mut()
            .filter(|state| {
                matches!(
                    state.status,
                    PresenceStatus::Present | PresenceStatus::Exiting
                )
            })
            .map(|state| {
                state.status = PresenceStatus::Absent;
                state.corroborations.clear();
                state.last_update_at = None;
                BeaconEvent::new(EventKind::Exit, state.estimate, now)
            })
            .collect();
        exits.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        exits
    }

    /// State for one identifier.
    #[must_use]
    pub fn get(&self, identifier: &BeaconIdentifier) -> Option<&PresenceState> {
        self.states.get(identifier)
    }

    /// Status for one identifier; untracked beacons are absent.
    #[must_use]
    pub fn status(&self, identifier: &BeaconIdentifier) -> PresenceStatus {
        self.states
            .get(identifier)
            .map_or(PresenceStatus::Absent, PresenceState::status)
    }

    /// Newest corroborating sighting for one identifier.
    #[must_use]
    pub fn last_seen(&self, identifier: &BeaconIdentifier) -> Option<Timestamp> {
        self.states.get(identifier).map(PresenceState::last_seen_at)
    }

    /// Copies of every record, sorted by identifier.
    #[must_use]
    pub fn snapshot(&self) -> Vec<PresenceSnapshot> {
        let mut snapshot: Vec<_> = self.states.values().map(PresenceState::snapshot).collect();
        snapshot.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        snapshot
    }

    /// Number of tracked records, absent ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Whether nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ranging::RangingFilter;
    use crate::types::{BeaconNamespace, Sighting};

    fn b1() -> BeaconIdentifier {
        BeaconIdentifier::new(
            "f7826da6-4fa2-4e98-8024-bc5b71e0893e"
                .parse::<BeaconNamespace>()
                .unwrap(),
            1,
            1,
        )
    }

    fn config() -> EngineConfig {
        EngineConfig {
            min_enter_samples: 3,
            soft_exit_timeout: Duration::from_secs(5),
            hard_exit_timeout: Duration::from_secs(10),
            update_interval: Duration::from_secs(1),
            removal_grace_period: Duration::from_secs(30),
            ..EngineConfig::default()
        }
    }

    struct Harness {
        filter: RangingFilter,
        tracker: PresenceTracker,
    }

    impl Harness {
        fn new(config: &EngineConfig) -> Self {
            Self {
                filter: RangingFilter::new(config),
                tracker: PresenceTracker::new(config),
            }
        }

        fn see(&mut self, strength: i16, at_ms: u64) -> Option<BeaconEvent> {
            let estimate = self.filter.observe(&Sighting {
                identifier: b1(),
                signal_strength: strength,
                tx_power: None,
                observed_at: Timestamp::from_millis(at_ms),
            });
            self.tracker.on_sighting(estimate)
        }

        fn sweep(&mut self, at_ms: u64) -> Vec<BeaconEvent> {
            self.tracker.sweep(Timestamp::from_millis(at_ms)).0
        }
    }

    fn kinds(events: &[BeaconEvent]) -> Vec<EventKind> {
        events.iter().map(|e| e.kind).collect()
    }

    #[test]
    fn test_enter_after_min_samples_then_exit_after_hard_timeout() {
        let mut h = Harness::new(&config());
        assert!(h.see(-60, 0).is_none());
        assert_eq!(h.tracker.status(&b1()), PresenceStatus::Entering);
        assert!(h.see(-60, 1000).is_none());
        let enter = h.see(-60, 2000).unwrap();
        assert_eq!(enter.kind, EventKind::Enter);
        assert_eq!(enter.timestamp, Timestamp::from_secs(2));

        let mut events = Vec::new();
        for t in (2500..=12_000).step_by(500) {
            events.extend(h.sweep(t));
        }
        assert_eq!(kinds(&events), vec![EventKind::Exit]);
        assert_eq!(events[0].timestamp, Timestamp::from_secs(12));
        assert_eq!(h.tracker.status(&b1()), PresenceStatus::Absent);
    }

    #[test]
    fn test_soft_timeout_moves_to_exiting_without_event() {
        let mut h = Harness::new(&config());
        for t in [0, 1000, 2000] {
            h.see(-60, t);
        }
        assert!(h.sweep(7000).is_empty());
        assert_eq!(h.tracker.status(&b1()), PresenceStatus::Exiting);
    }

    #[test]
    fn test_resighting_while_exiting_suppresses_second_enter() {
        let mut h = Harness::new(&config());
        for t in [0, 1000, 2000] {
            h.see(-60, t);
        }
        h.sweep(8000);
        assert_eq!(h.tracker.status(&b1()), PresenceStatus::Exiting);

        let event = h.see(-60, 9000).unwrap();
        assert_eq!(event.kind, EventKind::Update);
        assert_eq!(h.tracker.status(&b1()), PresenceStatus::Present);

        // Silence is measured from the re-sighting.
        assert!(h.sweep(12_000).is_empty());
        assert_eq!(kinds(&h.sweep(19_000)), vec![EventKind::Exit]);
    }

    #[test]
    fn test_exit_emitted_once() {
        let mut h = Harness::new(&config());
        for t in [0, 1000, 2000] {
            h.see(-60, t);
        }
        assert_eq!(h.sweep(13_000).len(), 1);
        assert!(h.sweep(14_000).is_empty());
        assert!(h.sweep(20_000).is_empty());
    }

    #[test]
    fn test_resighting_after_exit_starts_fresh_cycle() {
        let mut h = Harness::new(&config());
        for t in [0, 1000, 2000] {
            h.see(-60, t);
        }
        assert_eq!(kinds(&h.sweep(12_000)), vec![EventKind::Exit]);

        assert!(h.see(-60, 15_000).is_none());
        assert_eq!(h.tracker.status(&b1()), PresenceStatus::Entering);
        assert!(h.see(-60, 16_000).is_none());
        assert_eq!(h.see(-60, 17_000).unwrap().kind, EventKind::Enter);
    }

    #[test]
    fn test_updates_rate_limited() {
        let mut h = Harness::new(&config());
        let mut events = Vec::new();
        // Sightings every 100ms for 5 seconds.
        for t in (0..5000).step_by(100) {
            events.extend(h.see(-60, t));
        }
        assert_eq!(events[0].kind, EventKind::Enter);
        let updates: Vec<u64> = events
            .iter()
            .filter(|e| e.kind == EventKind::Update)
            .map(|e| e.timestamp.as_millis())
            .collect();
        assert!(updates.len() <= 5);
        assert!(updates.windows(2).all(|w| w[1] - w[0] >= 1000));
        assert_eq!(
            events.iter().filter(|e| e.kind == EventKind::Enter).count(),
            1
        );
    }

    #[test]
    fn test_sparse_sightings_never_enter() {
        let config = EngineConfig {
            debounce_window: Duration::from_secs(2),
            soft_exit_timeout: Duration::from_secs(5),
            ..config()
        };
        let mut h = Harness::new(&config);
        // Three sightings, but never three within the debounce window.
        assert!(h.see(-60, 0).is_none());
        assert!(h.see(-60, 3000).is_none());
        assert!(h.see(-60, 6000).is_none());
        assert_eq!(h.tracker.status(&b1()), PresenceStatus::Entering);
    }

    #[test]
    fn test_entering_times_out_silently() {
        let mut h = Harness::new(&config());
        h.see(-60, 0);
        assert!(h.sweep(6000).is_empty());
        assert_eq!(h.tracker.status(&b1()), PresenceStatus::Absent);
        assert!(h.sweep(40_000).is_empty());
        assert!(h.tracker.is_empty());
    }

    #[test]
    fn test_absent_record_removed_after_grace() {
        let mut h = Harness::new(&config());
        for t in [0, 1000, 2000] {
            h.see(-60, t);
        }
        h.sweep(12_000);
        assert_eq!(h.tracker.len(), 1);
        let (_, removed) = h.tracker.sweep(Timestamp::from_secs(31));
        assert!(removed.is_empty());
        let (_, removed) = h.tracker.sweep(Timestamp::from_secs(32));
        assert_eq!(removed, vec![b1()]);
        assert!(h.tracker.get(&b1()).is_none());
    }

    #[test]
    fn test_weak_sightings_do_not_corroborate() {
        let config = EngineConfig {
            enter_threshold_dbm: -70,
            ..config()
        };
        let mut h = Harness::new(&config);
        for t in [0, 1000, 2000, 3000] {
            assert!(h.see(-90, t).is_none());
        }
        assert_eq!(h.tracker.status(&b1()), PresenceStatus::Absent);
    }

    #[test]
    fn test_min_enter_samples_of_one_enters_immediately() {
        let config = EngineConfig {
            min_enter_samples: 1,
            ..config()
        };
        let mut h = Harness::new(&config);
        assert_eq!(h.see(-60, 0).unwrap().kind, EventKind::Enter);
        assert!(h.see(-60, 100).is_none());
    }

    #[test]
    fn test_exit_all_only_exits_entered_beacons() {
        let mut h = Harness::new(&config());
        for t in [0, 1000, 2000] {
            h.see(-60, t);
        }
        let entering = BeaconIdentifier::new(b1().namespace, 9, 9);
        let estimate = h.filter.observe(&Sighting {
            identifier: entering,
            signal_strength: -60,
            tx_power: None,
            observed_at: Timestamp::from_secs(2),
        });
        h.tracker.on_sighting(estimate);

        let exits = h.tracker.exit_all(Timestamp::from_secs(3));
        assert_eq!(exits.len(), 1);
        assert_eq!(exits[0].identifier, b1());
        assert_eq!(exits[0].kind, EventKind::Exit);
        assert!(h.tracker.exit_all(Timestamp::from_secs(4)).is_empty());
    }

    #[test]
    fn test_stale_estimate_ignored() {
        let mut tracker = PresenceTracker::new(&config());
        let stale = RangeEstimate::stale(b1(), Timestamp::from_secs(1), -100.0);
        assert!(tracker.on_sighting(stale).is_none());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_timeout_check_on_unknown_identifier_is_noop() {
        let mut tracker = PresenceTracker::new(&config());
        assert!(tracker
            .on_timeout_check(&b1(), Timestamp::from_secs(100))
            .is_none());
    }
}
