//! Built-in observers registered by the server.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use beacon_core::{BeaconEvent, BeaconObserver, ObserverError};

/// Logs every event through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl BeaconObserver for TracingObserver {
    fn name(&self) -> &str {
        "tracing"
    }

    fn on_event(&self, event: &BeaconEvent) -> Result<(), ObserverError> {
        tracing::info!(
            identifier = %event.identifier,
            kind = %event.kind,
            at = %event.timestamp,
            strength = event.estimate.smoothed_strength,
            distance_m = ?event.estimate.distance_m,
            "Beacon event"
        );
        Ok(())
    }
}

/// Ring buffer of the most recent events, backing `/api/events`.
///
/// Clones share the same buffer.
#[derive(Debug, Clone)]
pub struct RecentEvents {
    buffer: Arc<Mutex<VecDeque<BeaconEvent>>>,
    capacity: usize,
}

impl RecentEvents {
    /// Create an empty feed holding at most `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Up to `limit` events, newest first.
    #[must_use]
    pub fn latest(&self, limit: usize) -> Vec<BeaconEvent> {
        self.buffer
            .lock()
            .map(|buffer| buffer.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    /// Number of buffered events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.lock().map(|buffer| buffer.len()).unwrap_or(0)
    }

    /// Whether the feed is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of buffered events.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

impl BeaconObserver for RecentEvents {
    fn name(&self) -> &str {
        "recent-events"
    }

    fn on_event(&self, event: &BeaconEvent) -> Result<(), ObserverError> {
        let mut buffer = self
            .buffer
            .lock()
            .map_err(|_| ObserverError::failed("recent events buffer poisoned"))?;
        if buffer.len() == self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(event.clone());
        Ok(())
    }
}
