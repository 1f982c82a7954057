//! Periodic timeout sweeps.
//!
//! The scheduler owns no presence state. It only pushes a `Sweep(now)`
//! command into the engine queue every `eviction_sweep_interval`, so sweeps
//! are serialized with sightings by the engine actor.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::engine::{Command, EngineClock};

/// Timer task that requests sweeps.
#[derive(Debug, Clone, Copy)]
pub struct EvictionScheduler {
    interval: Duration,
}

impl EvictionScheduler {
    /// Create a scheduler ticking every `interval`.
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Sweep period.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Start ticking until `shutdown` flips to `true` or the queue closes.
    ///
    /// A tick that finds the queue full is skipped; the next one catches up.
    pub(crate) fn spawn(
        self,
        queue: mpsc::Sender<Command>,
        clock: EngineClock,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!(interval_ms = self.interval.as_millis(), "Eviction scheduler started");

            loop {
                tokio::select! {
                    biased;
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        let now = clock.now();
                        match queue.try_send(Command::Sweep(now)) {
                            Ok(()) => {}
                            Err(mpsc::error::TrySendError::Full(_)) => {
                                warn!(at = %now, "Engine queue full, sweep skipped");
                            }
                            Err(mpsc::error::TrySendError::Closed(_)) => break,
                        }
                    }
                }
            }
            debug!("Eviction scheduler stopped");
        })
    }
}
