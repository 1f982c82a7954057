//! The detection engine.
//!
//! A single actor task owns the [`RangingFilter`] and the
//! [`PresenceTracker`]. Producers and the [`EvictionScheduler`] only talk to
//! it through a bounded queue, so per-beacon state never needs a lock and
//! ingestion never waits on detection or dispatch.
//!
//! ```text
//! ingest() ──normalize──▶ ┌───────┐      ┌──────────────────────┐
//!                         │ queue │ ───▶ │ actor: filter+tracker│ ──▶ dispatcher ──▶ observers
//! scheduler ──Sweep(now)▶ └───────┘      └──────────────────────┘
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::config::{ConfigError, EngineConfig};
use crate::dispatch::{
    BeaconObserver, DispatchCounters, EventDispatcher, ObserverFailure, SubscriptionHandle,
};
use crate::eviction::EvictionScheduler;
use crate::normalize::{RejectReason, SightingNormalizer};
use crate::presence::PresenceTracker;
use crate::ranging::RangingFilter;
use crate::types::{BeaconEvent, EventKind, PresenceSnapshot, RawRecord, Sighting, Timestamp};

// ============================================================================
// Errors
// ============================================================================

/// Why `ingest` did not queue a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IngestionError {
    /// The record failed validation.
    #[error("sighting rejected: {0}")]
    Rejected(#[from] RejectReason),

    /// The engine queue is full; the sighting was dropped.
    #[error("engine queue full, sighting dropped")]
    QueueFull,

    /// The engine is not running.
    #[error("engine is not running")]
    NotRunning,
}

/// Lifecycle and query failures.
#[derive(Debug, Error)]
pub enum EngineError {
    /// `start` was called on a running engine.
    #[error("engine is already running")]
    AlreadyRunning,

    /// The operation needs a running engine.
    #[error("engine is not running")]
    NotRunning,

    /// The actor did not answer within the configured timeout.
    #[error("engine did not respond: {0}")]
    Unavailable(&'static str),

    /// The configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ============================================================================
// Clock
// ============================================================================

/// Monotonic clock shared by producers, the scheduler and the actor.
///
/// Built on `tokio::time::Instant`, so paused test runtimes control it.
#[derive(Debug, Clone, Copy)]
pub struct EngineClock {
    epoch: Instant,
}

impl Default for EngineClock {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineClock {
    /// Start a clock whose epoch is now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// Milliseconds since the epoch.
    #[must_use]
    pub fn now(&self) -> Timestamp {
        Timestamp::from_millis(u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX))
    }
}

// ============================================================================
// Stats
// ============================================================================

#[derive(Debug, Default)]
struct EngineCounters {
    ingested: AtomicU64,
    processed: AtomicU64,
    rejected_malformed_identifier: AtomicU64,
    rejected_out_of_range_signal: AtomicU64,
    rejected_invalid_timestamp: AtomicU64,
    queue_full: AtomicU64,
    enters: AtomicU64,
    updates: AtomicU64,
    exits: AtomicU64,
    sweeps: AtomicU64,
}

impl EngineCounters {
    fn reject(&self, reason: RejectReason) {
        let counter = match reason {
            RejectReason::MalformedIdentifier => &self.rejected_malformed_identifier,
            RejectReason::OutOfRangeSignal => &self.rejected_out_of_range_signal,
            RejectReason::InvalidTimestamp => &self.rejected_invalid_timestamp,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn event(&self, kind: EventKind) {
        let counter = match kind {
            EventKind::Enter => &self.enters,
            EventKind::Update => &self.updates,
            EventKind::Exit => &self.exits,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time copy of the engine counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct EngineStats {
    /// Records queued by `ingest`.
    pub ingested: u64,
    /// Sightings processed by the actor.
    pub processed: u64,
    /// Records with an unusable identifier.
    pub rejected_malformed_identifier: u64,
    /// Records with an out-of-range signal.
    pub rejected_out_of_range_signal: u64,
    /// Records with a bad, late or far-future timestamp.
    pub rejected_invalid_timestamp: u64,
    /// Records dropped because the queue was full.
    pub queue_full: u64,
    /// `Enter` events published.
    pub enters: u64,
    /// `Update` events published.
    pub updates: u64,
    /// `Exit` events published.
    pub exits: u64,
    /// Sweeps executed.
    pub sweeps: u64,
    /// Deliveries dropped on full observer queues.
    pub observer_dropped: u64,
    /// Observer errors and panics.
    pub observer_failures: u64,
}

impl EngineStats {
    /// Total rejected records.
    #[must_use]
    pub const fn rejected(&self) -> u64 {
        self.rejected_malformed_identifier
            + self.rejected_out_of_range_signal
            + self.rejected_invalid_timestamp
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Messages processed by the actor, in arrival order.
#[derive(Debug)]
pub(crate) enum Command {
    Sighting(Sighting),
    Sweep(Timestamp),
    Snapshot(oneshot::Sender<Vec<PresenceSnapshot>>),
}

struct Shared {
    config: EngineConfig,
    clock: EngineClock,
    normalizer: SightingNormalizer,
    counters: EngineCounters,
    dispatcher: EventDispatcher,
    dispatch_counters: Arc<DispatchCounters>,
    /// Sightings at least this old would already count as exited.
    max_sample_age: Duration,
    queue: RwLock<Option<mpsc::Sender<Command>>>,
}

struct Running {
    shutdown: watch::Sender<bool>,
    actor: JoinHandle<()>,
    scheduler: JoinHandle<()>,
}

/// Beacon proximity tracking engine.
///
/// Construct with [`BeaconEngine::new`], register observers, then call
/// [`BeaconEngine::start`]. Producers feed it through an [`EngineHandle`].
pub struct BeaconEngine {
    shared: Arc<Shared>,
    running: Mutex<Option<Running>>,
}

impl std::fmt::Debug for BeaconEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BeaconEngine")
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

impl BeaconEngine {
    /// Validate `config` and build a stopped engine.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is invalid.
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let dispatcher = EventDispatcher::new(config.observer_queue_capacity);
        let dispatch_counters = dispatcher.counters();
        Ok(Self {
            shared: Arc::new(Shared {
                normalizer: SightingNormalizer::new(&config),
                clock: EngineClock::new(),
                counters: EngineCounters::default(),
                dispatcher,
                dispatch_counters,
                max_sample_age: config.hard_exit_timeout.min(config.ranging_window_horizon),
                queue: RwLock::new(None),
                config,
            }),
            running: Mutex::new(None),
        })
    }

    /// The validated configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Spawn the actor and the eviction scheduler.
    ///
    /// Presence state starts empty on every start.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::AlreadyRunning`] if the engine is running.
    pub async fn start(&self) -> Result<(), EngineError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(EngineError::AlreadyRunning);
        }

        let config = &self.shared.config;
        let (tx, rx) = mpsc::channel(config.ingest_queue_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let actor = Actor {
            filter: RangingFilter::new(config),
            tracker: PresenceTracker::new(config),
            shared: Arc::clone(&self.shared),
        };
        let actor = tokio::spawn(actor.run(rx, shutdown_tx.subscribe()));
        let scheduler = EvictionScheduler::new(config.eviction_sweep_interval).spawn(
            tx.clone(),
            self.shared.clock,
            shutdown_rx,
        );

        *self.shared.queue.write().await = Some(tx);
        *running = Some(Running {
            shutdown: shutdown_tx,
            actor,
            scheduler,
        });
        info!(
            min_enter_samples = config.min_enter_samples,
            soft_exit_ms = config.soft_exit_timeout.as_millis(),
            hard_exit_ms = config.hard_exit_timeout.as_millis(),
            "Beacon engine started"
        );
        Ok(())
    }

    /// Cooperative shutdown.
    ///
    /// Stops accepting sightings and sweeps, lets the actor drain its queue
    /// (emitting `Exit` for every beacon still present), then closes the
    /// dispatcher. Every wait is bounded by `shutdown_timeout`. Subscriptions
    /// end here; observers must subscribe again before a restart.
    ///
    /// Returns `false` if the engine was not running.
    pub async fn stop(&self) -> bool {
        let Some(running) = self.running.lock().await.take() else {
            return false;
        };
        let limit = self.shared.config.shutdown_timeout;

        self.shared.queue.write().await.take();
        let _ = running.shutdown.send(true);

        if timeout(limit, running.scheduler).await.is_err() {
            warn!("Eviction scheduler did not stop in time");
        }
        let mut actor = running.actor;
        if timeout(limit, &mut actor).await.is_err() {
            warn!("Engine actor did not drain in time, aborting");
            actor.abort();
        }
        let drained = self.shared.dispatcher.close(limit).await;
        info!(observers_drained = drained, "Beacon engine stopped");
        true
    }

    /// Whether `start` has been called without a matching `stop`.
    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Cloneable producer handle.
    #[must_use]
    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Shortcut for `handle().ingest(raw)`.
    ///
    /// # Errors
    ///
    /// See [`EngineHandle::ingest`].
    pub fn ingest(&self, raw: &RawRecord) -> Result<(), IngestionError> {
        self.handle().ingest(raw)
    }

    /// Register an observer.
    pub async fn subscribe<O: BeaconObserver>(&self, observer: O) -> SubscriptionHandle {
        self.shared.dispatcher.subscribe(observer).await
    }

    /// Register a shared observer.
    pub async fn subscribe_arc(&self, observer: Arc<dyn BeaconObserver>) -> SubscriptionHandle {
        self.shared.dispatcher.subscribe_arc(observer).await
    }

    /// Remove an observer. Returns `false` for an unknown handle.
    pub async fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        self.shared.dispatcher.unsubscribe(handle).await
    }

    /// Stream of observer failures.
    #[must_use]
    pub fn observer_errors(&self) -> broadcast::Receiver<ObserverFailure> {
        self.shared.dispatcher.errors()
    }

    /// Current presence records, answered by the actor.
    ///
    /// # Errors
    ///
    /// [`EngineError::NotRunning`] when stopped, [`EngineError::Unavailable`]
    /// when the actor does not answer within `shutdown_timeout`.
    pub async fn snapshot(&self) -> Result<Vec<PresenceSnapshot>, EngineError> {
        let queue = self
            .shared
            .queue
            .read()
            .await
            .clone()
            .ok_or(EngineError::NotRunning)?;
        let limit = self.shared.config.shutdown_timeout;
        let (reply, answer) = oneshot::channel();

        timeout(limit, queue.send(Command::Snapshot(reply)))
            .await
            .map_err(|_| EngineError::Unavailable("snapshot request timed out"))?
            .map_err(|_| EngineError::NotRunning)?;
        timeout(limit, answer)
            .await
            .map_err(|_| EngineError::Unavailable("snapshot reply timed out"))?
            .map_err(|_| EngineError::NotRunning)
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        self.handle().stats()
    }

    /// Engine clock reading.
    #[must_use]
    pub fn now(&self) -> Timestamp {
        self.shared.clock.now()
    }
}

/// Producer-side handle. Cheap to clone and safe to use from any thread.
#[derive(Clone)]
pub struct EngineHandle {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle").finish_non_exhaustive()
    }
}

impl EngineHandle {
    /// Validate a raw record and queue it for detection. Never blocks.
    ///
    /// Records without a timestamp are stamped with the engine clock. A
    /// timestamp more than `max_clock_skew` ahead, or at least
    /// `min(hard_exit_timeout, ranging_window_horizon)` behind, is rejected.
    ///
    /// # Errors
    ///
    /// - [`IngestionError::Rejected`] for malformed records
    /// - [`IngestionError::QueueFull`] when the engine is saturated
    /// - [`IngestionError::NotRunning`] before `start` or after `stop`
    pub fn ingest(&self, raw: &RawRecord) -> Result<(), IngestionError> {
        let shared = &self.shared;
        let guard = shared
            .queue
            .try_read()
            .map_err(|_| IngestionError::NotRunning)?;
        let queue = guard.as_ref().ok_or(IngestionError::NotRunning)?;

        let now = shared.clock.now();
        let sighting = shared
            .normalizer
            .normalize_at(raw, Some(now))
            .and_then(|sighting| {
                let too_new =
                    sighting.observed_at > now.saturating_add(shared.config.max_clock_skew);
                let too_old =
                    now.saturating_since(sighting.observed_at) >= shared.max_sample_age;
                if too_new || too_old {
                    Err(RejectReason::InvalidTimestamp)
                } else {
                    Ok(sighting)
                }
            })
            .map_err(|reason| {
                shared.counters.reject(reason);
                debug!(namespace = %raw.namespace, rssi = raw.rssi, %reason, "Sighting rejected");
                IngestionError::Rejected(reason)
            })?;

        match queue.try_send(Command::Sighting(sighting)) {
            Ok(()) => {
                shared.counters.ingested.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                shared.counters.queue_full.fetch_add(1, Ordering::Relaxed);
                warn!(identifier = %sighting.identifier, "Engine queue full, sighting dropped");
                Err(IngestionError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(IngestionError::NotRunning),
        }
    }

    /// Engine clock reading, for stamping records before ingestion.
    #[must_use]
    pub fn now(&self) -> Timestamp {
        self.shared.clock.now()
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        let c = &self.shared.counters;
        let d = &self.shared.dispatch_counters;
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        EngineStats {
            ingested: load(&c.ingested),
            processed: load(&c.processed),
            rejected_malformed_identifier: load(&c.rejected_malformed_identifier),
            rejected_out_of_range_signal: load(&c.rejected_out_of_range_signal),
            rejected_invalid_timestamp: load(&c.rejected_invalid_timestamp),
            queue_full: load(&c.queue_full),
            enters: load(&c.enters),
            updates: load(&c.updates),
            exits: load(&c.exits),
            sweeps: load(&c.sweeps),
            observer_dropped: load(&d.dropped),
            observer_failures: load(&d.failures),
        }
    }
}

// ============================================================================
// Actor
// ============================================================================

struct Actor {
    filter: RangingFilter,
    tracker: PresenceTracker,
    shared: Arc<Shared>,
}

impl Actor {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                command = rx.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
            }
        }

        // Drain whatever was queued before shutdown.
        rx.close();
        while let Some(command) = rx.recv().await {
            self.handle(command).await;
        }

        let now = self.shared.clock.now();
        for event in self.tracker.exit_all(now) {
            self.publish(event).await;
        }
        debug!("Engine actor finished");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Sighting(sighting) => self.on_sighting(sighting).await,
            Command::Sweep(now) => self.on_sweep(now).await,
            Command::Snapshot(reply) => {
                let _ = reply.send(self.tracker.snapshot());
            }
        }
    }

    async fn on_sighting(&mut self, sighting: Sighting) {
        if let Some(last) = self.filter.last_observed(&sighting.identifier) {
            if sighting.observed_at < last {
                self.shared.counters.reject(RejectReason::InvalidTimestamp);
                debug!(
                    identifier = %sighting.identifier,
                    at = %sighting.observed_at,
                    last = %last,
                    "Out-of-order sighting dropped"
                );
                return;
            }
        }

        self.shared.counters.processed.fetch_add(1, Ordering::Relaxed);
        let estimate = self.filter.observe(&sighting);
        if let Some(event) = self.tracker.on_sighting(estimate) {
            self.publish(event).await;
        }
    }

    async fn on_sweep(&mut self, now: Timestamp) {
        self.shared.counters.sweeps.fetch_add(1, Ordering::Relaxed);
        let (exits, removed) = self.tracker.sweep(now);
        for event in exits {
            self.publish(event).await;
        }
        for identifier in &removed {
            self.filter.forget(identifier);
        }
        let idle = self.filter.purge_idle(now);
        if !removed.is_empty() || idle > 0 {
            debug!(
                removed = removed.len(),
                idle_windows = idle,
                tracked = self.tracker.len(),
                "Sweep evicted state"
            );
        }
    }

    async fn publish(&self, event: BeaconEvent) {
        self.shared.counters.event(event.kind);
        debug!(
            identifier = %event.identifier,
            kind = %event.kind,
            at = %event.timestamp,
            strength = event.estimate.smoothed_strength,
            "Beacon event"
        );
        self.shared.dispatcher.publish(&event).await;
    }
}
