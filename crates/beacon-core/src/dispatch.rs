//! Fan-out of beacon events to observers.
//!
//! Every subscription gets its own bounded queue and delivery task, so a
//! slow or failing observer only ever affects itself:
//! - `publish` never waits; a full queue drops the event for that observer
//!   and reports [`ObserverError::Lagged`]
//! - observer calls run on the blocking pool, so a blocking observer never
//!   holds a runtime worker
//! - errors and panics raised by an observer are caught and sent to the
//!   failure stream returned by [`EventDispatcher::errors`]

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::types::BeaconEvent;

/// Buffered failures kept for slow readers of the failure stream.
const FAILURE_STREAM_CAPACITY: usize = 64;

/// Failure raised by or on behalf of one observer.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ObserverError {
    /// The observer returned an error.
    #[error("observer failed: {0}")]
    Failed(String),

    /// The observer panicked while handling an event.
    #[error("observer panicked: {0}")]
    Panicked(String),

    /// The observer's queue was full and events were dropped.
    #[error("observer lagging, {dropped} event(s) dropped")]
    Lagged {
        /// Events dropped so far for this subscription.
        dropped: u64,
    },
}

impl ObserverError {
    /// Convenience constructor for [`ObserverError::Failed`].
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Consumer of beacon events.
///
/// `on_event` runs on the blocking thread pool, one call at a time per
/// subscription, so it may block without stalling the runtime. A slow
/// observer still fills its queue and starts losing events.
pub trait BeaconObserver: Send + Sync + 'static {
    /// Name used in logs and failure reports.
    fn name(&self) -> &str {
        "observer"
    }

    /// Handle one event.
    ///
    /// # Errors
    ///
    /// Any error is reported on the failure stream and otherwise ignored.
    fn on_event(&self, event: &BeaconEvent) -> Result<(), ObserverError>;
}

/// Observer built from a closure.
pub struct ObserverFn<F> {
    name: String,
    f: F,
}

/// Wrap a closure as a named observer.
pub fn observer_fn<F>(name: impl Into<String>, f: F) -> ObserverFn<F>
where
    F: Fn(&BeaconEvent) -> Result<(), ObserverError> + Send + Sync + 'static,
{
    ObserverFn {
        name: name.into(),
        f,
    }
}

impl<F> BeaconObserver for ObserverFn<F>
where
    F: Fn(&BeaconEvent) -> Result<(), ObserverError> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn on_event(&self, event: &BeaconEvent) -> Result<(), ObserverError> {
        (self.f)(event)
    }
}

/// Opaque token identifying one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionHandle(Uuid);

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Report sent on the failure stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObserverFailure {
    /// Subscription that failed.
    pub subscription: SubscriptionHandle,
    /// Observer name.
    pub observer: String,
    /// What went wrong.
    pub error: ObserverError,
}

/// Counters shared with the engine's stats.
#[derive(Debug, Default)]
pub struct DispatchCounters {
    /// Events handed to `publish`.
    pub published: AtomicU64,
    /// Per-observer deliveries dropped on a full queue.
    pub dropped: AtomicU64,
    /// Observer errors and panics.
    pub failures: AtomicU64,
}

struct Subscriber {
    name: String,
    tx: mpsc::Sender<BeaconEvent>,
    dropped: AtomicU64,
    task: JoinHandle<()>,
}

/// Registry of observers and their delivery queues.
pub struct EventDispatcher {
    subscribers: RwLock<HashMap<SubscriptionHandle, Subscriber>>,
    failures: broadcast::Sender<ObserverFailure>,
    queue_capacity: usize,
    counters: Arc<DispatchCounters>,
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("queue_capacity", &self.queue_capacity)
            .finish_non_exhaustive()
    }
}

impl EventDispatcher {
    /// Create a dispatcher whose subscriptions buffer up to `queue_capacity` events.
    #[must_use]
    pub fn new(queue_capacity: usize) -> Self {
        let (failures, _) = broadcast::channel(FAILURE_STREAM_CAPACITY);
        Self {
            subscribers: RwLock::new(HashMap::new()),
            failures,
            queue_capacity: queue_capacity.max(1),
            counters: Arc::new(DispatchCounters::default()),
        }
    }

    /// Register an observer. Must be called from within a tokio runtime.
    pub async fn subscribe<O: BeaconObserver>(&self, observer: O) -> SubscriptionHandle {
        self.subscribe_arc(Arc::new(observer)).await
    }

    /// Register an observer that is shared with other code.
    pub async fn subscribe_arc(&self, observer: Arc<dyn BeaconObserver>) -> SubscriptionHandle {
        let handle = SubscriptionHandle(Uuid::new_v4());
        let name = observer.name().to_string();
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let task = tokio::spawn(deliver(
            handle,
            observer,
            rx,
            self.failures.clone(),
            Arc::clone(&self.counters),
        ));

        debug!(subscription = %handle, observer = %name, "Observer subscribed");
        self.subscribers.write().await.insert(
            handle,
            Subscriber {
                name,
                tx,
                dropped: AtomicU64::new(0),
                task,
            },
        );
        handle
    }

    /// Remove a subscription. Events already queued are still delivered.
    ///
    /// Returns `false` if the handle was unknown.
    pub async fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let removed = self.subscribers.write().await.remove(&handle);
        match removed {
            Some(subscriber) => {
                debug!(subscription = %handle, observer = %subscriber.name, "Observer unsubscribed");
                true
            }
            None => false,
        }
    }

    /// Queue `event` for every current subscriber without waiting.
    ///
    /// Returns how many subscribers accepted it.
    pub async fn publish(&self, event: &BeaconEvent) -> usize {
        self.counters.published.fetch_add(1, Ordering::Relaxed);
        let subscribers = self.subscribers.read().await;
        let mut accepted = 0;
        for (handle, subscriber) in subscribers.iter() {
            match subscriber.tx.try_send(event.clone()) {
                Ok(()) => accepted += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    let dropped = subscriber.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        subscription = %handle,
                        observer = %subscriber.name,
                        dropped,
                        "Observer queue full, event dropped"
                    );
                    let _ = self.failures.send(ObserverFailure {
                        subscription: *handle,
                        observer: subscriber.name.clone(),
                        error: ObserverError::Lagged { dropped },
                    });
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(subscription = %handle, "Observer task gone, skipping");
                }
            }
        }
        accepted
    }

    /// Stream of observer failures.
    #[must_use]
    pub fn errors(&self) -> broadcast::Receiver<ObserverFailure> {
        self.failures.subscribe()
    }

    /// Number of active subscriptions.
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Shared counters.
    #[must_use]
    pub fn counters(&self) -> Arc<DispatchCounters> {
        Arc::clone(&self.counters)
    }

    /// Drop every subscription and wait up to `timeout` for queued events to
    /// be delivered. Tasks still running at the deadline are aborted.
    ///
    /// Returns `true` if every queue drained in time.
    pub async fn close(&self, timeout: Duration) -> bool {
        let subscribers: Vec<Subscriber> = self
            .subscribers
            .write()
            .await
            .drain()
            .map(|(_, subscriber)| subscriber)
            .collect();

        let mut tasks = Vec::with_capacity(subscribers.len());
        for subscriber in subscribers {
            drop(subscriber.tx);
            tasks.push(subscriber.task);
        }
        let aborts: Vec<_> = tasks.iter().map(JoinHandle::abort_handle).collect();

        let drained = tokio::time::timeout(timeout, async {
            for task in tasks {
                let _ = task.await;
            }
        })
        .await
        .is_ok();

        if !drained {
            warn!(timeout_ms = timeout.as_millis(), "Observer queues did not drain in time");
            for abort in aborts {
                abort.abort();
            }
        }
        drained
    }
}

async fn deliver(
    handle: SubscriptionHandle,
    observer: Arc<dyn BeaconObserver>,
    mut rx: mpsc::Receiver<BeaconEvent>,
    failures: broadcast::Sender<ObserverFailure>,
    counters: Arc<DispatchCounters>,
) {
    while let Some(event) = rx.recv().await {
        let call = {
            let observer = Arc::clone(&observer);
            let event = event.clone();
            tokio::task::spawn_blocking(move || observer.on_event(&event))
        };
        let error = match call.await {
            Ok(Ok(())) => continue,
            Ok(Err(error)) => error,
            Err(join) if join.is_panic() => {
                ObserverError::Panicked(panic_message(join.into_panic().as_ref()))
            }
            Err(_) => ObserverError::failed("observer call cancelled"),
        };

        counters.failures.fetch_add(1, Ordering::Relaxed);
        warn!(
            subscription = %handle,
            observer = observer.name(),
            identifier = %event.identifier,
            kind = %event.kind,
            %error,
            "Observer failed to handle event"
        );
        let _ = failures.send(ObserverFailure {
            subscription: handle,
            observer: observer.name().to_string(),
            error,
        });
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
