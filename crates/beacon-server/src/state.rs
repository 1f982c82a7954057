//! Application state shared across handlers.

use std::sync::Arc;

use beacon_core::BeaconEngine;
use chrono::{DateTime, Utc};

use crate::observers::{RecentEvents, TracingObserver};

/// Shared application state.
#[derive(Clone)]
pub struct SharedState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    engine: Arc<BeaconEngine>,
    recent: RecentEvents,
    started_at: DateTime<Utc>,
}

impl SharedState {
    /// Wrap `engine` and register the built-in observers on it.
    ///
    /// Call before `engine.start()` so no early event is missed.
    pub async fn new(engine: Arc<BeaconEngine>, recent_capacity: usize) -> Self {
        let recent = RecentEvents::new(recent_capacity);
        engine.subscribe(TracingObserver).await;
        engine.subscribe(recent.clone()).await;

        Self {
            inner: Arc::new(AppStateInner {
                engine,
                recent,
                started_at: Utc::now(),
            }),
        }
    }

    /// The engine.
    #[must_use]
    pub fn engine(&self) -> &BeaconEngine {
        &self.inner.engine
    }

    /// Recent-events feed.
    #[must_use]
    pub fn recent(&self) -> &RecentEvents {
        &self.inner.recent
    }

    /// When this state was created.
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }
}
