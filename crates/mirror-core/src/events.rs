//! Event infrastructure for sync passes.
//!
//! Provides `SyncEvent` for progress reporting and `EventBus` for
//! subscriptions. The daemon subscribes to turn events into user-facing
//! notifications.

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// Steps of one sync pass, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncPhase {
    Idle,
    HistoryLoaded,
    Listed,
    Filtered,
    PerDocumentLoop,
    HistorySaved,
    Done,
}

/// Events emitted during sync operations.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncEvent {
    /// The engine entered a new phase.
    Phase { phase: SyncPhase },
    /// A page was converted and written.
    DocumentSynced {
        #[serde(rename = "pageId")]
        page_id: String,
        title: String,
        path: String,
    },
    /// A page failed; the pass continues.
    DocumentFailed {
        #[serde(rename = "pageId")]
        page_id: String,
        title: String,
        error: String,
    },
    /// A pass finished with these counts.
    SyncFinished {
        #[serde(rename = "successCount")]
        success_count: usize,
        #[serde(rename = "failureCount")]
        failure_count: usize,
        #[serde(rename = "skippedPages")]
        skipped_pages: usize,
    },
    /// A background check found changed pages.
    ChangesDetected { count: usize },
}

/// Subscription handle that unsubscribes automatically when dropped.
///
/// Hold this value to keep receiving events, drop it to unsubscribe.
pub struct Subscription {
    bus: Weak<EventBus>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

type Callback = Arc<dyn Fn(SyncEvent) + Send + Sync>;

/// Event bus for publishing sync events to subscribers.
///
/// Wrap in `Arc` to enable subscriptions.
pub struct EventBus {
    callbacks: RwLock<Vec<(usize, Callback)>>,
    next_id: AtomicUsize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns `Subscription` that unsubscribes on drop.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(SyncEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        // emit releases the lock before running callbacks, so this cannot
        // deadlock when a callback drops its own subscription
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(i, _)| *i != id);
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: SyncEvent) {
        // Snapshot so callbacks may subscribe without deadlocking
        let callbacks: Vec<Callback> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(event.clone());
        }
    }
}
