//! Sync events for monitoring.
//!
//! `SyncEngine` emits a `SyncEvent` at every remote state change it makes or
//! observes. Subscribers register through `EventBus::subscribe` and keep the
//! returned `Subscription` alive for as long as they want events.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use tracing::trace;

use crate::document::DocId;

/// Milliseconds since Unix epoch.
pub fn now_ms() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncEvent {
    /// A new document was written.
    DocumentCreated {
        id: DocId,
        path: String,
        /// Whether the path showed up in the folder listing within the poll budget
        visible: bool,
        timestamp: f64,
    },
    /// An existing document was rewritten in place.
    DocumentUpdated {
        id: DocId,
        path: String,
        /// Conflict retries it took
        retries: u32,
        timestamp: f64,
    },
    /// A document was moved to a new path (rename or archive toggle).
    DocumentMoved {
        id: DocId,
        from: String,
        to: String,
        timestamp: f64,
    },
    DocumentDeleted {
        id: DocId,
        path: String,
        /// Whether the listing stopped reporting the path within the poll budget
        confirmed: bool,
        timestamp: f64,
    },
    /// A write was rejected because the remote copy changed.
    ConflictDetected {
        id: DocId,
        path: String,
        attempt: u32,
        timestamp: f64,
    },
    /// A move wrote its new copy but could not delete the old one.
    PartialFailure {
        id: DocId,
        from: String,
        to: String,
        error: String,
        timestamp: f64,
    },
    /// The working set was re-projected from the remote listing.
    Refreshed {
        documents: usize,
        /// Documents left alone because an operation owned them
        skipped: usize,
        timestamp: f64,
    },
}

/// Keeps a subscriber registered. Dropping it removes the callback.
pub struct Subscription {
    bus: Weak<EventBus>,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
        }
    }
}

type Subscriber = Arc<dyn Fn(SyncEvent) + Send + Sync>;

/// Fan-out of `SyncEvent`s to subscribers, in subscription order.
///
/// Subscribing needs an `Arc<EventBus>` so the handle can find its way back.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<BTreeMap<u64, Subscriber>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn subscribers(&self) -> RwLockReadGuard<'_, BTreeMap<u64, Subscriber>> {
        self.subscribers.read().unwrap_or_else(|e| e.into_inner())
    }

    fn subscribers_mut(&self) -> RwLockWriteGuard<'_, BTreeMap<u64, Subscriber>> {
        self.subscribers.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(SyncEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers_mut().insert(id, Arc::new(callback));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    fn remove(&self, id: u64) {
        self.subscribers_mut().remove(&id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers().len()
    }

    pub fn emit(&self, event: SyncEvent) {
        // Snapshot first: callbacks may subscribe or drop their subscription
        let subscribers: Vec<Subscriber> = self.subscribers().values().cloned().collect();
        trace!(subscribers = subscribers.len(), "Emitting sync event");
        for subscriber in subscribers {
            subscriber(event.clone());
        }
    }
}
