//! Shared setup for integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use task_sync::{
    EventBus, InMemoryStore, RetryPolicy, Subscription, SyncConfig, SyncEngine, SyncEvent,
    TaskDraft,
};

static TRACING: Once = Once::new();

/// Log to the test writer, filtered by `RUST_LOG` (warnings by default).
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Fast retry and poll budgets.
pub fn config() -> SyncConfig {
    let mut config = SyncConfig::new("todos");
    config.poll = RetryPolicy::fixed(5, Duration::from_millis(1));
    config.network = RetryPolicy::fixed(2, Duration::from_millis(1));
    config.conflict_retries = 1;
    config
}

pub fn setup_with(config: SyncConfig) -> (Arc<InMemoryStore>, Arc<SyncEngine<InMemoryStore>>) {
    init_tracing();
    let store = Arc::new(InMemoryStore::new());
    let engine = Arc::new(SyncEngine::new(Arc::clone(&store), config));
    (store, engine)
}

pub fn setup() -> (Arc<InMemoryStore>, Arc<SyncEngine<InMemoryStore>>) {
    setup_with(config())
}

/// Draft dated 2026-10-19, so paths are predictable.
pub fn draft(title: &str, body: &str) -> TaskDraft {
    TaskDraft::new(title, body).created_at(Utc.with_ymd_and_hms(2026, 10, 19, 9, 30, 0).unwrap())
}

/// Collect every event emitted while the subscription lives.
pub fn record(bus: &Arc<EventBus>) -> (Arc<Mutex<Vec<SyncEvent>>>, Subscription) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let subscription = bus.subscribe(move |event| sink.lock().unwrap().push(event));
    (events, subscription)
}
