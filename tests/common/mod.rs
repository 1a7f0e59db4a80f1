use std::sync::Arc;
use std::time::Duration;

use kv_watcher::EventKind;
use kv_watcher::MemStore;
use kv_watcher::WatchConfig;
use kv_watcher::WatchEvent;
use kv_watcher::WatchRegistry;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

pub fn setup() -> (Arc<MemStore>, WatchRegistry) {
    setup_with(&WatchConfig::default())
}

/// Store and registry sized from the same watch section, the way an
/// embedding process wires them.
pub fn setup_with(config: &WatchConfig) -> (Arc<MemStore>, WatchRegistry) {
    let store = Arc::new(MemStore::from_config(config));
    let registry = WatchRegistry::new(store.clone(), config);
    (store, registry)
}

/// Receives exactly `count` events, failing the test on timeout.
pub async fn next_events(
    rx: &mut UnboundedReceiver<WatchEvent>,
    count: usize,
) -> Vec<WatchEvent> {
    let mut events = Vec::with_capacity(count);
    while events.len() < count {
        let event = timeout(EVENT_TIMEOUT, rx.recv())
            .await
            .unwrap_or_else(|_| panic!("expected {count} events, got {events:?}"))
            .expect("listener channel closed");
        events.push(event);
    }
    events
}

/// Asserts nothing arrives within a short grace period.
pub async fn assert_quiet(rx: &mut UnboundedReceiver<WatchEvent>) {
    if let Ok(Some(event)) = timeout(Duration::from_millis(100), rx.recv()).await {
        panic!("unexpected event {event:?}");
    }
}

pub fn set(
    key: &str,
    value: &str,
) -> WatchEvent {
    WatchEvent::new(EventKind::Set, key.as_bytes(), Some(value.as_bytes()))
}

pub fn create(
    key: &str,
    value: &str,
) -> WatchEvent {
    WatchEvent::new(EventKind::Create, key.as_bytes(), Some(value.as_bytes()))
}

pub fn modify(
    key: &str,
    value: &str,
) -> WatchEvent {
    WatchEvent::new(EventKind::Modify, key.as_bytes(), Some(value.as_bytes()))
}

pub fn delete(key: &str) -> WatchEvent {
    WatchEvent::new(EventKind::Delete, key.as_bytes(), None)
}
