use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::Error;
use crate::EventKind;
use crate::Listener;
use crate::WatchEvent;

/// Listener that records every callback in arrival order
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<WatchEvent>>,
    failures: Mutex<Vec<(String, String)>>,
    notify: Notify,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<WatchEvent> {
        self.events.lock().clone()
    }

    /// `(key, error message)` for every failed session
    pub fn failures(&self) -> Vec<(String, String)> {
        self.failures.lock().clone()
    }

    /// Waits until at least `count` events were recorded.
    pub async fn wait_for_events(
        &self,
        count: usize,
    ) -> Vec<WatchEvent> {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let notified = self.notify.notified();
                if self.events.lock().len() >= count {
                    return self.events();
                }
                notified.await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("expected {count} events, got {:?}", self.events()))
    }

    pub async fn wait_for_failure(&self) -> (String, String) {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let notified = self.notify.notified();
                if let Some(failure) = self.failures.lock().first().cloned() {
                    return failure;
                }
                notified.await;
            }
        })
        .await
        .expect("expected a session failure")
    }

    fn record(
        &self,
        event: WatchEvent,
    ) {
        self.events.lock().push(event);
        self.notify.notify_waiters();
    }
}

impl Listener for RecordingListener {
    fn set(
        &self,
        key: &[u8],
        value: &[u8],
    ) {
        self.record(WatchEvent::new(EventKind::Set, key, Some(value)));
    }

    fn create(
        &self,
        key: &[u8],
        value: &[u8],
    ) {
        self.record(WatchEvent::new(EventKind::Create, key, Some(value)));
    }

    fn modify(
        &self,
        key: &[u8],
        value: &[u8],
    ) {
        self.record(WatchEvent::new(EventKind::Modify, key, Some(value)));
    }

    fn delete(
        &self,
        key: &[u8],
    ) {
        self.record(WatchEvent::new(EventKind::Delete, key, None));
    }

    fn session_failed(
        &self,
        key: &str,
        error: &Error,
    ) {
        self.failures.lock().push((key.to_string(), error.to_string()));
        self.notify.notify_waiters();
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
