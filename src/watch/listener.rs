#[cfg(test)]
use mockall::automock;
use tokio::sync::mpsc;
use tracing::warn;

use crate::Error;

/// Kind of a dispatched watch event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Entry present when the watch started (snapshot)
    Set,
    /// Key came into existence after the snapshot
    Create,
    /// Existing key got a new value
    Modify,
    /// Key was removed
    Delete,
}

/// A dispatched listener callback, as data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: EventKind,
    pub key: Vec<u8>,
    /// `None` for [`EventKind::Delete`]
    pub value: Option<Vec<u8>>,
}

impl WatchEvent {
    pub fn new(
        kind: EventKind,
        key: &[u8],
        value: Option<&[u8]>,
    ) -> Self {
        Self {
            kind,
            key: key.to_vec(),
            value: value.map(<[u8]>::to_vec),
        }
    }

    /// Replays this event onto a listener.
    pub fn dispatch(
        &self,
        listener: &dyn Listener,
    ) {
        let value = self.value.as_deref().unwrap_or_default();
        match self.kind {
            EventKind::Set => listener.set(&self.key, value),
            EventKind::Create => listener.create(&self.key, value),
            EventKind::Modify => listener.modify(&self.key, value),
            EventKind::Delete => listener.delete(&self.key),
        }
    }
}

/// Receiver of watch notifications
///
/// For one watch, callbacks are invoked sequentially from that watch's
/// session task: every `set` of the initial snapshot first, then
/// `create`/`modify`/`delete` in revision order. Callbacks of different
/// watches may run concurrently, so a listener shared between watches must
/// tolerate that.
///
/// Callbacks run on the async runtime and should return quickly.
#[cfg_attr(test, automock)]
pub trait Listener: Send + Sync + 'static {
    /// Entry present at snapshot time
    fn set(
        &self,
        key: &[u8],
        value: &[u8],
    );

    fn create(
        &self,
        key: &[u8],
        value: &[u8],
    );

    fn modify(
        &self,
        key: &[u8],
        value: &[u8],
    );

    fn delete(
        &self,
        key: &[u8],
    );

    /// The watch on `key` stopped because of `error`; no further callbacks
    /// follow for it. The registry entry stays reserved until removed.
    fn session_failed(
        &self,
        _key: &str,
        _error: &Error,
    ) {
    }
}

/// Forwards every callback as a [`WatchEvent`] into a channel
///
/// Useful when the consumer is async code rather than a callback sink.
#[derive(Debug, Clone)]
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<WatchEvent>,
}

impl ChannelListener {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<WatchEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(
        &self,
        event: WatchEvent,
    ) {
        if self.tx.send(event).is_err() {
            warn!("ChannelListener receiver dropped, event discarded");
        }
    }
}

impl Listener for ChannelListener {
    fn set(
        &self,
        key: &[u8],
        value: &[u8],
    ) {
        self.forward(WatchEvent::new(EventKind::Set, key, Some(value)));
    }

    fn create(
        &self,
        key: &[u8],
        value: &[u8],
    ) {
        self.forward(WatchEvent::new(EventKind::Create, key, Some(value)));
    }

    fn modify(
        &self,
        key: &[u8],
        value: &[u8],
    ) {
        self.forward(WatchEvent::new(EventKind::Modify, key, Some(value)));
    }

    fn delete(
        &self,
        key: &[u8],
    ) {
        self.forward(WatchEvent::new(EventKind::Delete, key, None));
    }
}
