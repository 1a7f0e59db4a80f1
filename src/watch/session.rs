//! Snapshot-then-stream protocol for one watched key or prefix.
//!
//! ```text
//! read(key) ──► Set* ──► open_change_stream(snapshot_revision + 1)
//!                                  │
//!                                  ▼
//!                select { cancelled => return Ok
//!                         batch     => Create/Modify/Delete* }
//! ```
//!
//! Opening the stream right after the snapshot revision means every change
//! is seen exactly once: either already folded into the snapshot, or as a
//! stream event.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::trace;

use super::EventKind;
use super::Listener;
use crate::ChangeKind;
use crate::ChangeNotification;
use crate::Error;
use crate::Result;
use crate::Snapshot;
use crate::StoreClient;
use crate::StreamError;

/// Long-lived task state for one watch
pub(crate) struct WatchSession {
    key: String,
    prefix: bool,
    store: Arc<dyn StoreClient>,
    listener: Arc<dyn Listener>,
    snapshot_timeout: Duration,
    cancel: CancellationToken,
}

impl WatchSession {
    pub(crate) fn new(
        key: String,
        prefix: bool,
        store: Arc<dyn StoreClient>,
        listener: Arc<dyn Listener>,
        snapshot_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            key,
            prefix,
            store,
            listener,
            snapshot_timeout,
            cancel,
        }
    }

    /// Runs the session until it is cancelled or fails.
    ///
    /// Failures end only this session: they are logged and reported to
    /// [`Listener::session_failed`], never retried.
    pub(crate) async fn run(self) {
        match self.watch().await {
            Ok(()) => debug!(key = %self.key, "Watch session stopped"),
            Err(e) => {
                error!(key = %self.key, prefix = self.prefix, "Watch session failed: {}", e);
                self.listener.session_failed(&self.key, &e);
            }
        }
    }

    pub(crate) async fn watch(&self) -> Result<()> {
        // Snapshot phase
        let Some(snapshot) = self.snapshot().await? else {
            return Ok(());
        };
        debug!(
            key = %self.key,
            entries = snapshot.entries.len(),
            revision = snapshot.revision,
            "Snapshot loaded"
        );
        for kv in &snapshot.entries {
            self.listener.set(&kv.key, &kv.value);
        }

        // Stream phase
        let from_revision = snapshot.revision + 1;
        let mut stream = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Ok(()),
            stream = self.store.open_change_stream(&self.key, self.prefix, from_revision) => stream?,
        };

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Ok(());
                }
                batch = stream.next() => match batch {
                    Some(Ok(batch)) => self.dispatch(&batch),
                    Some(Err(e)) => return Err(e),
                    None => return Err(StreamError::Closed.into()),
                }
            }
        }
    }

    /// Bounded-time read of the current state.
    ///
    /// Returns `None` if the session was cancelled while the read was in
    /// flight.
    async fn snapshot(&self) -> Result<Option<Snapshot>> {
        let read = timeout(self.snapshot_timeout, self.store.read(&self.key, self.prefix));

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Ok(None),
            result = read => match result {
                Ok(snapshot) => snapshot.map(Some),
                Err(_elapsed) => Err(Error::Timeout {
                    key: self.key.clone(),
                    duration: self.snapshot_timeout,
                }),
            },
        }
    }

    fn dispatch(
        &self,
        batch: &[ChangeNotification],
    ) {
        for change in batch {
            match classify(change) {
                Some(EventKind::Create) => self.listener.create(&change.key, &change.value),
                Some(EventKind::Modify) => self.listener.modify(&change.key, &change.value),
                Some(EventKind::Delete) => self.listener.delete(&change.key),
                Some(EventKind::Set) | None => {
                    trace!(key = %self.key, kind = ?change.kind, "Ignoring unrecognized change");
                }
            }
        }
    }
}

/// Maps a store transition onto a listener callback.
///
/// `None` for transitions this client does not know; they are skipped rather
/// than treated as errors.
pub(crate) fn classify(change: &ChangeNotification) -> Option<EventKind> {
    match change.kind {
        ChangeKind::Put if change.is_create() => Some(EventKind::Create),
        ChangeKind::Put => Some(EventKind::Modify),
        ChangeKind::Delete => Some(EventKind::Delete),
        ChangeKind::Unknown(_) => None,
    }
}
