use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;
use tracing::info;

use super::session::WatchSession;
use super::Listener;
use crate::EtcdStore;
use crate::Result;
use crate::StoreClient;
use crate::WatchConfig;
use crate::WatcherConfig;

/// Registry-side record of an active watch
#[derive(Debug)]
struct WatchHandle {
    prefix: bool,
    cancel: CancellationToken,
}

/// Owner of all active watches on one store connection
///
/// Every watch runs as its own task (see [`WatchSession`]). The registry
/// keeps the `key -> handle` map behind a single mutex that is held only
/// while the map is mutated, never across store I/O.
///
/// Keys are compared literally: `"a"` watched as a point key and `"a"`
/// watched as a prefix collide.
///
/// Lifecycle: construct, add/remove any number of times, then
/// [`close`](Self::close) exactly once. Dropping the registry without
/// closing it cancels every session but does not wait for them.
pub struct WatchRegistry {
    store: Arc<dyn StoreClient>,
    handles: Mutex<HashMap<String, WatchHandle>>,
    tracker: TaskTracker,
    snapshot_timeout: Duration,
}

impl std::fmt::Debug for WatchRegistry {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("WatchRegistry")
            .field("handles", &self.handles.lock())
            .field("running_sessions", &self.tracker.len())
            .field("snapshot_timeout", &self.snapshot_timeout)
            .finish_non_exhaustive()
    }
}

impl WatchRegistry {
    pub fn new(
        store: Arc<dyn StoreClient>,
        config: &WatchConfig,
    ) -> Self {
        Self {
            store,
            handles: Mutex::new(HashMap::new()),
            tracker: TaskTracker::new(),
            snapshot_timeout: config.snapshot_timeout(),
        }
    }

    /// Connects to the etcd endpoints in `config` and builds a registry on
    /// top of that connection.
    ///
    /// # Errors
    /// - [`crate::Error::Config`] if `config` is invalid
    /// - [`crate::Error::Connection`] if the store cannot be reached
    pub async fn connect(config: &WatcherConfig) -> Result<Self> {
        config.store.validate()?;
        config.watch.validate()?;

        let store = EtcdStore::connect(&config.store).await?;
        Ok(Self::new(Arc::new(store), &config.watch))
    }

    /// Starts watching `key` (or every key under it when `prefix` is set).
    ///
    /// Returns `false` without side effects if `key` is already watched,
    /// regardless of its prefix flag.
    ///
    /// # Panics
    /// Must be called from within a tokio runtime.
    pub fn add_watch(
        &self,
        key: impl Into<String>,
        prefix: bool,
        listener: Arc<dyn Listener>,
    ) -> bool {
        let key = key.into();
        let mut handles = self.handles.lock();

        let slot = match handles.entry(key) {
            Entry::Occupied(existing) => {
                debug!(
                    key = %existing.key(),
                    existing_prefix = existing.get().prefix,
                    "Watch already registered"
                );
                return false;
            }
            Entry::Vacant(slot) => slot,
        };

        let cancel = CancellationToken::new();
        let session = WatchSession::new(
            slot.key().clone(),
            prefix,
            self.store.clone(),
            listener,
            self.snapshot_timeout,
            cancel.clone(),
        );
        self.tracker.spawn(session.run());

        debug!(key = %slot.key(), prefix, "Watch added");
        slot.insert(WatchHandle { prefix, cancel });
        true
    }

    /// Cancels the watch on `key`.
    ///
    /// Returns immediately; the session observes cancellation at its next
    /// wait point, after any in-flight callback has returned. Returns `false`
    /// if `key` is not watched.
    pub fn remove_watch(
        &self,
        key: &str,
    ) -> bool {
        let Some(handle) = self.handles.lock().remove(key) else {
            return false;
        };
        handle.cancel.cancel();
        debug!(key, prefix = handle.prefix, "Watch removed");
        true
    }

    /// Cancels every watch.
    pub fn clear_watch(&self) {
        let drained: Vec<(String, WatchHandle)> = self.handles.lock().drain().collect();
        for (_, handle) in &drained {
            handle.cancel.cancel();
        }
        if !drained.is_empty() {
            debug!(count = drained.len(), "Watches cleared");
        }
    }

    /// Cancels every watch and releases the store connection.
    ///
    /// With `wait`, blocks until every session task has exited, so no
    /// listener callback fires after this returns and the connection is not
    /// closed under a running session.
    pub async fn close(
        self,
        wait: bool,
    ) {
        self.clear_watch();
        self.tracker.close();

        if wait {
            self.tracker.wait().await;
            debug!("All watch sessions drained");
        }

        self.store.close().await;
        info!(waited = wait, "Watch registry closed");
    }

    /// Number of active watches
    pub fn watch_count(&self) -> usize {
        self.handles.lock().len()
    }

    pub fn is_watching(
        &self,
        key: &str,
    ) -> bool {
        self.handles.lock().contains_key(key)
    }

    /// Watched keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.handles.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of session tasks that have not exited yet, including
    /// sessions already removed but still winding down.
    pub fn running_sessions(&self) -> usize {
        self.tracker.len()
    }
}

impl Drop for WatchRegistry {
    fn drop(&mut self) {
        for handle in self.handles.get_mut().values() {
            handle.cancel.cancel();
        }
    }
}
