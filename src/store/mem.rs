use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::Arc;

use futures::stream;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tonic::async_trait;
use tracing::debug;
use tracing::trace;

use super::ChangeNotification;
use super::ChangeStream;
use super::KeyValue;
use super::Revision;
use super::Snapshot;
use super::StoreClient;
use crate::Error;
use crate::Result;
use crate::StreamError;
use crate::WatchConfig;

/// In-process revisioned key-value store
///
/// Every mutation bumps a global revision, is kept in a bounded history log,
/// and is fanned out to open change streams. Once the log holds more than
/// `history_limit` revisions the oldest are compacted away automatically. A change stream
/// replays retained history from its start revision and then follows live
/// changes; replay and subscription happen under one lock, so nothing is
/// missed or seen twice in between.
///
/// Multi-key mutations ([`delete_prefix`](Self::delete_prefix)) share one
/// revision and are delivered as a single batch.
pub struct MemStore {
    state: Mutex<MemState>,
}

#[derive(Debug, Clone)]
struct Versioned {
    value: Vec<u8>,
    create_revision: Revision,
}

/// All changes committed at one revision
#[derive(Debug)]
struct ChangeRecord {
    revision: Revision,
    changes: Vec<ChangeNotification>,
}

struct MemState {
    revision: Revision,
    compact_revision: Revision,
    data: BTreeMap<Vec<u8>, Versioned>,
    history: VecDeque<Arc<ChangeRecord>>,
    history_limit: usize,
    /// `None` once the store is closed
    changes_tx: Option<broadcast::Sender<Arc<ChangeRecord>>>,
}

impl std::fmt::Debug for MemStore {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemStore")
            .field("revision", &state.revision)
            .field("compact_revision", &state.compact_revision)
            .field("keys", &state.data.len())
            .field("history", &state.history.len())
            .field("closed", &state.changes_tx.is_none())
            .finish()
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStore {
    pub fn new() -> Self {
        Self::from_config(&WatchConfig::default())
    }

    /// Sizes the fan-out buffer and history window from
    /// `watch.change_buffer_size` and `watch.history_limit`.
    pub fn from_config(config: &WatchConfig) -> Self {
        Self::with_limits(config.change_buffer_size, config.history_limit)
    }

    /// `buffer_size` bounds how many batches a change stream may fall behind
    /// before it fails with [`StreamError::Lagged`]; `history_limit` bounds
    /// how many revisions stay replayable.
    pub fn with_limits(
        buffer_size: usize,
        history_limit: usize,
    ) -> Self {
        let (changes_tx, _) = broadcast::channel(buffer_size.max(1));
        Self {
            state: Mutex::new(MemState {
                revision: 0,
                compact_revision: 0,
                data: BTreeMap::new(),
                history: VecDeque::new(),
                history_limit: history_limit.max(1),
                changes_tx: Some(changes_tx),
            }),
        }
    }

    /// Current store revision
    pub fn revision(&self) -> Revision {
        self.state.lock().revision
    }

    /// Number of revisions that can still be replayed
    pub fn history_len(&self) -> usize {
        self.state.lock().history.len()
    }

    /// Latest compaction point (0 if never compacted)
    pub fn compact_revision(&self) -> Revision {
        self.state.lock().compact_revision
    }

    pub fn get(
        &self,
        key: impl AsRef<[u8]>,
    ) -> Option<Vec<u8>> {
        self.state.lock().data.get(key.as_ref()).map(|v| v.value.clone())
    }

    /// Inserts or overwrites `key`, returning the revision of the change.
    pub fn put(
        &self,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
    ) -> Result<Revision> {
        let mut state = self.state.lock();
        state.ensure_open()?;

        let revision = state.revision + 1;
        let key = key.as_ref().to_vec();
        let value = value.as_ref().to_vec();
        let create_revision = state.data.get(&key).map(|v| v.create_revision).unwrap_or(revision);

        state.data.insert(
            key.clone(),
            Versioned {
                value: value.clone(),
                create_revision,
            },
        );
        state.commit(
            revision,
            vec![ChangeNotification::put(key, value, create_revision, revision)],
        );
        Ok(revision)
    }

    /// Deletes `key`. Deleting a missing key is a no-op and does not bump the
    /// revision.
    pub fn delete(
        &self,
        key: impl AsRef<[u8]>,
    ) -> Result<Option<Revision>> {
        let mut state = self.state.lock();
        state.ensure_open()?;

        if state.data.remove(key.as_ref()).is_none() {
            return Ok(None);
        }
        let revision = state.revision + 1;
        state.commit(revision, vec![ChangeNotification::delete(key.as_ref(), revision)]);
        Ok(Some(revision))
    }

    /// Deletes every key under `prefix` at a single revision.
    pub fn delete_prefix(
        &self,
        prefix: impl AsRef<[u8]>,
    ) -> Result<Option<Revision>> {
        let mut state = self.state.lock();
        state.ensure_open()?;

        let prefix = prefix.as_ref();
        let keys: Vec<Vec<u8>> = state.prefix_range(prefix).map(|(k, _)| k.clone()).collect();
        if keys.is_empty() {
            return Ok(None);
        }

        let revision = state.revision + 1;
        let changes = keys
            .into_iter()
            .map(|key| {
                state.data.remove(&key);
                ChangeNotification::delete(key, revision)
            })
            .collect();
        state.commit(revision, changes);
        Ok(Some(revision))
    }

    /// Discards history strictly below `revision`.
    ///
    /// Change streams can no longer start before the compaction point.
    ///
    /// # Errors
    /// - [`Error::InvalidRevision`] if `revision` is in the future
    pub fn compact(
        &self,
        revision: Revision,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.ensure_open()?;

        if revision > state.revision {
            return Err(Error::InvalidRevision {
                requested: revision,
                current: state.revision,
            });
        }
        if revision <= state.compact_revision {
            return Ok(());
        }

        while state.history.front().is_some_and(|r| r.revision < revision) {
            state.history.pop_front();
        }
        state.compact_revision = revision;
        debug!(revision, retained = state.history.len(), "MemStore compacted");
        Ok(())
    }
}

impl MemState {
    fn ensure_open(&self) -> Result<()> {
        match self.changes_tx {
            Some(_) => Ok(()),
            None => Err(Error::Connection("store is closed".into())),
        }
    }

    fn prefix_range<'a>(
        &'a self,
        prefix: &'a [u8],
    ) -> impl Iterator<Item = (&'a Vec<u8>, &'a Versioned)> + 'a {
        self.data
            .range(prefix.to_vec()..)
            .take_while(move |(k, _)| k.starts_with(prefix))
    }

    fn commit(
        &mut self,
        revision: Revision,
        changes: Vec<ChangeNotification>,
    ) {
        self.revision = revision;
        let record = Arc::new(ChangeRecord { revision, changes });
        self.history.push_back(record.clone());

        while self.history.len() > self.history_limit {
            if let Some(evicted) = self.history.pop_front() {
                self.compact_revision = self.compact_revision.max(evicted.revision + 1);
            }
        }

        if let Some(tx) = &self.changes_tx {
            // No receivers is fine: history still holds the change
            let receivers = tx.send(record).unwrap_or(0);
            trace!(revision, receivers, "MemStore change committed");
        }
    }
}

/// Selects the changes of a batch that fall under a watched key or prefix
#[derive(Debug, Clone)]
struct KeyMatcher {
    key: Vec<u8>,
    prefix: bool,
}

impl KeyMatcher {
    fn matches(
        &self,
        key: &[u8],
    ) -> bool {
        if self.prefix {
            key.starts_with(&self.key)
        } else {
            key == self.key.as_slice()
        }
    }

    fn select(
        &self,
        record: &ChangeRecord,
    ) -> Vec<ChangeNotification> {
        record.changes.iter().filter(|c| self.matches(&c.key)).cloned().collect()
    }
}

#[async_trait]
impl StoreClient for MemStore {
    async fn read(
        &self,
        key: &str,
        prefix: bool,
    ) -> Result<Snapshot> {
        let state = self.state.lock();
        state.ensure_open()?;

        let to_kv = |(k, v): (&Vec<u8>, &Versioned)| KeyValue {
            key: k.clone(),
            value: v.value.clone(),
        };
        let entries = if prefix {
            state.prefix_range(key.as_bytes()).map(to_kv).collect()
        } else {
            state.data.get_key_value(key.as_bytes()).map(to_kv).into_iter().collect()
        };

        Ok(Snapshot {
            entries,
            revision: state.revision,
        })
    }

    async fn open_change_stream(
        &self,
        key: &str,
        prefix: bool,
        from_revision: Revision,
    ) -> Result<ChangeStream> {
        let state = self.state.lock();
        let Some(changes_tx) = &state.changes_tx else {
            return Err(Error::Connection("store is closed".into()));
        };

        // 0 means "from now on"
        let from_revision = if from_revision == 0 {
            state.revision + 1
        } else {
            from_revision
        };
        if from_revision < state.compact_revision {
            return Err(StreamError::Compacted {
                requested: from_revision,
                compact_revision: state.compact_revision,
            }
            .into());
        }

        let matcher = KeyMatcher {
            key: key.as_bytes().to_vec(),
            prefix,
        };
        let replay: Vec<Result<Vec<ChangeNotification>>> = state
            .history
            .iter()
            .filter(|record| record.revision >= from_revision)
            .map(|record| matcher.select(record))
            .filter(|batch| !batch.is_empty())
            .map(Ok)
            .collect();
        let live_rx = changes_tx.subscribe();
        drop(state);

        debug!(key, prefix, from_revision, replayed = replay.len(), "MemStore change stream opened");

        let live = BroadcastStream::new(live_rx).filter_map(move |item| {
            let batch = match item {
                Ok(record) if record.revision < from_revision => None,
                Ok(record) => {
                    let batch = matcher.select(&record);
                    (!batch.is_empty()).then_some(Ok(batch))
                }
                Err(BroadcastStreamRecvError::Lagged(missed)) => {
                    Some(Err(StreamError::Lagged(missed).into()))
                }
            };
            futures::future::ready(batch)
        });

        Ok(stream::iter(replay).chain(live).boxed())
    }

    async fn close(&self) {
        let mut state = self.state.lock();
        if state.changes_tx.take().is_some() {
            debug!(revision = state.revision, "MemStore closed");
        }
    }
}
