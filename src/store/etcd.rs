use etcd_client::Client;
use etcd_client::ConnectOptions;
use etcd_client::EventType;
use etcd_client::GetOptions;
use etcd_client::WatchOptions;
use etcd_client::WatchResponse;
use futures::StreamExt;
use parking_lot::RwLock;
use tonic::async_trait;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::ChangeKind;
use super::ChangeNotification;
use super::ChangeStream;
use super::KeyValue;
use super::Revision;
use super::Snapshot;
use super::StoreClient;
use crate::Error;
use crate::Result;
use crate::StoreConfig;
use crate::StreamError;

/// [`StoreClient`] backed by an etcd v3 cluster
pub struct EtcdStore {
    /// `None` once closed
    client: RwLock<Option<Client>>,
}

impl std::fmt::Debug for EtcdStore {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("EtcdStore")
            .field("closed", &self.client.read().is_none())
            .finish()
    }
}

impl EtcdStore {
    /// Dials the configured endpoints.
    ///
    /// # Errors
    /// - [`Error::Connection`] if no endpoint could be reached within
    ///   `connect_timeout_in_ms`
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let mut options = ConnectOptions::new().with_connect_timeout(config.connect_timeout());
        if let Some(timeout) = config.request_timeout() {
            options = options.with_timeout(timeout);
        }
        if let (Some(user), Some(password)) = (&config.username, &config.password) {
            options = options.with_user(user.clone(), password.clone());
        }

        let client = Client::connect(&config.endpoints, Some(options)).await?;
        info!(endpoints = ?config.endpoints, "Connected to etcd");

        Ok(Self {
            client: RwLock::new(Some(client)),
        })
    }

    /// Clones the client handle out of the lock; the lock is never held
    /// across a request.
    fn client(&self) -> Result<Client> {
        self.client
            .read()
            .clone()
            .ok_or_else(|| Error::Connection("etcd client is closed".into()))
    }
}

#[async_trait]
impl StoreClient for EtcdStore {
    async fn read(
        &self,
        key: &str,
        prefix: bool,
    ) -> Result<Snapshot> {
        let mut kv = self.client()?.kv_client();
        let options = prefix.then(|| GetOptions::new().with_prefix());

        let resp = kv.get(key, options).await?;
        let revision = snapshot_revision(resp.header().map(|h| h.revision()))?;
        let entries = resp
            .kvs()
            .iter()
            .map(|kv| KeyValue {
                key: kv.key().to_vec(),
                value: kv.value().to_vec(),
            })
            .collect();

        Ok(Snapshot { entries, revision })
    }

    async fn open_change_stream(
        &self,
        key: &str,
        prefix: bool,
        from_revision: Revision,
    ) -> Result<ChangeStream> {
        let start = start_revision(from_revision)?;
        let mut watch_client = self.client()?.watch_client();

        let mut options = WatchOptions::new().with_start_revision(start);
        if prefix {
            options = options.with_prefix();
        }

        let (watcher, stream) = watch_client.watch(key, Some(options)).await?;
        debug!(key, prefix, from_revision, watch_id = watcher.watch_id(), "etcd watch opened");

        let changes = stream.filter_map(move |item| {
            // The watch is cancelled server side once the watcher is dropped,
            // so it lives exactly as long as the stream.
            let _keep_alive = &watcher;
            futures::future::ready(match item {
                Ok(resp) => convert_watch_response(WatchFrame::from(&resp), from_revision),
                Err(e) => Some(Err(StreamError::Transport(e.to_string()).into())),
            })
        });

        Ok(changes.boxed())
    }

    async fn close(&self) {
        if self.client.write().take().is_some() {
            info!("etcd client closed");
        }
    }
}

/// Fields of an etcd watch response the change stream depends on
#[derive(Debug, Default)]
pub(super) struct WatchFrame {
    pub(super) watch_id: i64,
    pub(super) canceled: bool,
    pub(super) cancel_reason: String,
    pub(super) compact_revision: i64,
    pub(super) events: Vec<FrameEvent>,
}

#[derive(Debug)]
pub(super) struct FrameEvent {
    pub(super) kind: ChangeKind,
    pub(super) key: Vec<u8>,
    pub(super) value: Vec<u8>,
    pub(super) create_revision: i64,
    pub(super) mod_revision: i64,
}

impl From<&WatchResponse> for WatchFrame {
    fn from(resp: &WatchResponse) -> Self {
        let events = resp
            .events()
            .iter()
            .filter_map(|event| {
                let kv = event.kv()?;
                let kind = match event.event_type() {
                    EventType::Put => ChangeKind::Put,
                    EventType::Delete => ChangeKind::Delete,
                };
                Some(FrameEvent {
                    kind,
                    key: kv.key().to_vec(),
                    value: kv.value().to_vec(),
                    create_revision: kv.create_revision(),
                    mod_revision: kv.mod_revision(),
                })
            })
            .collect();

        Self {
            watch_id: resp.watch_id(),
            canceled: resp.canceled(),
            cancel_reason: resp.cancel_reason().to_string(),
            compact_revision: resp.compact_revision(),
            events,
        }
    }
}

/// Maps one etcd watch response onto a change batch.
///
/// Returns `None` for responses that carry no changes (watch created,
/// progress notifications). A canceled watch whose start revision has been
/// compacted reports [`StreamError::Compacted`].
pub(super) fn convert_watch_response(
    frame: WatchFrame,
    from_revision: Revision,
) -> Option<Result<Vec<ChangeNotification>>> {
    if frame.canceled {
        let err = if frame.compact_revision > 0 {
            StreamError::Compacted {
                requested: from_revision,
                compact_revision: frame.compact_revision.unsigned_abs(),
            }
        } else {
            StreamError::Canceled(frame.cancel_reason)
        };
        warn!(watch_id = frame.watch_id, "etcd watch canceled: {}", err);
        return Some(Err(err.into()));
    }

    if frame.events.is_empty() {
        return None;
    }

    let batch = frame
        .events
        .into_iter()
        .map(|event| -> Result<ChangeNotification> {
            Ok(ChangeNotification {
                kind: event.kind,
                key: event.key,
                value: event.value,
                create_revision: to_revision(event.create_revision)?,
                mod_revision: to_revision(event.mod_revision)?,
            })
        })
        .collect();

    Some(batch)
}

/// Revision a snapshot read was served at, taken from the response header.
///
/// A missing header is an error, never revision 0.
pub(super) fn snapshot_revision(header_revision: Option<i64>) -> Result<Revision> {
    let revision =
        header_revision.ok_or_else(|| Error::Connection("etcd response is missing its header".into()))?;
    to_revision(revision)
}

/// etcd revisions are signed on the wire
pub(super) fn start_revision(from_revision: Revision) -> Result<i64> {
    i64::try_from(from_revision).map_err(|_| Error::InvalidRevision {
        requested: from_revision,
        current: i64::MAX.unsigned_abs(),
    })
}

pub(super) fn to_revision(revision: i64) -> Result<Revision> {
    Revision::try_from(revision).map_err(|_| Error::Connection(format!("etcd returned negative revision {revision}")))
}
