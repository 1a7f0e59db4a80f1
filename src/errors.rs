//! Watch Error Hierarchy
//!
//! Session-level failures are local: they end one watch session and are
//! reported through [`crate::Listener::session_failed`], never to the caller
//! of `add_watch`.

use std::time::Duration;

use config::ConfigError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Store connection could not be established or is no longer usable
    #[error("Store connection error: {0}")]
    Connection(String),

    /// Snapshot read exceeded its deadline
    #[error("Snapshot read of {key:?} timed out after {duration:?}")]
    Timeout { key: String, duration: Duration },

    /// The change stream reported a terminal failure
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// Revision argument is ahead of the store
    #[error("Revision {requested} is in the future (current revision {current})")]
    InvalidRevision { requested: u64, current: u64 },

    /// Configuration loading or validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Requested start revision has already been compacted away
    #[error("Revision {requested} has been compacted (compact revision {compact_revision})")]
    Compacted {
        requested: u64,
        compact_revision: u64,
    },

    /// Store cancelled the stream on its side
    #[error("Change stream canceled by store: {0}")]
    Canceled(String),

    /// Subscriber fell behind the store's fan-out buffer and missed changes
    #[error("Change stream lagged behind by {0} batches")]
    Lagged(u64),

    /// Stream ended without an error; no more changes can arrive
    #[error("Change stream closed")]
    Closed,

    /// Transport failure while consuming the stream
    #[error("Change stream transport failure: {0}")]
    Transport(String),
}

impl From<etcd_client::Error> for Error {
    fn from(e: etcd_client::Error) -> Self {
        Error::Connection(e.to_string())
    }
}
