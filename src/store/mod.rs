//! Boundary to the revisioned key-value store.
//!
//! A watch session needs exactly two capabilities from the store: a read of
//! a key (or prefix) at the current revision, and a change stream that starts
//! at an arbitrary revision. Stitching the two together at
//! `snapshot_revision + 1` is what makes a watch gap-free.
//!
//! Two implementations are provided:
//! - [`EtcdStore`] talks to an etcd v3 cluster
//! - [`MemStore`] is an in-process store with history and compaction

mod etcd;
mod mem;

pub use etcd::*;
pub use mem::*;


use futures::stream::BoxStream;
#[cfg(test)]
use mockall::automock;
use tonic::async_trait;

use crate::Result;

/// Store-assigned revision of a mutation
pub type Revision = u64;

/// A key/value pair as returned by a snapshot read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Result of a point or prefix read
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Entries in store order
    pub entries: Vec<KeyValue>,
    /// Store revision the read was served at
    pub revision: Revision,
}

/// Raw transition type reported by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Put,
    Delete,
    /// Transition the client does not understand (raw wire value)
    Unknown(i32),
}

/// One change inside a stream batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotification {
    pub kind: ChangeKind,
    pub key: Vec<u8>,
    /// Empty for deletes
    pub value: Vec<u8>,
    /// Revision at which the key was (re)created
    pub create_revision: Revision,
    /// Revision of this change
    pub mod_revision: Revision,
}

impl ChangeNotification {
    pub fn put(
        key: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
        create_revision: Revision,
        mod_revision: Revision,
    ) -> Self {
        Self {
            kind: ChangeKind::Put,
            key: key.into(),
            value: value.into(),
            create_revision,
            mod_revision,
        }
    }

    pub fn delete(
        key: impl Into<Vec<u8>>,
        mod_revision: Revision,
    ) -> Self {
        Self {
            kind: ChangeKind::Delete,
            key: key.into(),
            value: Vec::new(),
            create_revision: 0,
            mod_revision,
        }
    }

    /// A put that brought the key into existence
    pub fn is_create(&self) -> bool {
        self.kind == ChangeKind::Put && self.create_revision == self.mod_revision
    }

    /// A put over an existing key
    pub fn is_modify(&self) -> bool {
        self.kind == ChangeKind::Put && self.create_revision != self.mod_revision
    }

    pub fn is_delete(&self) -> bool {
        self.kind == ChangeKind::Delete
    }
}

/// Ordered batches of changes, starting at the requested revision.
///
/// The stream blocks until the next batch arrives. An `Err` item is terminal;
/// `None` means the store closed the stream.
pub type ChangeStream = BoxStream<'static, Result<Vec<ChangeNotification>>>;

/// Connection to a revisioned key-value store.
///
/// Implementations are shared read-only across all watch sessions of a
/// registry, so every method takes `&self`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StoreClient: Send + Sync + 'static {
    /// Reads `key` (or every key under it when `prefix` is set) at the
    /// current revision.
    ///
    /// # Errors
    /// - [`crate::Error::Connection`] if the store is unreachable or closed
    async fn read(
        &self,
        key: &str,
        prefix: bool,
    ) -> Result<Snapshot>;

    /// Opens a change stream over `key` (or its prefix) that yields every
    /// change with revision `>= from_revision`, in revision order.
    ///
    /// # Errors
    /// - [`crate::Error::Connection`] if the store is unreachable or closed
    /// - [`crate::StreamError::Compacted`] if `from_revision` is no longer
    ///   retained
    async fn open_change_stream(
        &self,
        key: &str,
        prefix: bool,
        from_revision: Revision,
    ) -> Result<ChangeStream>;

    /// Releases the underlying connection. Later calls fail with
    /// [`crate::Error::Connection`].
    async fn close(&self);
}
