//! Key and prefix watches over a revisioned key-value store
//!
//! Callers register a [`Listener`] for a key or key prefix with
//! [`WatchRegistry::add_watch`]. The registry spawns one session per watch
//! which:
//!
//! 1. reads the current state with a bounded timeout and replays it as
//!    `set` callbacks,
//! 2. opens a change stream at `snapshot_revision + 1` and forwards every
//!    change as `create`, `modify` or `delete`, in revision order,
//! 3. stops when the watch is removed or the stream fails.
//!
//! ```text
//! ┌──────────────┐ add/remove/clear ┌────────────────┐
//! │    caller    │ ───────────────► │ WatchRegistry  │  key -> CancellationToken
//! └──────────────┘                  └───────┬────────┘
//!                                           │ spawn (TaskTracker)
//!                                           ▼
//!                      ┌───────────────────────────────────────┐
//!                      │ WatchSession (one task per watch)      │
//!                      │ read ─► Set* ─► stream ─► C/M/D*       │
//!                      └───────────────────┬───────────────────┘
//!                                          ▼
//!                                     Listener
//! ```
//!
//! # Usage Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use kv_watcher::{ChannelListener, MemStore, WatchConfig, WatchRegistry};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let store = Arc::new(MemStore::new());
//! store.put("a/1", "x").unwrap();
//!
//! let registry = WatchRegistry::new(store.clone(), &WatchConfig::default());
//! let (listener, mut events) = ChannelListener::new();
//! registry.add_watch("a/", true, Arc::new(listener));
//!
//! let first = events.recv().await.unwrap(); // Set("a/1", "x")
//! registry.close(true).await;
//! # });
//! ```
//!
//! # Error Handling
//!
//! A failing session (snapshot timeout, connection loss, compaction past the
//! requested revision) ends on its own without affecting other watches and
//! is not retried. The failure is reported to
//! [`Listener::session_failed`]; the key stays registered until the caller
//! removes it.

mod listener;
mod registry;
mod session;


pub use listener::*;
pub use registry::*;
