//! Watch manager for revisioned key-value stores.
//!
//! Subscribes listeners to a key or key prefix, delivers a consistent
//! snapshot of the current state, then an ordered, gap-free stream of
//! create/modify/delete notifications.
//!
//! - [`WatchRegistry`] - owns active watches, add/remove/clear/close
//! - [`Listener`] - caller-supplied event sink
//! - [`StoreClient`] - store boundary, with [`EtcdStore`] and [`MemStore`]
//! - [`WatcherConfig`] - hierarchical configuration

mod config;
mod errors;
mod store;
mod watch;

pub use config::*;
pub use errors::*;
pub use store::*;
pub use watch::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
