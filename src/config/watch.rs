use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Configuration for watch sessions
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WatchConfig {
    /// Deadline for the initial snapshot read of each session
    ///
    /// This is the only deadline in the watch protocol: once the change
    /// stream is open a session waits indefinitely for the next batch.
    ///
    /// **Default**: 3000
    #[serde(default = "default_snapshot_timeout")]
    pub snapshot_timeout_in_ms: u64,

    /// Fan-out buffer (in batches) of the in-process `MemStore`
    ///
    /// A subscriber that falls further behind than this gets a
    /// `StreamError::Lagged` and its session ends.
    ///
    /// **Default**: 1024
    #[serde(default = "default_change_buffer_size")]
    pub change_buffer_size: usize,

    /// Revisions of change history retained by the in-process `MemStore`
    ///
    /// Older revisions are compacted away as new ones are committed; a change
    /// stream that starts before the retained window fails with
    /// `StreamError::Compacted`.
    ///
    /// **Default**: 10000
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Keys watched by the `kv-watcher` daemon at startup
    #[serde(default)]
    pub targets: Vec<WatchTarget>,
}

/// A key or key prefix to watch
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct WatchTarget {
    pub key: String,
    #[serde(default)]
    pub prefix: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            snapshot_timeout_in_ms: default_snapshot_timeout(),
            change_buffer_size: default_change_buffer_size(),
            history_limit: default_history_limit(),
            targets: Vec::new(),
        }
    }
}

impl WatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.snapshot_timeout_in_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "watch.snapshot_timeout_in_ms must be greater than 0".into(),
            )));
        }

        if self.change_buffer_size == 0 {
            return Err(Error::Config(ConfigError::Message(
                "watch.change_buffer_size must be greater than 0".into(),
            )));
        }

        if self.history_limit == 0 {
            return Err(Error::Config(ConfigError::Message(
                "watch.history_limit must be greater than 0".into(),
            )));
        }

        let mut seen = std::collections::HashSet::new();
        for target in &self.targets {
            if !seen.insert(target.key.as_str()) {
                return Err(Error::Config(ConfigError::Message(format!(
                    "watch.targets contains duplicate key {:?}",
                    target.key
                ))));
            }
        }

        Ok(())
    }

    pub fn snapshot_timeout(&self) -> Duration {
        Duration::from_millis(self.snapshot_timeout_in_ms)
    }
}

// in ms
fn default_snapshot_timeout() -> u64 {
    3000
}

fn default_change_buffer_size() -> usize {
    1024
}

fn default_history_limit() -> usize {
    10_000
}
