use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Connection parameters for the revisioned key-value store
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StoreConfig {
    /// Store endpoints, e.g. `http://127.0.0.1:2379`
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<String>,

    /// Dial timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_in_ms: u64,

    /// Per-request timeout in milliseconds (0 disables it).
    /// Never applied to change streams.
    #[serde(default)]
    pub request_timeout_in_ms: u64,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            endpoints: default_endpoints(),
            connect_timeout_in_ms: default_connect_timeout(),
            request_timeout_in_ms: 0,
            username: None,
            password: None,
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<()> {
        if self.endpoints.is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "store.endpoints must contain at least one endpoint".into(),
            )));
        }

        if let Some(bad) = self.endpoints.iter().find(|e| e.trim().is_empty()) {
            return Err(Error::Config(ConfigError::Message(format!(
                "store.endpoints contains an empty endpoint: {bad:?}"
            ))));
        }

        if self.connect_timeout_in_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "store.connect_timeout_in_ms must be greater than 0".into(),
            )));
        }

        if self.username.is_some() != self.password.is_some() {
            return Err(Error::Config(ConfigError::Message(
                "store.username and store.password must be set together".into(),
            )));
        }

        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_in_ms)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_in_ms > 0).then(|| Duration::from_millis(self.request_timeout_in_ms))
    }
}

fn default_endpoints() -> Vec<String> {
    vec!["http://127.0.0.1:2379".to_string()]
}

// in ms
fn default_connect_timeout() -> u64 {
    3000
}
