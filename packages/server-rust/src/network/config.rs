//! Network configuration for the HTTP server.

use std::time::Duration;

use svckit_core::{ConfigError, ConfigStore};

/// Top-level network configuration for the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    /// Bind address for the server.
    pub host: String,
    /// Port to listen on. 0 means OS-assigned.
    pub port: u16,
    /// Allowed CORS origins.
    pub cors_origins: Vec<String>,
    /// Maximum time to wait for a request to complete.
    pub request_timeout: Duration,
    /// Largest request body buffered for a route, in bytes.
    pub max_body_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 0,
            cors_origins: vec!["*".to_string()],
            request_timeout: Duration::from_secs(30),
            max_body_size: 1024 * 1024,
        }
    }
}

impl NetworkConfig {
    /// Overrides defaults with the optional `server.*` keys of `store`:
    /// `host`, `port`, `cors_origins`, `request_timeout_ms` and `max_body_size`.
    ///
    /// # Errors
    ///
    /// Returns an error if a present key has the wrong type.
    pub fn from_store(store: &ConfigStore) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if store.has("server.host") {
            config.host = store.get("server.host")?;
        }
        if store.has("server.port") {
            config.port = store.get("server.port")?;
        }
        if store.has("server.cors_origins") {
            config.cors_origins = store.get("server.cors_origins")?;
        }
        if store.has("server.request_timeout_ms") {
            config.request_timeout = Duration::from_millis(store.get("server.request_timeout_ms")?);
        }
        if store.has("server.max_body_size") {
            config.max_body_size = store.get("server.max_body_size")?;
        }
        Ok(config)
    }
}
