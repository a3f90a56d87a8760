//! Configuration management for the broadcast relay
//!
//! Values are layered: built-in defaults, then an optional `config.toml`,
//! then `RELAY_` prefixed environment variables.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Semaphore;

/// Prefix for environment overrides, e.g. `RELAY_PORT=4000`
pub const ENV_PREFIX: &str = "RELAY";

/// Largest accepted read buffer per connection (16 MiB)
pub const MAX_READ_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Complete server configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ServerConfig {
    // ═══ NETWORK ═══
    /// Host name or IP address to bind the listening socket
    pub bind_address: String,

    /// TCP port to listen on (0 picks an ephemeral port)
    pub port: u16,

    /// Listen backlog for pending connections
    pub backlog: u32,

    // ═══ RELAY BEHAVIOR ═══
    /// Upper bound of a single read; each read becomes one broadcast payload
    pub read_chunk_size: usize,

    /// Bound on a single write to one target during broadcast
    pub write_timeout_ms: u64,

    /// Read inactivity bound in seconds, 0 disables it
    pub idle_timeout_secs: u64,

    /// Maximum concurrent clients, 0 means unlimited
    pub max_clients: usize,

    /// Whether the sender receives its own payloads
    pub echo_to_sender: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 1234,
            backlog: 5,
            read_chunk_size: 2048,
            write_timeout_ms: 5000,
            idle_timeout_secs: 0,
            max_clients: 0,
            echo_to_sender: true,
        }
    }
}

impl ServerConfig {
    /// Load configuration from config.toml with environment overrides
    pub fn load() -> Result<Self, config::ConfigError> {
        // Packaged layout first, then the working directory
        let config_paths = ["broadcast-relay/config", "config"];

        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);
        for config_path in config_paths {
            builder = builder.add_source(File::with_name(config_path).required(false));
        }

        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: ServerConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validation for all configuration values
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if self.bind_address.trim().is_empty() {
            return Err(config::ConfigError::Message(
                "bind_address cannot be empty".into(),
            ));
        }

        if self.backlog == 0 {
            return Err(config::ConfigError::Message(
                "backlog must be greater than 0".into(),
            ));
        }

        if self.read_chunk_size == 0 {
            return Err(config::ConfigError::Message(
                "read_chunk_size must be greater than 0".into(),
            ));
        }

        if self.read_chunk_size > MAX_READ_CHUNK_SIZE {
            return Err(config::ConfigError::Message(format!(
                "read_chunk_size must not exceed {MAX_READ_CHUNK_SIZE}"
            )));
        }

        if self.write_timeout_ms == 0 {
            return Err(config::ConfigError::Message(
                "write_timeout_ms must be greater than 0".into(),
            ));
        }

        if self.max_clients > Semaphore::MAX_PERMITS {
            return Err(config::ConfigError::Message(format!(
                "max_clients must not exceed {}",
                Semaphore::MAX_PERMITS
            )));
        }

        Ok(())
    }

    /// Get bind address and port as a "host:port" string
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    /// Get the per-target write bound as Duration
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Get the read inactivity bound, if enabled
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    /// Get the admission limit, if enabled
    pub fn admission_limit(&self) -> Option<usize> {
        (self.max_clients > 0).then_some(self.max_clients)
    }
}
