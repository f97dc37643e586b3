//! Runtime configuration.
//!
//! All tunables have sensible defaults. A JSON file can override any subset of them, its path is
//! taken from the `TAD_CONFIG` environment variable when using [`RuntimeConfig::from_env`].
//!
//! [`RuntimeConfig::from_env`]: struct.RuntimeConfig.html#method.from_env
use std::{fs, io, path::Path};

use serde::{Deserialize, Serialize};

/// Environment variable naming a configuration file.
pub const CONFIG_ENV: &str = "TAD_CONFIG";

/// Errors while loading a configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] io::Error),
    /// The file is not valid JSON for a configuration.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
    /// A value is out of its allowed range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Tunables of a [`Runtime`](../struct.Runtime.html).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Maximum number of entries of a newly created send queue.
    pub sendq_max_size: usize,
    /// How often a write is retried when the endpoint reports it is out of buffers.
    pub write_retries: u32,
    /// Upper bound of the randomized back-off between write retries, in microseconds.
    pub write_backoff_max_us: u64,
    /// Poll interval of the receive loop, in milliseconds.
    ///
    /// A stop request is observed within one interval.
    pub recv_poll_interval_ms: u64,
    /// Size of the buffer a single frame is received into.
    pub recv_buffer_len: usize,
    /// Seed for the pseudo-random generators of forwarder tasks.
    ///
    /// `None` seeds from the operating system.
    pub forwarder_seed: Option<u64>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            sendq_max_size: 1024,
            write_retries: 3,
            write_backoff_max_us: 1000,
            recv_poll_interval_ms: 100,
            recv_buffer_len: 1 << 16,
            forwarder_seed: None,
        }
    }
}

impl RuntimeConfig {
    /// Load the configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Parse the configuration from JSON text.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the file named by `TAD_CONFIG`, or the defaults when it is not set.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => {
                tracing::debug!(path = ?path, "loading runtime configuration");
                Self::load(path)
            },
            None => Ok(Self::default()),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.sendq_max_size == 0 {
            return Err(ConfigError::Invalid("sendq_max_size must be positive".into()));
        }
        if self.recv_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("recv_poll_interval_ms must be positive".into()));
        }
        if self.recv_buffer_len < 64 {
            return Err(ConfigError::Invalid("recv_buffer_len must hold a minimal frame".into()));
        }
        Ok(())
    }
}
