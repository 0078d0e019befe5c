//! Engine configuration
//!
//! Loaded from the embedded defaults, an optional file, then `ROTOR_*`
//! environment variables (highest priority). Nested keys use `__`, e.g.
//! `ROTOR_LOG__LEVEL=debug`.

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};

/// Embedded default configuration
pub const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

/// Environment variable prefix
pub const ENV_PREFIX: &str = "ROTOR";

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Automation engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Events buffered per event trigger before the oldest is dropped
    pub listener_capacity: usize,
    /// Delay before re-opening a failed C2 event subscription
    pub stream_retry_delay_secs: u64,
    /// Bound on waiting for watchers after cancellation
    pub shutdown_timeout_secs: u64,
    /// Logging
    pub log: LogConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            listener_capacity: 10,
            stream_retry_delay_secs: 5,
            shutdown_timeout_secs: 10,
            log: LogConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from embedded defaults, an optional file and `ROTOR_*` variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    /// Same as [`EngineConfig::load`] with a custom environment prefix
    pub fn load_with_prefix(path: Option<&Path>, env_prefix: &str) -> Result<Self> {
        let mut builder =
            Config::builder().add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml));
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        // prefix_separator("_") keeps ROTOR_LOG__LEVEL working; config-rs
        // otherwise expects ROTOR__LOG__LEVEL
        let config = builder
            .add_source(
                Environment::with_prefix(env_prefix)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let loaded: Self = config.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.listener_capacity == 0 {
            return Err(Error::Config(
                "listener_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Set the per-listener event buffer size
    pub fn with_listener_capacity(mut self, capacity: usize) -> Self {
        self.listener_capacity = capacity;
        self
    }

    /// Set the stream re-subscribe delay
    pub fn with_stream_retry_delay(mut self, secs: u64) -> Self {
        self.stream_retry_delay_secs = secs;
        self
    }

    /// Set the shutdown wait bound
    pub fn with_shutdown_timeout(mut self, secs: u64) -> Self {
        self.shutdown_timeout_secs = secs;
        self
    }

    /// Set logging options
    pub fn with_log(mut self, log: LogConfig) -> Self {
        self.log = log;
        self
    }

    /// Stream re-subscribe delay
    pub fn stream_retry_delay(&self) -> Duration {
        Duration::from_secs(self.stream_retry_delay_secs)
    }

    /// Shutdown wait bound
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
