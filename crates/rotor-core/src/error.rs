//! Error types for rotor-core
//!
//! Every failure a watcher or action cannot handle locally ends up as an
//! [`Error`] on the engine's error channel (see [`crate::reporter`]). None of
//! them is fatal beyond the component that raised it.

use thiserror::Error;

use crate::c2::C2Error;
use crate::events::StreamError;
use crate::models::{ActionType, TriggerType};
use crate::store::StoreError;

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// Trigger settings failed validation or decoding; stops that watcher only
    #[error("invalid trigger {trigger_id}: {reason}")]
    InvalidTrigger {
        /// Offending trigger
        trigger_id: i64,
        /// What was wrong
        reason: String,
    },

    /// No watcher exists for this trigger type
    #[error("unsupported trigger type '{trigger_type}' for trigger {trigger_id}")]
    UnsupportedTriggerType {
        /// Offending trigger
        trigger_id: i64,
        /// Type as persisted
        trigger_type: TriggerType,
    },

    /// No action exists for this action type
    #[error("unsupported action type '{action_type}' for rule {rule_id}")]
    UnsupportedActionType {
        /// Offending rule
        rule_id: i64,
        /// Type as persisted
        action_type: ActionType,
    },

    /// Action cannot be applied to this kind of target
    #[error("action '{action}' does not support target type '{target_type}' (target {target_id})")]
    UnsupportedTargetType {
        /// Action name
        action: String,
        /// Human-readable target type
        target_type: String,
        /// Offending target
        target_id: i64,
    },

    /// Trigger watcher is no longer running
    #[error("trigger watcher {trigger_id} is not running")]
    WatcherStopped {
        /// Trigger of the stopped watcher
        trigger_id: i64,
    },

    /// C2 collaborator failure
    #[error("c2 error: {0}")]
    C2(#[from] C2Error),

    /// Persistence failure
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Event stream failure
    #[error("stream error: {0}")]
    Stream(#[from] StreamError),

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(String),

    /// Work was abandoned because of cancellation
    #[error("cancelled")]
    Cancelled,
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::Config(e.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether this error only reports a cancellation
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled | Error::Stream(StreamError::Cancelled))
    }
}
