//! Trigger settings
//!
//! Triggers persist their settings as an opaque JSON blob. Each trigger type
//! decodes it into its own settings struct:
//! - TimeInterval: a cron expression
//! - Event: the event type to count and how many occurrences fire the trigger

use cron::Schedule;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::models::{EventType, Trigger, TriggerType};

/// Settings decoding errors
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// Blob is not valid JSON for the trigger type
    #[error("malformed settings: {0}")]
    Malformed(#[from] serde_json::Error),
    /// Cron expression rejected by the parser
    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidCron {
        /// Expression as written by the user
        expr: String,
        /// Parser message
        reason: String,
    },
    /// Trigger type has no settings schema
    #[error("unsupported trigger type: {0}")]
    UnsupportedTriggerType(TriggerType),
}

/// Settings of a time interval trigger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeIntervalSettings {
    /// Cron expression (5, 6 or 7 fields)
    /// Examples:
    ///   "* * * * *" - Every minute
    ///   "0 3 * * *" - Every day at 3:00 AM
    ///   "*/10 * * * * *" - Every 10 seconds
    pub expr: String,
}

impl TimeIntervalSettings {
    /// Create settings for a cron expression
    pub fn new(expr: impl Into<String>) -> Self {
        Self { expr: expr.into() }
    }

    /// Parse the cron expression into a schedule.
    pub fn schedule(&self) -> Result<Schedule, SettingsError> {
        parse_schedule(&self.expr)
    }
}

/// Settings of an event trigger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSettings {
    /// Event kind to count
    pub event_type: EventType,
    /// Matching events needed to fire
    pub max_occurrence: u32,
}

impl EventSettings {
    /// Create event settings
    pub fn new(event_type: EventType, max_occurrence: u32) -> Self {
        Self {
            event_type,
            max_occurrence,
        }
    }
}

/// Decoded settings of any supported trigger type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerSettings {
    /// Cron schedule
    TimeInterval(TimeIntervalSettings),
    /// Event occurrence budget
    Event(EventSettings),
}

impl TriggerSettings {
    /// Decode a trigger's settings blob according to its type.
    pub fn decode(trigger: &Trigger) -> Result<Self, SettingsError> {
        match trigger.trigger_type {
            TriggerType::TimeInterval => Ok(Self::TimeInterval(serde_json::from_slice(
                &trigger.settings,
            )?)),
            TriggerType::Event => Ok(Self::Event(serde_json::from_slice(&trigger.settings)?)),
            other => Err(SettingsError::UnsupportedTriggerType(other)),
        }
    }

    /// Encode settings into the persisted blob format.
    pub fn encode(&self) -> Result<Vec<u8>, SettingsError> {
        let bytes = match self {
            Self::TimeInterval(s) => serde_json::to_vec(s)?,
            Self::Event(s) => serde_json::to_vec(s)?,
        };
        Ok(bytes)
    }

    /// Trigger type these settings belong to
    pub fn trigger_type(&self) -> TriggerType {
        match self {
            Self::TimeInterval(_) => TriggerType::TimeInterval,
            Self::Event(_) => TriggerType::Event,
        }
    }
}

impl From<TimeIntervalSettings> for TriggerSettings {
    fn from(s: TimeIntervalSettings) -> Self {
        Self::TimeInterval(s)
    }
}

impl From<EventSettings> for TriggerSettings {
    fn from(s: EventSettings) -> Self {
        Self::Event(s)
    }
}

/// Normalize a 5-field cron expression to 6-field by prepending "0 " for seconds.
///
/// The `cron` crate requires a leading seconds field. 6 and 7 field
/// expressions are passed through unchanged.
pub(crate) fn normalize_cron(expr: &str) -> String {
    let trimmed = expr.trim();
    if trimmed.split_whitespace().count() == 5 {
        format!("0 {}", trimmed)
    } else {
        trimmed.to_string()
    }
}

/// Parse a cron expression into a schedule.
pub fn parse_schedule(expr: &str) -> Result<Schedule, SettingsError> {
    Schedule::from_str(&normalize_cron(expr)).map_err(|e| SettingsError::InvalidCron {
        expr: expr.to_string(),
        reason: e.to_string(),
    })
}
