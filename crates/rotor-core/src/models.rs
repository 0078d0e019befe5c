//! Automation models
//!
//! Rules, triggers and targets are owned by the persistence layer. Watchers
//! hold in-memory copies and write back only through the store traits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Operation performed when a rule fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Request fresh keys for every target of the rule
    KeyRotation,
    /// Persisted value not recognised by this build
    #[serde(other)]
    Unsupported,
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeyRotation => write!(f, "key rotation"),
            Self::Unsupported => write!(f, "unsupported"),
        }
    }
}

/// Condition family of a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    /// Fires on a cron schedule
    TimeInterval,
    /// Fires after a number of matching C2 events
    Event,
    /// Persisted value not recognised by this build
    #[serde(other)]
    Unsupported,
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimeInterval => write!(f, "time interval"),
            Self::Event => write!(f, "event"),
            Self::Unsupported => write!(f, "unsupported"),
        }
    }
}

/// What a target expression refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    /// Matches either a client or a topic
    Any,
    /// A pub/sub topic
    Topic,
    /// A client, identified by name
    Client,
    /// Persisted value not recognised by this build
    #[serde(other)]
    Unsupported,
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "any"),
            Self::Topic => write!(f, "topic"),
            Self::Client => write!(f, "client"),
            Self::Unsupported => write!(f, "unsupported"),
        }
    }
}

/// Event kinds published by the C2 event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A client subscribed to a topic
    ClientSubscribed,
    /// A client unsubscribed from a topic
    ClientUnsubscribed,
    /// Persisted value not recognised by this build
    #[serde(other)]
    Unsupported,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientSubscribed => write!(f, "client subscribed"),
            Self::ClientUnsubscribed => write!(f, "client unsubscribed"),
            Self::Unsupported => write!(f, "unsupported"),
        }
    }
}

/// An automation rule: one action, run against its targets whenever any of
/// its triggers fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Rule ID
    pub id: i64,
    /// Human-readable description
    pub description: String,
    /// Action to run when a trigger fires
    pub action_type: ActionType,
    /// Time of the last successful firing
    #[serde(default)]
    pub last_executed: Option<DateTime<Utc>>,
    /// Triggers, in persisted order
    #[serde(default)]
    pub triggers: Vec<Trigger>,
    /// Targets, in persisted order
    #[serde(default)]
    pub targets: Vec<Target>,
}

impl Rule {
    /// Create a rule without triggers or targets
    pub fn new(id: i64, description: impl Into<String>, action_type: ActionType) -> Self {
        Self {
            id,
            description: description.into(),
            action_type,
            last_executed: None,
            triggers: Vec::new(),
            targets: Vec::new(),
        }
    }

    /// Append a trigger
    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.triggers.push(trigger);
        self
    }

    /// Append a target
    pub fn with_target(mut self, target: Target) -> Self {
        self.targets.push(target);
        self
    }

    /// Set the last execution time
    pub fn with_last_executed(mut self, at: DateTime<Utc>) -> Self {
        self.last_executed = Some(at);
        self
    }
}

/// A time or event based condition belonging to a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    /// Trigger ID
    pub id: i64,
    /// Owning rule ID
    pub rule_id: i64,
    /// Condition family
    pub trigger_type: TriggerType,
    /// Encoded settings, decoded once when the watcher starts
    #[serde(default)]
    pub settings: Vec<u8>,
    /// Persisted occurrence state, when loaded with the trigger
    #[serde(default)]
    pub state: Option<TriggerState>,
}

impl Trigger {
    /// Create a trigger with already encoded settings
    pub fn new(id: i64, rule_id: i64, trigger_type: TriggerType, settings: Vec<u8>) -> Self {
        Self {
            id,
            rule_id,
            trigger_type,
            settings,
            state: None,
        }
    }
}

/// A client, topic or wildcard the rule's action applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Target ID
    pub id: i64,
    /// What `expr` refers to
    pub target_type: TargetType,
    /// Client name or topic, compared verbatim
    pub expr: String,
}

impl Target {
    /// Create a target
    pub fn new(id: i64, target_type: TargetType, expr: impl Into<String>) -> Self {
        Self {
            id,
            target_type,
            expr: expr.into(),
        }
    }

    /// Client target
    pub fn client(id: i64, name: impl Into<String>) -> Self {
        Self::new(id, TargetType::Client, name)
    }

    /// Topic target
    pub fn topic(id: i64, topic: impl Into<String>) -> Self {
        Self::new(id, TargetType::Topic, topic)
    }
}

/// Durable occurrence counter of an event trigger.
///
/// The counter resets to 0 exactly when it reaches the trigger's
/// `max_occurrence` and the trigger fires.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerState {
    /// State ID, 0 until first persisted
    pub id: i64,
    /// Owning trigger ID
    pub trigger_id: i64,
    /// Matching events seen since the last firing
    pub counter: u32,
}

impl TriggerState {
    /// Fresh zero state for a trigger
    pub fn new(trigger_id: i64) -> Self {
        Self {
            id: 0,
            trigger_id,
            counter: 0,
        }
    }
}

/// Emitted by a trigger watcher when its condition is satisfied.
///
/// Consumed once by the owning rule watcher; never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerEvent {
    /// Trigger that fired
    pub trigger: Trigger,
    /// Firing time
    pub time: DateTime<Utc>,
}

/// An event received from the C2 event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Event kind
    pub event_type: EventType,
    /// Originating client
    pub source: String,
    /// Affected client or topic
    pub target: String,
    /// Time the C2 service emitted the event
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Create an event stamped with the current time
    pub fn new(event_type: EventType, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            event_type,
            source: source.into(),
            target: target.into(),
            timestamp: Utc::now(),
        }
    }
}
