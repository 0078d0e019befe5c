//! Rotor Core - Rule-driven key rotation engine
//!
//! This crate watches automation rules and requests new cryptographic keys from
//! a C2 service whenever one of a rule's triggers fires:
//! - Models: rules, triggers, targets and persisted trigger state
//! - Events: a single upstream C2 event subscription fanned out to listeners
//! - Watchers: schedule and event trigger watchers supervised per rule
//! - Actions: key rotation requests against client and topic targets
//! - Engine: full rebuild of the watcher set whenever the rule set changes
//!
//! # Architecture
//!
//! ```text
//! C2 event stream ─▶ EventStreamer ─▶ StreamListener ─▶ EventTriggerWatcher ─┐
//!                                                                           ├─▶ RuleWatcher ─▶ Action ─▶ C2
//!                               timers ─▶ ScheduleTriggerWatcher ───────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod actions;
pub mod c2;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod reporter;
pub mod settings;
pub mod store;
pub mod validation;
pub mod watchers;

#[cfg(test)]
mod test_support;

pub use actions::{Action, ActionFactory, DefaultActionFactory, KeyRotationAction};
pub use c2::{hash_client_name, C2Client, C2Error, EventStream};
pub use config::{EngineConfig, LogConfig};
pub use engine::{AutomationEngine, EngineHandle};
pub use error::{Error, Result};
pub use events::{EventStreamer, ListenerId, StreamError, StreamListener};
pub use logging::init_tracing;
pub use models::{
    ActionType, Event, EventType, Rule, Target, TargetType, Trigger, TriggerEvent, TriggerState,
    TriggerType,
};
pub use reporter::{log_errors, ErrorReporter};
pub use settings::{EventSettings, SettingsError, TimeIntervalSettings, TriggerSettings};
pub use store::{
    MemoryRuleStore, MemoryTriggerStateStore, RuleWriter, StoreError, TriggerStateService,
};
pub use validation::{ModelValidator, ValidationError, Validator};
pub use watchers::{
    DefaultTriggerWatcherFactory, EventTriggerWatcher, RuleWatcher, RuleWatcherFactory,
    ScheduleTriggerWatcher, TriggerWatcher, TriggerWatcherFactory,
};
