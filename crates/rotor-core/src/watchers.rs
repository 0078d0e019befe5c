//! Rule and trigger watchers
//!
//! Each rule gets one [`RuleWatcher`] task, which in turn runs one
//! [`TriggerWatcher`] task per trigger:
//!
//! ```text
//! ┌─────────────────┐   TriggerEvent   ┌──────────────┐
//! │ TriggerWatcher  │ ───────────────▶ │ RuleWatcher  │ ──▶ Action
//! │ (schedule/event)│ ◀─────────────── │              │
//! └─────────────────┘  last executed   └──────────────┘
//! ```
//!
//! Cancellation is hierarchical: cancelling a rule watcher's token stops all
//! of its trigger watchers.

mod event;
mod factory;
mod rule;
mod schedule;
mod trigger;

pub use event::{target_matches, EventTriggerWatcher};
pub use factory::{DefaultTriggerWatcherFactory, RuleWatcherFactory, TriggerWatcherFactory};
pub use rule::RuleWatcher;
pub use schedule::ScheduleTriggerWatcher;
pub use trigger::TriggerWatcher;
