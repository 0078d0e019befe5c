use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::event::EventTriggerWatcher;
use super::rule::RuleWatcher;
use super::schedule::ScheduleTriggerWatcher;
use super::trigger::TriggerWatcher;
use crate::actions::ActionFactory;
use crate::error::{Error, Result};
use crate::events::{EventStreamer, DEFAULT_LISTENER_CAPACITY};
use crate::models::{Rule, Target, Trigger, TriggerEvent, TriggerType};
use crate::reporter::ErrorReporter;
use crate::store::{RuleWriter, TriggerStateService};
use crate::validation::Validator;

/// Builds the watcher for one persisted trigger
pub trait TriggerWatcherFactory: Send + Sync {
    /// Create a watcher emitting into `events`.
    ///
    /// `targets` are the owning rule's targets, used by event triggers for
    /// matching.
    fn create(
        &self,
        trigger: &Trigger,
        last_executed: DateTime<Utc>,
        targets: &[Target],
        events: mpsc::Sender<TriggerEvent>,
    ) -> Result<Arc<dyn TriggerWatcher>>;
}

/// Maps [`TriggerType`] to the schedule and event watchers.
#[derive(Clone)]
pub struct DefaultTriggerWatcherFactory {
    streamer: Arc<EventStreamer>,
    trigger_states: Arc<dyn TriggerStateService>,
    validator: Arc<dyn Validator>,
    errors: ErrorReporter,
    listener_capacity: usize,
}

impl DefaultTriggerWatcherFactory {
    /// Create a factory sharing one streamer between all event watchers
    pub fn new(
        streamer: Arc<EventStreamer>,
        trigger_states: Arc<dyn TriggerStateService>,
        validator: Arc<dyn Validator>,
        errors: ErrorReporter,
    ) -> Self {
        Self {
            streamer,
            trigger_states,
            validator,
            errors,
            listener_capacity: DEFAULT_LISTENER_CAPACITY,
        }
    }

    /// Set the buffer size of listeners created for event watchers
    #[must_use]
    pub fn with_listener_capacity(mut self, capacity: usize) -> Self {
        self.listener_capacity = capacity;
        self
    }
}

impl TriggerWatcherFactory for DefaultTriggerWatcherFactory {
    fn create(
        &self,
        trigger: &Trigger,
        last_executed: DateTime<Utc>,
        targets: &[Target],
        events: mpsc::Sender<TriggerEvent>,
    ) -> Result<Arc<dyn TriggerWatcher>> {
        match trigger.trigger_type {
            TriggerType::TimeInterval => Ok(Arc::new(ScheduleTriggerWatcher::new(
                trigger.clone(),
                last_executed,
                self.validator.clone(),
                events,
                self.errors.clone(),
            ))),
            TriggerType::Event => Ok(Arc::new(EventTriggerWatcher::new(
                trigger.clone(),
                targets.to_vec(),
                last_executed,
                self.streamer.clone(),
                self.trigger_states.clone(),
                self.validator.clone(),
                events,
                self.errors.clone(),
                self.listener_capacity,
            ))),
            TriggerType::Unsupported => Err(Error::UnsupportedTriggerType {
                trigger_id: trigger.id,
                trigger_type: trigger.trigger_type,
            }),
        }
    }
}

/// Builds [`RuleWatcher`]s sharing one set of collaborators.
#[derive(Clone)]
pub struct RuleWatcherFactory {
    rule_writer: Arc<dyn RuleWriter>,
    trigger_factory: Arc<dyn TriggerWatcherFactory>,
    action_factory: Arc<dyn ActionFactory>,
    errors: ErrorReporter,
}

impl RuleWatcherFactory {
    /// Create a new factory
    pub fn new(
        rule_writer: Arc<dyn RuleWriter>,
        trigger_factory: Arc<dyn TriggerWatcherFactory>,
        action_factory: Arc<dyn ActionFactory>,
        errors: ErrorReporter,
    ) -> Self {
        Self {
            rule_writer,
            trigger_factory,
            action_factory,
            errors,
        }
    }

    /// Create a watcher owning its own copy of `rule`
    pub fn create(&self, rule: Rule) -> RuleWatcher {
        RuleWatcher::new(
            rule,
            self.rule_writer.clone(),
            self.trigger_factory.clone(),
            self.action_factory.clone(),
            self.errors.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::DefaultActionFactory;
    use crate::models::{ActionType, EventType};
    use crate::settings::{EventSettings, TimeIntervalSettings, TriggerSettings};
    use crate::store::{MemoryRuleStore, MemoryTriggerStateStore};
    use crate::test_support::FakeC2;
    use crate::validation::ModelValidator;

    fn factory() -> DefaultTriggerWatcherFactory {
        let (c2, _feed) = FakeC2::new();
        let (errors, _rx) = ErrorReporter::channel();
        DefaultTriggerWatcherFactory::new(
            Arc::new(EventStreamer::new(c2)),
            Arc::new(MemoryTriggerStateStore::new()),
            Arc::new(ModelValidator::new()),
            errors,
        )
    }

    #[test]
    fn test_creates_watcher_per_trigger_type() {
        let factory = factory();
        let (tx, _rx) = mpsc::channel(1);

        let schedule = TriggerSettings::from(TimeIntervalSettings::new("* * * * *"));
        let trigger = Trigger::new(1, 1, TriggerType::TimeInterval, schedule.encode().unwrap());
        let watcher = factory.create(&trigger, Utc::now(), &[], tx.clone()).unwrap();
        assert_eq!(watcher.trigger().id, 1);

        let event = TriggerSettings::from(EventSettings::new(EventType::ClientSubscribed, 1));
        let trigger = Trigger::new(2, 1, TriggerType::Event, event.encode().unwrap());
        let watcher = factory
            .create(&trigger, Utc::now(), &[Target::client(1, "c1")], tx)
            .unwrap();
        assert_eq!(watcher.trigger().trigger_type, TriggerType::Event);
    }

    #[test]
    fn test_unsupported_trigger_type_is_rejected() {
        let factory = factory();
        let (tx, _rx) = mpsc::channel(1);
        let trigger = Trigger::new(3, 1, TriggerType::Unsupported, Vec::new());

        let result = factory.create(&trigger, Utc::now(), &[], tx);
        assert!(matches!(
            result,
            Err(Error::UnsupportedTriggerType { trigger_id: 3, .. })
        ));
    }

    #[test]
    fn test_rule_watcher_factory_copies_rule() {
        let (c2, _feed) = FakeC2::new();
        let (errors, _rx) = ErrorReporter::channel();
        let rule_factory = RuleWatcherFactory::new(
            Arc::new(MemoryRuleStore::new()),
            Arc::new(factory()),
            Arc::new(DefaultActionFactory::new(c2, errors.clone())),
            errors,
        );

        let rule = Rule::new(9, "rotate", ActionType::KeyRotation).with_target(Target::client(1, "alice"));
        let watcher = rule_factory.create(rule.clone());
        assert_eq!(watcher.rule(), &rule);
    }
}
