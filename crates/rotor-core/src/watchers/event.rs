use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::trigger::{emit, load_settings, Baseline, TriggerWatcher};
use crate::error::{Error, Result};
use crate::events::{EventStreamer, StreamListener};
use crate::models::{Event, Target, TargetType, Trigger, TriggerEvent, TriggerState};
use crate::reporter::ErrorReporter;
use crate::settings::{EventSettings, TriggerSettings};
use crate::store::TriggerStateService;
use crate::validation::Validator;

/// Whether an event concerns a target.
///
/// - Client: the event source is the client
/// - Topic: the event target is the topic
/// - Any: either of the above
pub fn target_matches(target: &Target, event: &Event) -> bool {
    match target.target_type {
        TargetType::Client => target.expr == event.source,
        TargetType::Topic => target.expr == event.target,
        TargetType::Any => target.expr == event.source || target.expr == event.target,
        TargetType::Unsupported => {
            warn!(target_id = target.id, "Unsupported target type, skipping match");
            false
        }
    }
}

/// Watches an event trigger.
///
/// Counts matching C2 events of one type and fires once the persisted
/// counter reaches the trigger's max occurrence, then starts over from 0.
pub struct EventTriggerWatcher {
    trigger: Trigger,
    targets: Vec<Target>,
    streamer: Arc<EventStreamer>,
    trigger_states: Arc<dyn TriggerStateService>,
    validator: Arc<dyn Validator>,
    events: mpsc::Sender<TriggerEvent>,
    errors: ErrorReporter,
    listener_capacity: usize,
    baseline: Baseline,
}

impl EventTriggerWatcher {
    /// Create a watcher for a trigger and the targets of its rule
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        trigger: Trigger,
        targets: Vec<Target>,
        last_executed: DateTime<Utc>,
        streamer: Arc<EventStreamer>,
        trigger_states: Arc<dyn TriggerStateService>,
        validator: Arc<dyn Validator>,
        events: mpsc::Sender<TriggerEvent>,
        errors: ErrorReporter,
        listener_capacity: usize,
    ) -> Self {
        let baseline = Baseline::new(trigger.id, last_executed);
        Self {
            trigger,
            targets,
            streamer,
            trigger_states,
            validator,
            events,
            errors,
            listener_capacity,
            baseline,
        }
    }

    fn load_event_settings(&self) -> Result<EventSettings> {
        match load_settings(&self.trigger, self.validator.as_ref())? {
            TriggerSettings::Event(settings) => Ok(settings),
            other => Err(Error::InvalidTrigger {
                trigger_id: self.trigger.id,
                reason: format!("expected event settings, got {}", other.trigger_type()),
            }),
        }
    }

    /// First matching target wins; an event counts once however many
    /// targets it matches.
    fn matches_targets(&self, event: &Event) -> bool {
        self.targets.iter().any(|t| target_matches(t, event))
    }

    async fn load_state(&self, cancel: &CancellationToken) -> Option<TriggerState> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            loaded = self.trigger_states.by_trigger_id(self.trigger.id) => match loaded {
                Ok(state) => Some(state),
                Err(e) => {
                    warn!(trigger_id = self.trigger.id, error = %e, "Failed to load trigger state");
                    self.errors.report(Error::Store(e));
                    None
                }
            },
        }
    }

    /// Count one event. Returns `false` when the watcher must stop.
    async fn on_event(
        &self,
        event: Event,
        settings: &EventSettings,
        state: &mut TriggerState,
        cancel: &CancellationToken,
    ) -> bool {
        let trigger_id = self.trigger.id;
        if !self.matches_targets(&event) {
            debug!(
                trigger_id,
                source = %event.source,
                target = %event.target,
                "Event matches no target"
            );
            return true;
        }

        let previous = state.counter;
        state.counter = state.counter.saturating_add(1);
        debug!(
            trigger_id,
            counter = state.counter,
            max_occurrence = settings.max_occurrence,
            "Matching event counted"
        );

        let mut fired = false;
        if state.counter >= settings.max_occurrence {
            let now = Utc::now();
            info!(trigger_id, time = %now, "Event trigger fired");
            let trigger_event = TriggerEvent {
                trigger: self.trigger.clone(),
                time: now,
            };
            if !emit(&self.events, cancel, trigger_event).await {
                return false;
            }
            state.counter = 0;
            fired = true;
        }

        if state.counter != previous || fired {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return false,
                saved = self.trigger_states.save(state) => {
                    if let Err(e) = saved {
                        warn!(trigger_id, error = %e, "Failed to save trigger state");
                        self.errors.report(Error::Store(e));
                    }
                }
            }
        }
        true
    }
}

#[async_trait]
impl TriggerWatcher for EventTriggerWatcher {
    fn trigger(&self) -> &Trigger {
        &self.trigger
    }

    async fn start(&self, cancel: CancellationToken) {
        let _stopped = self.baseline.stop_guard();
        let trigger_id = self.trigger.id;

        let settings = match self.load_event_settings() {
            Ok(settings) => settings,
            Err(e) => {
                warn!(trigger_id, error = %e, "Event trigger rejected");
                self.errors.report(e);
                return;
            }
        };

        let listener = StreamListener::new(
            self.streamer.clone(),
            vec![settings.event_type],
            self.listener_capacity,
        );

        if let Some(mut state) = self.load_state(&cancel).await {
            let mut baseline = self.baseline.subscribe();
            info!(
                trigger_id,
                event_type = %settings.event_type,
                counter = state.counter,
                max_occurrence = settings.max_occurrence,
                "Event trigger watcher started"
            );

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    changed = baseline.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let last_executed = *baseline.borrow_and_update();
                        debug!(trigger_id, %last_executed, "Adopted new baseline");
                    }
                    event = listener.recv() => {
                        if !self.on_event(event, &settings, &mut state, &cancel).await {
                            break;
                        }
                    }
                }
            }
        }

        if let Err(e) = listener.close() {
            self.errors.report(Error::Stream(e));
        }
        info!(trigger_id, "Event trigger watcher stopped");
    }

    fn update_last_executed(&self, at: DateTime<Utc>) -> Result<()> {
        self.baseline.update(at)
    }
}
