use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::trigger::{emit, load_settings, Baseline, TriggerWatcher};
use crate::error::{Error, Result};
use crate::models::{Trigger, TriggerEvent};
use crate::reporter::ErrorReporter;
use crate::settings::TriggerSettings;
use crate::validation::Validator;

/// Watches a time interval trigger.
///
/// Only the single next occurrence after the last execution is ever
/// scheduled; missed occurrences collapse into one immediate firing.
pub struct ScheduleTriggerWatcher {
    trigger: Trigger,
    validator: Arc<dyn Validator>,
    events: mpsc::Sender<TriggerEvent>,
    errors: ErrorReporter,
    baseline: Baseline,
}

impl ScheduleTriggerWatcher {
    /// Create a watcher starting from the given last execution time
    pub fn new(
        trigger: Trigger,
        last_executed: DateTime<Utc>,
        validator: Arc<dyn Validator>,
        events: mpsc::Sender<TriggerEvent>,
        errors: ErrorReporter,
    ) -> Self {
        let baseline = Baseline::new(trigger.id, last_executed);
        Self {
            trigger,
            validator,
            events,
            errors,
            baseline,
        }
    }

    fn load_schedule(&self) -> Result<Schedule> {
        match load_settings(&self.trigger, self.validator.as_ref())? {
            TriggerSettings::TimeInterval(settings) => {
                settings.schedule().map_err(|e| Error::InvalidTrigger {
                    trigger_id: self.trigger.id,
                    reason: e.to_string(),
                })
            }
            other => Err(Error::InvalidTrigger {
                trigger_id: self.trigger.id,
                reason: format!("expected time interval settings, got {}", other.trigger_type()),
            }),
        }
    }
}

#[async_trait]
impl TriggerWatcher for ScheduleTriggerWatcher {
    fn trigger(&self) -> &Trigger {
        &self.trigger
    }

    async fn start(&self, cancel: CancellationToken) {
        let _stopped = self.baseline.stop_guard();
        let trigger_id = self.trigger.id;

        let schedule = match self.load_schedule() {
            Ok(schedule) => schedule,
            Err(e) => {
                warn!(trigger_id, error = %e, "Schedule trigger rejected");
                self.errors.report(e);
                return;
            }
        };

        let mut baseline = self.baseline.subscribe();
        let mut last_executed = *baseline.borrow_and_update();
        info!(trigger_id, %last_executed, "Schedule trigger watcher started");

        loop {
            let next = schedule.after(&last_executed).next();
            let delay = next.map(|at| (at - Utc::now()).to_std().unwrap_or(Duration::ZERO));
            debug!(trigger_id, next = ?next, "Waiting for next occurrence");

            let elapsed = async {
                match delay {
                    Some(delay) => tokio::time::sleep(delay).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                changed = baseline.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    last_executed = *baseline.borrow_and_update();
                    debug!(trigger_id, %last_executed, "Adopted new baseline");
                }
                _ = elapsed => {
                    let now = Utc::now();
                    info!(trigger_id, time = %now, "Schedule trigger fired");
                    let event = TriggerEvent {
                        trigger: self.trigger.clone(),
                        time: now,
                    };
                    if !emit(&self.events, &cancel, event).await {
                        break;
                    }
                    last_executed = now;
                }
            }
        }

        info!(trigger_id, "Schedule trigger watcher stopped");
    }

    fn update_last_executed(&self, at: DateTime<Utc>) -> Result<()> {
        self.baseline.update(at)
    }
}
