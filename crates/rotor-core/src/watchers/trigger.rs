use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::models::{Trigger, TriggerEvent};
use crate::settings::{SettingsError, TriggerSettings};
use crate::validation::Validator;

/// Decides when one trigger condition is satisfied and emits
/// [`TriggerEvent`]s to the owning rule watcher.
#[async_trait]
pub trait TriggerWatcher: Send + Sync {
    /// Trigger being watched
    fn trigger(&self) -> &Trigger;

    /// Watch until cancelled. Invalid settings are reported and stop only
    /// this watcher.
    async fn start(&self, cancel: CancellationToken);

    /// Adopt a new last-executed baseline without firing.
    ///
    /// Never blocks; the running watcher picks the value up at its next wait
    /// point. Fails once the watcher has stopped.
    fn update_last_executed(&self, at: DateTime<Utc>) -> Result<()>;
}

/// Last-executed baseline shared between a watcher and its rule watcher.
#[derive(Debug)]
pub(crate) struct Baseline {
    trigger_id: i64,
    tx: watch::Sender<DateTime<Utc>>,
    stopped: AtomicBool,
}

impl Baseline {
    pub(crate) fn new(trigger_id: i64, initial: DateTime<Utc>) -> Self {
        let (tx, _) = watch::channel(initial);
        Self {
            trigger_id,
            tx,
            stopped: AtomicBool::new(false),
        }
    }

    /// Receiver positioned at the current value
    pub(crate) fn subscribe(&self) -> watch::Receiver<DateTime<Utc>> {
        self.tx.subscribe()
    }

    pub(crate) fn update(&self, at: DateTime<Utc>) -> Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(Error::WatcherStopped {
                trigger_id: self.trigger_id,
            });
        }
        self.tx.send_replace(at);
        Ok(())
    }

    /// Marks the watcher stopped when dropped.
    pub(crate) fn stop_guard(&self) -> StopGuard<'_> {
        StopGuard(self)
    }
}

pub(crate) struct StopGuard<'a>(&'a Baseline);

impl Drop for StopGuard<'_> {
    fn drop(&mut self) {
        self.0.stopped.store(true, Ordering::SeqCst);
    }
}

/// Validate and decode a trigger's settings, mapping every failure to
/// [`Error::InvalidTrigger`].
pub(crate) fn load_settings(
    trigger: &Trigger,
    validator: &dyn Validator,
) -> Result<TriggerSettings> {
    let invalid = |reason: String| Error::InvalidTrigger {
        trigger_id: trigger.id,
        reason,
    };
    validator
        .validate_trigger(trigger)
        .map_err(|e| invalid(e.to_string()))?;
    TriggerSettings::decode(trigger).map_err(|e: SettingsError| invalid(e.to_string()))
}

/// Hand a trigger event to the rule watcher.
///
/// Waits until the rule watcher takes it, so at most one event per trigger
/// is in flight. Returns `false` if cancelled or the rule watcher is gone.
pub(crate) async fn emit(
    events: &mpsc::Sender<TriggerEvent>,
    cancel: &CancellationToken,
    event: TriggerEvent,
) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = events.send(event) => sent.is_ok(),
    }
}
