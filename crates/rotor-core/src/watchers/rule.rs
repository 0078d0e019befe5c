use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::factory::TriggerWatcherFactory;
use super::trigger::TriggerWatcher;
use crate::actions::ActionFactory;
use crate::error::Error;
use crate::models::{Rule, TriggerEvent};
use crate::reporter::ErrorReporter;
use crate::store::RuleWriter;

/// Supervises the trigger watchers of one rule.
///
/// Trigger events are handled one at a time, so a rule's action never runs
/// concurrently with itself. The watcher is the only writer of the rule's
/// last execution time.
pub struct RuleWatcher {
    rule: Rule,
    rule_writer: Arc<dyn RuleWriter>,
    trigger_factory: Arc<dyn TriggerWatcherFactory>,
    action_factory: Arc<dyn ActionFactory>,
    errors: ErrorReporter,
}

impl RuleWatcher {
    /// Create a watcher; nothing runs until [`RuleWatcher::start`]
    pub fn new(
        rule: Rule,
        rule_writer: Arc<dyn RuleWriter>,
        trigger_factory: Arc<dyn TriggerWatcherFactory>,
        action_factory: Arc<dyn ActionFactory>,
        errors: ErrorReporter,
    ) -> Self {
        Self {
            rule,
            rule_writer,
            trigger_factory,
            action_factory,
            errors,
        }
    }

    /// In-memory copy of the rule
    pub fn rule(&self) -> &Rule {
        &self.rule
    }

    /// Run until `cancel` fires.
    ///
    /// Trigger watchers run on a child token and are awaited before this
    /// returns.
    pub async fn start(&mut self, cancel: CancellationToken) {
        let rule_id = self.rule.id;
        if self.rule.triggers.is_empty() {
            info!(rule_id, "Rule has no triggers, not watching");
            return;
        }

        let (tx, mut rx) = mpsc::channel::<TriggerEvent>(1);
        let children = cancel.child_token();
        let baseline = self.rule.last_executed.unwrap_or_else(Utc::now);

        let mut watchers: Vec<Arc<dyn TriggerWatcher>> = Vec::new();
        let mut tasks = JoinSet::new();
        for trigger in &self.rule.triggers {
            let watcher =
                match self
                    .trigger_factory
                    .create(trigger, baseline, &self.rule.targets, tx.clone())
                {
                    Ok(watcher) => watcher,
                    Err(e) => {
                        warn!(rule_id, trigger_id = trigger.id, error = %e, "Skipping trigger");
                        self.errors.report(e);
                        continue;
                    }
                };

            let token = children.clone();
            let task_watcher = watcher.clone();
            tasks.spawn(async move { task_watcher.start(token).await });
            watchers.push(watcher);
        }
        // Only the trigger watchers hold senders from here on
        drop(tx);

        info!(rule_id, triggers = watchers.len(), "Rule watcher started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => self.on_trigger_event(event, &watchers, &cancel).await,
                    None => {
                        debug!(rule_id, "All trigger watchers stopped");
                        break;
                    }
                },
            }
        }

        children.cancel();
        drop(rx);
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(rule_id, error = %e, "Trigger watcher task failed");
            }
        }
        info!(rule_id, "Rule watcher stopped");
    }

    async fn on_trigger_event(
        &mut self,
        event: TriggerEvent,
        watchers: &[Arc<dyn TriggerWatcher>],
        cancel: &CancellationToken,
    ) {
        let rule_id = self.rule.id;
        info!(rule_id, trigger_id = event.trigger.id, time = %event.time, "Rule fired");

        self.rule.last_executed = Some(event.time);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            saved = self.rule_writer.save(&self.rule) => {
                if let Err(e) = saved {
                    warn!(rule_id, error = %e, "Failed to save rule");
                    self.errors.report(Error::Store(e));
                }
            }
        }

        for watcher in watchers {
            if let Err(e) = watcher.update_last_executed(event.time) {
                debug!(rule_id, trigger_id = watcher.trigger().id, error = %e, "Baseline not delivered");
                self.errors.report(e);
            }
        }

        let action = match self.action_factory.create(&self.rule) {
            Ok(action) => action,
            Err(e) => {
                warn!(rule_id, error = %e, "Cannot build action");
                self.errors.report(e);
                return;
            }
        };
        match action.execute(cancel).await {
            Ok(()) => debug!(rule_id, action = action.name(), "Action executed"),
            Err(e) if e.is_cancelled() => debug!(rule_id, "Action cancelled"),
            Err(e) => {
                warn!(rule_id, action = action.name(), error = %e, "Action failed");
                self.errors.report(e);
            }
        }
    }
}
