//! Automation engine
//!
//! Hosts the C2 event stream and one
//! [`RuleWatcher`](crate::watchers::RuleWatcher) per persisted rule. Rule
//! changes are never applied incrementally: a restart cancels the whole
//! generation of watchers and rebuilds it from the rule store.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::actions::DefaultActionFactory;
use crate::c2::C2Client;
use crate::config::EngineConfig;
use crate::error::Error;
use crate::events::{EventStreamer, StreamError};
use crate::models::Rule;
use crate::reporter::{log_errors, ErrorReporter};
use crate::store::{RuleWriter, TriggerStateService};
use crate::validation::{ModelValidator, Validator};
use crate::watchers::{DefaultTriggerWatcherFactory, RuleWatcherFactory};

/// Cloneable handle for requesting a rebuild of a running engine
#[derive(Debug, Clone)]
pub struct EngineHandle {
    restart: Arc<Notify>,
}

impl EngineHandle {
    /// Ask the engine to rebuild every watcher from the rule store.
    ///
    /// Call after any rule is added, updated or deleted. Requests made while
    /// a rebuild is pending collapse into one.
    pub fn request_restart(&self) {
        self.restart.notify_one();
    }
}

/// Runs rule watchers and the shared C2 event stream
pub struct AutomationEngine {
    config: EngineConfig,
    c2: Arc<dyn C2Client>,
    rule_writer: Arc<dyn RuleWriter>,
    trigger_states: Arc<dyn TriggerStateService>,
    streamer: Arc<EventStreamer>,
    rule_factory: RuleWatcherFactory,
    errors: ErrorReporter,
    error_rx: Mutex<Option<mpsc::UnboundedReceiver<Error>>>,
    restart: Arc<Notify>,
}

impl AutomationEngine {
    /// Create a new engine using the default [`ModelValidator`]
    pub fn new(
        config: EngineConfig,
        c2: Arc<dyn C2Client>,
        rule_writer: Arc<dyn RuleWriter>,
        trigger_states: Arc<dyn TriggerStateService>,
    ) -> Self {
        let (errors, error_rx) = ErrorReporter::channel();
        let streamer = Arc::new(EventStreamer::new(c2.clone()));
        let rule_factory = Self::build_rule_factory(
            &config,
            &c2,
            &rule_writer,
            &trigger_states,
            &streamer,
            Arc::new(ModelValidator::new()),
            &errors,
        );

        Self {
            config,
            c2,
            rule_writer,
            trigger_states,
            streamer,
            rule_factory,
            errors,
            error_rx: Mutex::new(Some(error_rx)),
            restart: Arc::new(Notify::new()),
        }
    }

    /// Replace the trigger validator
    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.rule_factory = Self::build_rule_factory(
            &self.config,
            &self.c2,
            &self.rule_writer,
            &self.trigger_states,
            &self.streamer,
            validator,
            &self.errors,
        );
        self
    }

    fn build_rule_factory(
        config: &EngineConfig,
        c2: &Arc<dyn C2Client>,
        rule_writer: &Arc<dyn RuleWriter>,
        trigger_states: &Arc<dyn TriggerStateService>,
        streamer: &Arc<EventStreamer>,
        validator: Arc<dyn Validator>,
        errors: &ErrorReporter,
    ) -> RuleWatcherFactory {
        let triggers = DefaultTriggerWatcherFactory::new(
            streamer.clone(),
            trigger_states.clone(),
            validator,
            errors.clone(),
        )
        .with_listener_capacity(config.listener_capacity);
        let actions = DefaultActionFactory::new(c2.clone(), errors.clone());
        RuleWatcherFactory::new(
            rule_writer.clone(),
            Arc::new(triggers),
            Arc::new(actions),
            errors.clone(),
        )
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Shared event streamer
    pub fn streamer(&self) -> &Arc<EventStreamer> {
        &self.streamer
    }

    /// Handle for requesting restarts from other tasks
    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            restart: self.restart.clone(),
        }
    }

    /// Rebuild every watcher from the rule store
    pub fn restart(&self) {
        self.handle().request_restart();
    }

    /// Take the error receiver to consume errors yourself.
    ///
    /// When not taken before [`AutomationEngine::run`], errors are logged.
    pub fn take_errors(&self) -> Option<mpsc::UnboundedReceiver<Error>> {
        self.error_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Run until `shutdown` is cancelled
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            listener_capacity = self.config.listener_capacity,
            "Automation engine starting"
        );

        let mut background = JoinSet::new();
        if let Some(rx) = self.take_errors() {
            background.spawn(log_errors(rx, shutdown.child_token()));
        }
        background.spawn(supervise_stream(
            self.streamer.clone(),
            shutdown.child_token(),
            self.config.stream_retry_delay(),
            self.errors.clone(),
        ));

        let mut generation: u64 = 0;
        loop {
            generation += 1;
            let token = shutdown.child_token();
            let watchers = self.start_generation(generation, &token).await;

            let restart = tokio::select! {
                biased;
                _ = shutdown.cancelled() => false,
                _ = self.restart.notified() => true,
            };

            token.cancel();
            self.drain(generation, watchers).await;
            if !restart {
                break;
            }
            info!(generation, "Rule set changed, rebuilding watchers");
        }

        self.drain(generation, background).await;
        info!("Automation engine stopped");
    }

    async fn load_rules(&self, cancel: &CancellationToken) -> Vec<Rule> {
        let loaded = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Vec::new(),
            loaded = self.rule_writer.all() => loaded,
        };
        match loaded {
            Ok(rules) => rules,
            Err(e) => {
                warn!(error = %e, "Failed to load rules");
                self.errors.report(Error::Store(e));
                Vec::new()
            }
        }
    }

    async fn start_generation(&self, generation: u64, cancel: &CancellationToken) -> JoinSet<()> {
        let rules = self.load_rules(cancel).await;
        let mut tasks = JoinSet::new();
        for rule in rules {
            let mut watcher = self.rule_factory.create(rule);
            let token = cancel.clone();
            tasks.spawn(async move { watcher.start(token).await });
        }
        info!(generation, rules = tasks.len(), "Rule watchers started");
        tasks
    }

    /// Wait for cancelled tasks, bounded by the shutdown timeout
    async fn drain(&self, generation: u64, mut tasks: JoinSet<()>) {
        let timeout = self.config.shutdown_timeout();
        let joined = tokio::time::timeout(timeout, async {
            while let Some(result) = tasks.join_next().await {
                if let Err(e) = result {
                    warn!(generation, error = %e, "Task failed");
                }
            }
        })
        .await;

        if joined.is_err() {
            warn!(
                generation,
                remaining = tasks.len(),
                timeout_secs = timeout.as_secs(),
                "Tasks did not stop in time, aborting"
            );
            tasks.abort_all();
        } else {
            debug!(generation, "All tasks stopped");
        }
    }
}

/// Keep the upstream subscription open, re-subscribing after `retry_delay`
/// whenever it ends for any reason other than cancellation.
async fn supervise_stream(
    streamer: Arc<EventStreamer>,
    cancel: CancellationToken,
    retry_delay: Duration,
    errors: ErrorReporter,
) {
    loop {
        match streamer.start_stream(cancel.clone()).await {
            Err(StreamError::Cancelled) => break,
            Ok(()) => warn!("C2 event stream ended"),
            Err(e) => {
                warn!(error = %e, "C2 event stream failed");
                errors.report(Error::Stream(e));
            }
        }

        debug!(delay_secs = retry_delay.as_secs(), "Re-subscribing to C2 event stream");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(retry_delay) => {}
        }
    }
    info!("C2 event stream supervisor stopped");
}

#[cfg(test)]
mod tests;
