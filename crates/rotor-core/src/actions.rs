//! Rule actions
//!
//! An [`Action`] is what a fired rule does to the outside world. The only
//! action today is key rotation against the C2 service.

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::c2::{hash_client_name, C2Client};
use crate::error::{Error, Result};
use crate::models::{ActionType, Rule, Target, TargetType};
use crate::reporter::ErrorReporter;

/// Operation performed when a rule fires
#[async_trait]
pub trait Action: Send + Sync {
    /// Action name, used in logs and errors
    fn name(&self) -> &str;

    /// Apply the action to every target.
    ///
    /// Per-target failures are reported and do not stop the remaining
    /// targets. Only cancellation ends execution early.
    async fn execute(&self, cancel: &CancellationToken) -> Result<()>;
}

/// Maps a rule's action type to a concrete [`Action`]
pub trait ActionFactory: Send + Sync {
    /// Build the action bound to the rule's current targets
    fn create(&self, rule: &Rule) -> Result<Box<dyn Action>>;
}

/// Default action factory backed by a C2 client
#[derive(Clone)]
pub struct DefaultActionFactory {
    c2: Arc<dyn C2Client>,
    errors: ErrorReporter,
}

impl DefaultActionFactory {
    /// Create a new factory
    pub fn new(c2: Arc<dyn C2Client>, errors: ErrorReporter) -> Self {
        Self { c2, errors }
    }
}

impl ActionFactory for DefaultActionFactory {
    fn create(&self, rule: &Rule) -> Result<Box<dyn Action>> {
        match rule.action_type {
            ActionType::KeyRotation => Ok(Box::new(KeyRotationAction::new(
                rule.id,
                rule.targets.clone(),
                self.c2.clone(),
                self.errors.clone(),
            ))),
            ActionType::Unsupported => Err(Error::UnsupportedActionType {
                rule_id: rule.id,
                action_type: rule.action_type,
            }),
        }
    }
}

/// Requests new keys for every client and topic target
pub struct KeyRotationAction {
    rule_id: i64,
    targets: Vec<Target>,
    c2: Arc<dyn C2Client>,
    errors: ErrorReporter,
}

impl KeyRotationAction {
    /// Action name
    pub const NAME: &'static str = "key rotation";

    /// Create a key rotation for the given targets
    pub fn new(
        rule_id: i64,
        targets: Vec<Target>,
        c2: Arc<dyn C2Client>,
        errors: ErrorReporter,
    ) -> Self {
        Self {
            rule_id,
            targets,
            c2,
            errors,
        }
    }

    async fn rotate(&self, target: &Target) -> Result<()> {
        match target.target_type {
            TargetType::Client => {
                let client_id = hash_client_name(&target.expr);
                self.c2.new_client_key(&client_id).await?;
            }
            TargetType::Topic => self.c2.new_topic_key(&target.expr).await?,
            other => {
                return Err(Error::UnsupportedTargetType {
                    action: Self::NAME.to_string(),
                    target_type: other.to_string(),
                    target_id: target.id,
                })
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Action for KeyRotationAction {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn execute(&self, cancel: &CancellationToken) -> Result<()> {
        let rule_id = self.rule_id;
        for target in &self.targets {
            let rotated = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                rotated = self.rotate(target) => rotated,
            };
            match rotated {
                Ok(()) => debug!(
                    rule_id,
                    target_id = target.id,
                    target = %target.expr,
                    "Key rotated"
                ),
                Err(e) => {
                    warn!(rule_id, target_id = target.id, error = %e, "Key rotation failed");
                    self.errors.report(e);
                }
            }
        }
        info!(rule_id, targets = self.targets.len(), "Key rotation completed");
        Ok(())
    }
}
