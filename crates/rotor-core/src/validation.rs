//! Model validation
//!
//! Trigger watchers validate their trigger before decoding it. The hosting
//! shell also runs rule and target validation before persisting changes.

use crate::models::{ActionType, EventType, Rule, Target, TargetType, Trigger};
use crate::settings::{SettingsError, TriggerSettings};

/// Validation failures
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// Trigger settings could not be decoded or parsed
    #[error("trigger {trigger_id}: {source}")]
    Settings {
        /// Offending trigger
        trigger_id: i64,
        /// Decoding failure
        #[source]
        source: SettingsError,
    },
    /// Event trigger budget must be positive
    #[error("trigger {trigger_id}: max occurrence must be greater than 0")]
    ZeroMaxOccurrence {
        /// Offending trigger
        trigger_id: i64,
    },
    /// Event trigger counts an unknown event kind
    #[error("trigger {trigger_id}: unsupported event type")]
    UnsupportedEventType {
        /// Offending trigger
        trigger_id: i64,
    },
    /// Rule description is blank
    #[error("rule {rule_id}: description is required")]
    MissingDescription {
        /// Offending rule
        rule_id: i64,
    },
    /// Rule action is not supported
    #[error("rule {rule_id}: unsupported action type")]
    UnsupportedActionType {
        /// Offending rule
        rule_id: i64,
    },
    /// Target type is not supported
    #[error("target {target_id}: unsupported target type")]
    UnsupportedTargetType {
        /// Offending target
        target_id: i64,
    },
    /// Target expression is blank
    #[error("target {target_id}: expression is required")]
    EmptyTargetExpr {
        /// Offending target
        target_id: i64,
    },
}

/// Validates models before they are watched or persisted.
pub trait Validator: Send + Sync {
    /// Check that a trigger's settings decode and make sense for its type.
    fn validate_trigger(&self, trigger: &Trigger) -> Result<(), ValidationError>;

    /// Check a target.
    fn validate_target(&self, target: &Target) -> Result<(), ValidationError>;

    /// Check a rule together with its triggers and targets.
    fn validate_rule(&self, rule: &Rule) -> Result<(), ValidationError> {
        if rule.description.trim().is_empty() {
            return Err(ValidationError::MissingDescription { rule_id: rule.id });
        }
        if rule.action_type == ActionType::Unsupported {
            return Err(ValidationError::UnsupportedActionType { rule_id: rule.id });
        }
        for trigger in &rule.triggers {
            self.validate_trigger(trigger)?;
        }
        for target in &rule.targets {
            self.validate_target(target)?;
        }
        Ok(())
    }
}

/// Default validator
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelValidator;

impl ModelValidator {
    /// Create a validator
    pub fn new() -> Self {
        Self
    }
}

impl Validator for ModelValidator {
    fn validate_trigger(&self, trigger: &Trigger) -> Result<(), ValidationError> {
        let settings_err = |source| ValidationError::Settings {
            trigger_id: trigger.id,
            source,
        };

        match TriggerSettings::decode(trigger).map_err(settings_err)? {
            TriggerSettings::TimeInterval(s) => {
                s.schedule().map_err(settings_err)?;
            }
            TriggerSettings::Event(s) => {
                if s.event_type == EventType::Unsupported {
                    return Err(ValidationError::UnsupportedEventType {
                        trigger_id: trigger.id,
                    });
                }
                if s.max_occurrence == 0 {
                    return Err(ValidationError::ZeroMaxOccurrence {
                        trigger_id: trigger.id,
                    });
                }
            }
        }
        Ok(())
    }

    fn validate_target(&self, target: &Target) -> Result<(), ValidationError> {
        if target.target_type == TargetType::Unsupported {
            return Err(ValidationError::UnsupportedTargetType {
                target_id: target.id,
            });
        }
        if target.expr.trim().is_empty() {
            return Err(ValidationError::EmptyTargetExpr {
                target_id: target.id,
            });
        }
        Ok(())
    }
}
