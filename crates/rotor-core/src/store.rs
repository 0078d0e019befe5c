//! Persistence collaborators
//!
//! The relational store lives outside this crate; watchers only see the two
//! narrow traits below. In-memory implementations are provided for embedders
//! without a database and for tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use tokio::sync::RwLock;

use crate::models::{Rule, TriggerState};

/// Persistence errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// Record does not exist
    #[error("record not found: {0}")]
    NotFound(String),
    /// Backend failure
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Loads rules and writes back rule state changed by watchers.
#[async_trait]
pub trait RuleWriter: Send + Sync {
    /// Load every rule with its triggers and targets.
    async fn all(&self) -> Result<Vec<Rule>, StoreError>;

    /// Persist a rule.
    async fn save(&self, rule: &Rule) -> Result<(), StoreError>;
}

/// Loads and saves event trigger occurrence counters.
#[async_trait]
pub trait TriggerStateService: Send + Sync {
    /// State of a trigger; a zero state when none was persisted yet.
    async fn by_trigger_id(&self, trigger_id: i64) -> Result<TriggerState, StoreError>;

    /// Persist a trigger state, keyed by its trigger ID.
    async fn save(&self, state: &TriggerState) -> Result<(), StoreError>;
}

/// In-memory rule store
#[derive(Debug, Default)]
pub struct MemoryRuleStore {
    rules: RwLock<Vec<Rule>>,
    saves: AtomicUsize,
}

impl MemoryRuleStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding the given rules
    pub fn with_rules(rules: Vec<Rule>) -> Self {
        Self {
            rules: RwLock::new(rules),
            saves: AtomicUsize::new(0),
        }
    }

    /// Get a rule by ID
    pub async fn get(&self, rule_id: i64) -> Option<Rule> {
        self.rules
            .read()
            .await
            .iter()
            .find(|r| r.id == rule_id)
            .cloned()
    }

    /// Remove a rule, returning it if present
    pub async fn delete(&self, rule_id: i64) -> Option<Rule> {
        let mut rules = self.rules.write().await;
        let pos = rules.iter().position(|r| r.id == rule_id)?;
        Some(rules.remove(pos))
    }

    /// Number of `save` calls served
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RuleWriter for MemoryRuleStore {
    async fn all(&self) -> Result<Vec<Rule>, StoreError> {
        Ok(self.rules.read().await.clone())
    }

    async fn save(&self, rule: &Rule) -> Result<(), StoreError> {
        let mut rules = self.rules.write().await;
        match rules.iter_mut().find(|r| r.id == rule.id) {
            Some(existing) => *existing = rule.clone(),
            None => rules.push(rule.clone()),
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// In-memory trigger state store
#[derive(Debug, Default)]
pub struct MemoryTriggerStateStore {
    states: RwLock<HashMap<i64, TriggerState>>,
    next_id: AtomicI64,
}

impl MemoryTriggerStateStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Persisted state of a trigger, if any
    pub async fn get(&self, trigger_id: i64) -> Option<TriggerState> {
        self.states.read().await.get(&trigger_id).cloned()
    }
}

#[async_trait]
impl TriggerStateService for MemoryTriggerStateStore {
    async fn by_trigger_id(&self, trigger_id: i64) -> Result<TriggerState, StoreError> {
        Ok(self
            .states
            .read()
            .await
            .get(&trigger_id)
            .cloned()
            .unwrap_or_else(|| TriggerState::new(trigger_id)))
    }

    async fn save(&self, state: &TriggerState) -> Result<(), StoreError> {
        let mut states = self.states.write().await;
        let id = match states.get(&state.trigger_id) {
            Some(existing) => existing.id,
            None if state.id != 0 => state.id,
            None => self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
        };
        states.insert(
            state.trigger_id,
            TriggerState {
                id,
                trigger_id: state.trigger_id,
                counter: state.counter,
            },
        );
        Ok(())
    }
}
