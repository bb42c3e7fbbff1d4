//! Rule store, evaluation and threshold decisions
//!
//! [`Monitor`] ties the pieces together: it owns the rule store and the
//! evaluator, records every result it produces and reports configuration
//! errors to the caller.

pub mod evaluator;
pub mod history;
pub mod result;
pub mod rule;
pub mod store;
pub mod threshold;

use std::sync::Arc;

pub use evaluator::{Check, Collaborators, Evaluator, Measurement, SchemaChanges};
pub use history::{BoundedHistory, DEFAULT_HISTORY_LIMIT};
pub use result::MonitorResult;
pub use rule::{CheckKind, Rule, ThresholdKind, ThresholdOperator};
pub use store::RuleStore;
pub use threshold::is_triggered;

use crate::source::{Connector, DiffEngine};

/// Rules, their evaluation and their results
pub struct Monitor {
    store: RuleStore,
    evaluator: Evaluator,
}

impl Monitor {
    pub fn new(connector: Arc<dyn Connector>, diff_engine: Arc<dyn DiffEngine>) -> Self {
        Self::with_evaluator(Evaluator::new(connector, diff_engine), DEFAULT_HISTORY_LIMIT)
    }

    pub fn with_evaluator(evaluator: Evaluator, history_limit: usize) -> Self {
        Self {
            store: RuleStore::new(history_limit),
            evaluator,
        }
    }

    /// Add or replace a rule
    ///
    /// Replacing an existing rule only logs a warning. Rules that could never
    /// run (no key columns, bad cron expression, unsupported check) are
    /// rejected.
    pub fn add_rule(&self, rule: Rule) -> Result<Option<Rule>, MonitorError> {
        rule.validate()?;
        if !self.evaluator.supports(rule.check) {
            return Err(MonitorError::UnsupportedCheck(rule.check));
        }

        tracing::info!(rule = %rule.name, check = %rule.check, "Adding rule");
        Ok(self.store.insert(rule))
    }

    /// Remove a rule, returning whether it existed
    pub fn remove_rule(&self, name: &str) -> bool {
        let removed = self.store.remove(name).is_some();
        if removed {
            tracing::info!(rule = %name, "Removed rule");
        }
        removed
    }

    pub fn get_rule(&self, name: &str) -> Option<Rule> {
        self.store.get(name)
    }

    pub fn list_rules(&self) -> Vec<Rule> {
        self.store.list()
    }

    /// Evaluate a rule by name and record the result
    pub async fn run_rule(&self, name: &str) -> Result<MonitorResult, MonitorError> {
        let rule = self
            .store
            .get(name)
            .ok_or_else(|| MonitorError::RuleNotFound(name.to_string()))?;
        self.run(&rule).await
    }

    /// Evaluate a rule snapshot and record the result
    pub async fn run(&self, rule: &Rule) -> Result<MonitorResult, MonitorError> {
        let result = self.evaluator.evaluate(rule).await?;
        self.store.record(result.clone());
        Ok(result)
    }

    /// The last `limit` results, optionally for one rule, oldest first
    pub fn results(&self, rule_name: Option<&str>, limit: usize) -> Vec<MonitorResult> {
        self.store.results(rule_name, limit)
    }
}

/// Configuration errors reported to the caller
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("Rule not found: {0}")]
    RuleNotFound(String),

    #[error("Unsupported check kind: {0}")]
    UnsupportedCheck(CheckKind),

    #[error("Invalid schedule for rule '{rule}': {message}")]
    InvalidSchedule { rule: String, message: String },

    #[error("Invalid rule: {0}")]
    InvalidRule(String),
}
