//! Rule definitions and result history

use std::collections::HashMap;

use parking_lot::{Mutex, RwLock};

use super::history::BoundedHistory;
use super::result::MonitorResult;
use super::rule::Rule;

/// Rules by name plus a bounded history of results
///
/// Each structure has its own lock; no lock is held across an await point.
pub struct RuleStore {
    rules: RwLock<HashMap<String, Rule>>,
    results: Mutex<BoundedHistory<MonitorResult>>,
}

impl RuleStore {
    pub fn new(history_limit: usize) -> Self {
        Self {
            rules: RwLock::new(HashMap::new()),
            results: Mutex::new(BoundedHistory::new(history_limit)),
        }
    }

    /// Add a rule, replacing any rule of the same name
    pub fn insert(&self, rule: Rule) -> Option<Rule> {
        let mut rules = self.rules.write();
        let previous = rules.insert(rule.name.clone(), rule);
        if let Some(ref old) = previous {
            tracing::warn!(rule = %old.name, "Rule already exists, overwriting");
        }
        previous
    }

    pub fn remove(&self, name: &str) -> Option<Rule> {
        self.rules.write().remove(name)
    }

    pub fn get(&self, name: &str) -> Option<Rule> {
        self.rules.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.rules.read().contains_key(name)
    }

    /// All rules, sorted by name
    pub fn list(&self) -> Vec<Rule> {
        let mut rules: Vec<Rule> = self.rules.read().values().cloned().collect();
        rules.sort_by(|a, b| a.name.cmp(&b.name));
        rules
    }

    pub fn record(&self, result: MonitorResult) {
        self.results.lock().push(result);
    }

    /// The last `limit` results, optionally for one rule, oldest first
    pub fn results(&self, rule_name: Option<&str>, limit: usize) -> Vec<MonitorResult> {
        let results = self.results.lock();
        match rule_name {
            Some(name) => results.recent_matching(limit, |r| r.rule_name == name),
            None => results.recent(limit),
        }
    }

    pub fn result_count(&self) -> usize {
        self.results.lock().len()
    }
}

impl Default for RuleStore {
    fn default() -> Self {
        Self::new(super::history::DEFAULT_HISTORY_LIMIT)
    }
}
