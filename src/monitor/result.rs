use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of one rule evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorResult {
    pub rule_name: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub diff_count: u64,
    pub diff_percent: f64,
    pub row_count_a: u64,
    pub row_count_b: u64,
    /// Free-form statistics from the check
    pub stats: serde_json::Map<String, serde_json::Value>,
    pub error: Option<String>,
    pub duration_secs: f64,
    /// Whether the rule's threshold was breached
    pub triggered: bool,
}

impl MonitorResult {
    /// A successful run with zero metrics
    pub fn empty(rule_name: impl Into<String>) -> Self {
        Self {
            rule_name: rule_name.into(),
            timestamp: Utc::now(),
            success: true,
            diff_count: 0,
            diff_percent: 0.0,
            row_count_a: 0,
            row_count_b: 0,
            stats: serde_json::Map::new(),
            error: None,
            duration_secs: 0.0,
            triggered: false,
        }
    }

    /// A failed run carrying the collaborator's error text
    pub fn failed(rule_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::empty(rule_name)
        }
    }

    pub fn row_count_diff(&self) -> u64 {
        self.row_count_a.abs_diff(self.row_count_b)
    }
}

/// `diff_count` as a percentage of the larger side, 0 when both sides are empty
pub fn diff_percent(diff_count: u64, row_count_a: u64, row_count_b: u64) -> f64 {
    let rows = row_count_a.max(row_count_b);
    if rows == 0 {
        return 0.0;
    }
    diff_count as f64 / rows as f64 * 100.0
}
