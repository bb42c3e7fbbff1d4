//! Monitor rule definitions

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::MonitorError;
use crate::scheduler::CronSchedule;
use crate::source::TableRef;

/// What a rule checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    /// Row-level differences through the diff engine
    DataDiff,
    /// Row count of each side
    RowCount,
    /// Column set and declared types of each side
    SchemaChange,
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CheckKind::DataDiff => "data_diff",
            CheckKind::RowCount => "row_count",
            CheckKind::SchemaChange => "schema_change",
        };
        f.write_str(name)
    }
}

/// Metric a threshold applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdKind {
    DiffCount,
    DiffPercent,
    RowCountDiff,
}

/// Threshold comparison operator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThresholdOperator {
    #[default]
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
}

impl fmt::Display for ThresholdOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            ThresholdOperator::Gt => ">",
            ThresholdOperator::Gte => ">=",
            ThresholdOperator::Lt => "<",
            ThresholdOperator::Lte => "<=",
            ThresholdOperator::Eq => "==",
            ThresholdOperator::Ne => "!=",
        };
        f.write_str(op)
    }
}

/// A named consistency check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Unique rule name
    pub name: String,
    pub check: CheckKind,
    /// Side A source locator
    pub source_a: String,
    pub table_a: String,
    /// Side B source locator, defaults to side A's
    #[serde(default)]
    pub source_b: Option<String>,
    #[serde(default)]
    pub table_b: Option<String>,
    #[serde(default = "default_key_columns")]
    pub key_columns: Vec<String>,
    #[serde(default)]
    pub update_column: Option<String>,
    #[serde(default)]
    pub extra_columns: Vec<String>,
    #[serde(default)]
    pub threshold_kind: Option<ThresholdKind>,
    #[serde(default)]
    pub threshold_operator: ThresholdOperator,
    #[serde(default)]
    pub threshold_value: Option<f64>,
    /// Cron expression; rules without one only run on demand
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

fn default_key_columns() -> Vec<String> {
    vec!["id".to_string()]
}

fn default_enabled() -> bool {
    true
}

impl Rule {
    /// Create an enabled, unscheduled rule without a threshold
    pub fn new(
        name: impl Into<String>,
        check: CheckKind,
        source_a: impl Into<String>,
        table_a: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            check,
            source_a: source_a.into(),
            table_a: table_a.into(),
            source_b: None,
            table_b: None,
            key_columns: default_key_columns(),
            update_column: None,
            extra_columns: Vec::new(),
            threshold_kind: None,
            threshold_operator: ThresholdOperator::default(),
            threshold_value: None,
            schedule: None,
            enabled: true,
            description: None,
            tags: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// Compare against a table in another source
    pub fn with_target(mut self, source: impl Into<String>, table: impl Into<String>) -> Self {
        self.source_b = Some(source.into());
        self.table_b = Some(table.into());
        self
    }

    /// Compare against another table in side A's source
    pub fn with_table_b(mut self, table: impl Into<String>) -> Self {
        self.table_b = Some(table.into());
        self
    }

    pub fn with_key_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_update_column(mut self, column: impl Into<String>) -> Self {
        self.update_column = Some(column.into());
        self
    }

    pub fn with_extra_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_threshold(
        mut self,
        kind: ThresholdKind,
        operator: ThresholdOperator,
        value: f64,
    ) -> Self {
        self.threshold_kind = Some(kind);
        self.threshold_operator = operator;
        self.threshold_value = Some(value);
        self
    }

    pub fn with_schedule(mut self, schedule: impl Into<String>) -> Self {
        self.schedule = Some(schedule.into());
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Schedule expression, ignoring blank strings
    pub fn schedule_expr(&self) -> Option<&str> {
        self.schedule
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Side A of the comparison
    pub fn side_a(&self) -> TableRef {
        self.table_ref(&self.source_a, &self.table_a)
    }

    /// Side B resolved against side A's source when no locator is set
    pub fn side_b(&self) -> Option<TableRef> {
        self.table_b.as_ref().map(|table| {
            let source = self.source_b.as_deref().unwrap_or(&self.source_a);
            self.table_ref(source, table)
        })
    }

    fn table_ref(&self, source: &str, table: &str) -> TableRef {
        TableRef {
            locator: source.to_string(),
            table: table.to_string(),
            key_columns: self.key_columns.clone(),
            update_column: self.update_column.clone(),
            extra_columns: self.extra_columns.clone(),
        }
    }

    /// Reject rules that could never run
    pub fn validate(&self) -> Result<(), MonitorError> {
        if self.name.trim().is_empty() {
            return Err(MonitorError::InvalidRule("rule name is empty".to_string()));
        }
        if self.key_columns.is_empty() {
            return Err(MonitorError::InvalidRule(format!(
                "rule '{}' has no key columns",
                self.name
            )));
        }
        if let Some(expr) = self.schedule_expr() {
            CronSchedule::parse(expr).map_err(|e| MonitorError::InvalidSchedule {
                rule: self.name.clone(),
                message: e.to_string(),
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_builder() {
        let rule = Rule::new("orders", CheckKind::DataDiff, "pg://a", "orders")
            .with_target("mysql://b", "orders_copy")
            .with_threshold(ThresholdKind::DiffPercent, ThresholdOperator::Gt, 1.0)
            .with_schedule("0 */6 * * *")
            .with_update_column("updated_at")
            .with_extra_columns(["amount"])
            .with_tag("finance");

        assert_eq!(rule.key_columns, vec!["id"]);
        assert_eq!(rule.tags, vec!["finance"]);
        assert!(rule.enabled);
        assert_eq!(rule.schedule_expr(), Some("0 */6 * * *"));
        let side_b = rule.side_b().unwrap();
        assert_eq!(side_b.locator, "mysql://b");
        assert_eq!(side_b.update_column.as_deref(), Some("updated_at"));
        assert_eq!(side_b.extra_columns, vec!["amount"]);
    }

    #[test]
    fn test_side_b_falls_back_to_source_a() {
        let rule = Rule::new("dup", CheckKind::SchemaChange, "pg://a", "t1").with_table_b("t2");

        let side_b = rule.side_b().unwrap();
        assert_eq!(side_b.locator, "pg://a");
        assert_eq!(side_b.table, "t2");

        let rule = Rule::new("solo", CheckKind::RowCount, "pg://a", "t1");
        assert!(rule.side_b().is_none());
    }

    #[test]
    fn test_validate_rejects_bad_rules() {
        let rule = Rule::new("r", CheckKind::RowCount, "a", "t").with_key_columns(Vec::<String>::new());
        assert!(matches!(rule.validate(), Err(MonitorError::InvalidRule(_))));

        let rule = Rule::new("r", CheckKind::RowCount, "a", "t").with_schedule("not a cron");
        assert!(matches!(
            rule.validate(),
            Err(MonitorError::InvalidSchedule { .. })
        ));

        let rule = Rule::new("r", CheckKind::RowCount, "a", "t").with_schedule("   ");
        assert!(rule.validate().is_ok());
    }

    #[test]
    fn test_rule_deserialize_defaults() {
        let rule: Rule = serde_json::from_value(serde_json::json!({
            "name": "counts",
            "check": "row_count",
            "source_a": "db1",
            "table_a": "events",
            "threshold_kind": "row_count_diff",
            "threshold_operator": ">=",
            "threshold_value": 10.0
        }))
        .unwrap();

        assert_eq!(rule.check, CheckKind::RowCount);
        assert_eq!(rule.threshold_operator, ThresholdOperator::Gte);
        assert_eq!(rule.key_columns, vec!["id"]);
        assert!(rule.enabled);
        assert!(rule.schedule.is_none());
    }
}
