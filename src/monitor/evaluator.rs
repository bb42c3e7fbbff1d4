//! Rule evaluation
//!
//! Each check kind is a [`Check`] registered with the [`Evaluator`]. Checks
//! talk to the collaborators and return raw metrics; the evaluator shapes
//! them into a [`MonitorResult`], absorbing collaborator failures (and
//! panics) into failed results.

use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;

use super::result::{diff_percent, MonitorResult};
use super::rule::{CheckKind, Rule};
use super::threshold::is_triggered;
use super::MonitorError;
use crate::source::{Connector, DiffAlgorithm, DiffEngine, Schema, SourceError, TableRef};

/// Collaborators a check may call
#[derive(Clone)]
pub struct Collaborators {
    pub connector: Arc<dyn Connector>,
    pub diff_engine: Arc<dyn DiffEngine>,
}

/// Raw metrics produced by a check
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Measurement {
    pub diff_count: u64,
    pub diff_percent: f64,
    pub row_count_a: u64,
    pub row_count_b: u64,
    pub stats: serde_json::Map<String, serde_json::Value>,
}

/// One kind of consistency check
#[async_trait]
pub trait Check: Send + Sync {
    async fn run(&self, rule: &Rule, with: &Collaborators) -> Result<Measurement, SourceError>;
}

/// Row-level comparison through the diff engine
pub struct DataDiffCheck;

#[async_trait]
impl Check for DataDiffCheck {
    async fn run(&self, rule: &Rule, with: &Collaborators) -> Result<Measurement, SourceError> {
        tracing::info!(rule = %rule.name, "Running data diff check");

        let side_a = rule.side_a();
        let side_b = TableRef {
            locator: rule.source_b.clone().unwrap_or_else(|| side_a.locator.clone()),
            table: rule.table_b.clone().unwrap_or_else(|| side_a.table.clone()),
            ..side_a.clone()
        };
        let algorithm = if side_a.locator != side_b.locator {
            DiffAlgorithm::HashDiff
        } else {
            DiffAlgorithm::JoinDiff
        };

        let a = with.connector.connect(&side_a).await?;
        let b = with.connector.connect(&side_b).await?;
        let stats = with
            .diff_engine
            .diff(a, b, algorithm, &rule.extra_columns)
            .await?;

        Ok(Measurement {
            diff_count: stats.total,
            diff_percent: diff_percent(stats.total, stats.rows_a, stats.rows_b),
            row_count_a: stats.rows_a,
            row_count_b: stats.rows_b,
            stats: stats.into_payload(),
        })
    }
}

/// Row counts of both sides, no diff engine involved
pub struct RowCountCheck;

#[async_trait]
impl Check for RowCountCheck {
    async fn run(&self, rule: &Rule, with: &Collaborators) -> Result<Measurement, SourceError> {
        tracing::info!(rule = %rule.name, "Running row count check");

        let row_count_a = with.connector.connect(&rule.side_a()).await?.row_count().await?;
        let row_count_b = match rule.side_b() {
            Some(side_b) => with.connector.connect(&side_b).await?.row_count().await?,
            None => 0,
        };
        let diff_count = row_count_a.abs_diff(row_count_b);

        Ok(Measurement {
            diff_count,
            diff_percent: diff_percent(diff_count, row_count_a, row_count_b),
            row_count_a,
            row_count_b,
            stats: serde_json::Map::new(),
        })
    }
}

/// Added, removed and retyped columns between both sides
pub struct SchemaChangeCheck;

#[async_trait]
impl Check for SchemaChangeCheck {
    async fn run(&self, rule: &Rule, with: &Collaborators) -> Result<Measurement, SourceError> {
        tracing::info!(rule = %rule.name, "Running schema change check");

        let schema_a = with.connector.connect(&rule.side_a()).await?.schema().await?;
        let schema_b = match rule.side_b() {
            Some(side_b) => with.connector.connect(&side_b).await?.schema().await?,
            None => Schema::new(),
        };

        let changes = SchemaChanges::between(&schema_a, &schema_b);
        let mut stats = serde_json::Map::new();
        stats.insert("added_columns".to_string(), changes.added.iter().cloned().collect());
        stats.insert("removed_columns".to_string(), changes.removed.iter().cloned().collect());
        stats.insert("type_changes".to_string(), changes.retyped.iter().cloned().collect());

        Ok(Measurement {
            diff_count: changes.count(),
            stats,
            ..Measurement::default()
        })
    }
}

/// Column differences between two schemas
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SchemaChanges {
    /// In B but not A
    pub added: BTreeSet<String>,
    /// In A but not B
    pub removed: BTreeSet<String>,
    /// In both with a different declared type
    pub retyped: BTreeSet<String>,
}

impl SchemaChanges {
    pub fn between(a: &Schema, b: &Schema) -> Self {
        let mut changes = Self::default();
        for (column, ty) in a {
            match b.get(column) {
                None => {
                    changes.removed.insert(column.clone());
                }
                Some(other) if other != ty => {
                    changes.retyped.insert(column.clone());
                }
                Some(_) => {}
            }
        }
        changes.added = b
            .keys()
            .filter(|c| !a.contains_key(*c))
            .cloned()
            .collect();
        changes
    }

    pub fn count(&self) -> u64 {
        (self.added.len() + self.removed.len() + self.retyped.len()) as u64
    }
}

/// Runs rules against the registered checks
pub struct Evaluator {
    collaborators: Collaborators,
    checks: HashMap<CheckKind, Arc<dyn Check>>,
}

impl Evaluator {
    /// Create an evaluator with the built-in checks registered
    pub fn new(connector: Arc<dyn Connector>, diff_engine: Arc<dyn DiffEngine>) -> Self {
        let mut checks: HashMap<CheckKind, Arc<dyn Check>> = HashMap::new();
        checks.insert(CheckKind::DataDiff, Arc::new(DataDiffCheck));
        checks.insert(CheckKind::RowCount, Arc::new(RowCountCheck));
        checks.insert(CheckKind::SchemaChange, Arc::new(SchemaChangeCheck));

        Self {
            collaborators: Collaborators {
                connector,
                diff_engine,
            },
            checks,
        }
    }

    /// Register (or replace) the check used for `kind`
    pub fn with_check(mut self, kind: CheckKind, check: Arc<dyn Check>) -> Self {
        self.checks.insert(kind, check);
        self
    }

    /// Unregister the check used for `kind`
    pub fn without_check(mut self, kind: CheckKind) -> Self {
        self.checks.remove(&kind);
        self
    }

    pub fn supports(&self, kind: CheckKind) -> bool {
        self.checks.contains_key(&kind)
    }

    /// Evaluate a rule
    ///
    /// Disabled rules produce a successful, untriggered result without
    /// touching any collaborator. Collaborator failures become failed
    /// results; only an unsupported check kind is returned as an error.
    pub async fn evaluate(&self, rule: &Rule) -> Result<MonitorResult, MonitorError> {
        if !rule.enabled {
            tracing::info!(rule = %rule.name, "Rule is disabled, skipping");
            return Ok(MonitorResult::empty(&rule.name));
        }

        let check = self
            .checks
            .get(&rule.check)
            .cloned()
            .ok_or(MonitorError::UnsupportedCheck(rule.check))?;

        let start = Instant::now();
        let outcome = AssertUnwindSafe(check.run(rule, &self.collaborators))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(SourceError::Panicked(panic_message(panic))));

        let mut result = match outcome {
            Ok(m) => MonitorResult {
                diff_count: m.diff_count,
                diff_percent: m.diff_percent,
                row_count_a: m.row_count_a,
                row_count_b: m.row_count_b,
                stats: m.stats,
                ..MonitorResult::empty(&rule.name)
            },
            Err(e) => {
                tracing::error!(rule = %rule.name, error = %e, "Rule evaluation failed");
                MonitorResult::failed(&rule.name, e.to_string())
            }
        };

        result.triggered = is_triggered(rule, &result);
        result.timestamp = Utc::now();
        result.duration_secs = start.elapsed().as_secs_f64();

        Ok(result)
    }
}

pub(crate) fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
