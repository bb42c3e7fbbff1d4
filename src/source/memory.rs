//! In-process tables
//!
//! Serves both collaborator roles: it opens handles to tables loaded into it
//! and compares two of its own tables row by row on their key columns.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{
    Connector, DataSource, DiffAlgorithm, DiffEngine, DiffStats, Schema, SourceError, TableRef,
};

pub type Row = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Default)]
struct MemoryTable {
    schema: Schema,
    rows: Vec<Row>,
}

/// Tables keyed by (locator, table name)
#[derive(Debug, Clone, Default)]
pub struct MemoryCatalog {
    tables: Arc<DashMap<(String, String), MemoryTable>>,
    connects: Arc<AtomicUsize>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load (or replace) a table
    pub fn load(
        &self,
        locator: impl Into<String>,
        table: impl Into<String>,
        schema: Schema,
        rows: Vec<Row>,
    ) {
        self.tables
            .insert((locator.into(), table.into()), MemoryTable { schema, rows });
    }

    /// Drop a table, returning whether it existed
    pub fn drop_table(&self, locator: &str, table: &str) -> bool {
        self.tables
            .remove(&(locator.to_string(), table.to_string()))
            .is_some()
    }

    /// List (locator, table, row count) triples
    pub fn list_tables(&self) -> Vec<(String, String, usize)> {
        let mut tables: Vec<_> = self
            .tables
            .iter()
            .map(|e| (e.key().0.clone(), e.key().1.clone(), e.value().rows.len()))
            .collect();
        tables.sort();
        tables
    }

    /// Number of handles opened so far
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    fn snapshot(&self, table: &TableRef) -> Result<MemoryTable, SourceError> {
        self.tables
            .get(&(table.locator.clone(), table.table.clone()))
            .map(|t| t.value().clone())
            .ok_or_else(|| {
                SourceError::TableNotFound(format!("{}/{}", table.locator, table.table))
            })
    }
}

struct MemoryHandle {
    table: TableRef,
    catalog: MemoryCatalog,
}

#[async_trait]
impl DataSource for MemoryHandle {
    fn table_ref(&self) -> &TableRef {
        &self.table
    }

    async fn row_count(&self) -> Result<u64, SourceError> {
        Ok(self.catalog.snapshot(&self.table)?.rows.len() as u64)
    }

    async fn schema(&self) -> Result<Schema, SourceError> {
        Ok(self.catalog.snapshot(&self.table)?.schema)
    }
}

#[async_trait]
impl Connector for MemoryCatalog {
    async fn connect(&self, table: &TableRef) -> Result<Arc<dyn DataSource>, SourceError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        // Fail at connect time like a real source would for a missing table
        self.snapshot(table)?;
        Ok(Arc::new(MemoryHandle {
            table: table.clone(),
            catalog: self.clone(),
        }))
    }
}

#[async_trait]
impl DiffEngine for MemoryCatalog {
    async fn diff(
        &self,
        a: Arc<dyn DataSource>,
        b: Arc<dyn DataSource>,
        algorithm: DiffAlgorithm,
        extra_columns: &[String],
    ) -> Result<DiffStats, SourceError> {
        let a_ref = a.table_ref();
        let b_ref = b.table_ref();

        if algorithm == DiffAlgorithm::JoinDiff && a_ref.locator != b_ref.locator {
            return Err(SourceError::Diff(
                "join diff requires both tables in the same source".to_string(),
            ));
        }

        let left = self.snapshot(a_ref)?;
        let right = self.snapshot(b_ref)?;
        let keys = &a_ref.key_columns;

        let left_rows = index_rows(&left.rows, keys);
        let right_rows = index_rows(&right.rows, keys);

        let mut exclusive_a = 0u64;
        let mut updated = 0u64;
        let mut unchanged = 0u64;

        for (key, row) in &left_rows {
            match right_rows.get(key) {
                None => exclusive_a += 1,
                Some(other) if rows_differ(row, other, keys, extra_columns) => updated += 1,
                Some(_) => unchanged += 1,
            }
        }
        let exclusive_b = right_rows
            .keys()
            .filter(|k| !left_rows.contains_key(*k))
            .count() as u64;

        let mut extra = serde_json::Map::new();
        extra.insert("exclusive_A".to_string(), exclusive_a.into());
        extra.insert("exclusive_B".to_string(), exclusive_b.into());
        extra.insert("updated".to_string(), updated.into());
        extra.insert("unchanged".to_string(), unchanged.into());

        Ok(DiffStats {
            total: exclusive_a + exclusive_b + updated,
            rows_a: left.rows.len() as u64,
            rows_b: right.rows.len() as u64,
            extra,
        })
    }
}

fn index_rows<'a>(rows: &'a [Row], keys: &[String]) -> BTreeMap<String, &'a Row> {
    rows.iter()
        .map(|row| {
            let key = keys
                .iter()
                .map(|k| row.get(k).map(|v| v.to_string()).unwrap_or_default())
                .collect::<Vec<_>>()
                .join("|");
            (key, row)
        })
        .collect()
}

/// Compare the extra columns, or every non-key column when none are given
fn rows_differ(a: &Row, b: &Row, keys: &[String], extra_columns: &[String]) -> bool {
    if extra_columns.is_empty() {
        let a_cols = a.iter().filter(|(k, _)| !keys.contains(*k));
        let b_cols = b.iter().filter(|(k, _)| !keys.contains(*k));
        !a_cols.eq(b_cols)
    } else {
        extra_columns.iter().any(|c| a.get(c) != b.get(c))
    }
}
