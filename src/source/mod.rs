//! Data-source collaborators
//!
//! The monitor never talks to databases directly. It asks a [`Connector`]
//! for table handles and hands pairs of handles to a [`DiffEngine`].

pub mod memory;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use memory::MemoryCatalog;

/// Column name to declared type
pub type Schema = BTreeMap<String, String>;

/// Everything needed to open one side of a comparison
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    /// Source locator (connection string, DSN, catalog name...)
    pub locator: String,
    pub table: String,
    pub key_columns: Vec<String>,
    pub update_column: Option<String>,
    pub extra_columns: Vec<String>,
}

impl TableRef {
    pub fn new(locator: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            table: table.into(),
            key_columns: vec!["id".to_string()],
            update_column: None,
            extra_columns: Vec::new(),
        }
    }

    pub fn with_key_columns(mut self, key_columns: Vec<String>) -> Self {
        self.key_columns = key_columns;
        self
    }
}

/// Handle to one table in one source
#[async_trait]
pub trait DataSource: Send + Sync {
    /// The reference this handle was opened from
    fn table_ref(&self) -> &TableRef;

    async fn row_count(&self) -> Result<u64, SourceError>;

    async fn schema(&self) -> Result<Schema, SourceError>;
}

/// Opens table handles
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, table: &TableRef) -> Result<Arc<dyn DataSource>, SourceError>;
}

/// Comparison strategy handed to the diff engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffAlgorithm {
    /// Segment hashing, works across sources
    HashDiff,
    /// Outer join, requires both tables in one source
    JoinDiff,
}

/// Row-level comparison between two handles
#[async_trait]
pub trait DiffEngine: Send + Sync {
    async fn diff(
        &self,
        a: Arc<dyn DataSource>,
        b: Arc<dyn DataSource>,
        algorithm: DiffAlgorithm,
        extra_columns: &[String],
    ) -> Result<DiffStats, SourceError>;
}

/// Statistics returned by a diff engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiffStats {
    pub total: u64,
    #[serde(rename = "rows_A")]
    pub rows_a: u64,
    #[serde(rename = "rows_B")]
    pub rows_b: u64,
    /// Engine-specific fields, preserved verbatim
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl DiffStats {
    /// Flatten into the free-form payload stored on a result
    pub fn into_payload(self) -> serde_json::Map<String, serde_json::Value> {
        let mut payload = self.extra;
        payload.insert("total".to_string(), self.total.into());
        payload.insert("rows_A".to_string(), self.rows_a.into());
        payload.insert("rows_B".to_string(), self.rows_b.into());
        payload
    }
}

/// Collaborator errors
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Connection failed for {locator}: {message}")]
    Connection { locator: String, message: String },

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Diff failed: {0}")]
    Diff(String),

    #[error("Collaborator panicked: {0}")]
    Panicked(String),
}
