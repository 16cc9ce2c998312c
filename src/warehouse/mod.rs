//! Warehouse module - read-only access to the data warehouse
//!
//! The agent never talks to BigQuery directly. Tools go through the
//! [`Warehouse`] trait so tests can substitute an in-memory warehouse and
//! count calls.

pub mod bigquery;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use bigquery::BigQueryClient;

/// One result row: column name to value, in column order
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Nullability of a column, taken from the BigQuery field mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldMode {
    Nullable,
    Required,
    Repeated,
}

impl FieldMode {
    /// Parse a BigQuery mode string; an absent mode means NULLABLE
    pub fn parse(mode: Option<&str>) -> Self {
        match mode.map(|m| m.to_ascii_uppercase()).as_deref() {
            Some("REQUIRED") => FieldMode::Required,
            Some("REPEATED") => FieldMode::Repeated,
            _ => FieldMode::Nullable,
        }
    }
}

impl std::fmt::Display for FieldMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldMode::Nullable => write!(f, "NULLABLE"),
            FieldMode::Required => write!(f, "REQUIRED"),
            FieldMode::Repeated => write!(f, "REPEATED"),
        }
    }
}

/// A single column of a table schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: String,
    pub mode: FieldMode,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, mode: FieldMode) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            mode,
        }
    }
}

/// Rows returned by a query, capped at the requested maximum
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub rows: Vec<Row>,
    /// Total rows produced by the query, which may exceed `rows.len()`
    pub total_rows: u64,
}

impl QueryResult {
    pub fn is_truncated(&self) -> bool {
        (self.rows.len() as u64) < self.total_rows
    }
}

/// Typed warehouse failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WarehouseError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Network, quota, rate limit or 5xx; a retry may succeed
    #[error("Transient warehouse error: {0}")]
    Transient(String),
}

/// Read-only operations against the warehouse
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Dataset ids visible in the configured project, in listing order
    async fn list_datasets(&self) -> Result<Vec<String>, WarehouseError>;

    /// Table ids inside a dataset, in listing order
    async fn list_tables(&self, dataset_id: &str) -> Result<Vec<String>, WarehouseError>;

    /// Column name, type and nullability for a table
    async fn get_table_schema(
        &self,
        dataset_id: &str,
        table_id: &str,
    ) -> Result<Vec<ColumnSchema>, WarehouseError>;

    /// Run a query, returning at most `max_rows` rows
    async fn run_query(&self, sql: &str, max_rows: usize) -> Result<QueryResult, WarehouseError>;

    /// Project the warehouse is bound to
    fn project_id(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_mode_parse() {
        assert_eq!(FieldMode::parse(None), FieldMode::Nullable);
        assert_eq!(FieldMode::parse(Some("required")), FieldMode::Required);
        assert_eq!(FieldMode::parse(Some("REPEATED")), FieldMode::Repeated);
        assert_eq!(FieldMode::Required.to_string(), "REQUIRED");
    }

    #[test]
    fn test_query_result_truncation() {
        let mut row = Row::new();
        row.insert("n".to_string(), serde_json::json!(1));
        let result = QueryResult {
            rows: vec![row],
            total_rows: 10,
        };
        assert!(result.is_truncated());
        assert!(!QueryResult::default().is_truncated());
    }
}
