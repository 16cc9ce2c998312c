//! Tool registry - manages and dispatches tool calls
//!
//! Holds the four warehouse tools, their definitions for the model, and
//! the dispatch path. Dispatch never fails: every outcome, including guard
//! rejections and timeouts, comes back as a [`ToolObservation`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::core::{ToolCall, ToolDefinition, ToolErrorKind, ToolObservation};
use crate::tools::sql_guard;
use crate::warehouse::{Warehouse, WarehouseError};

/// The fixed set of tools the agent may call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    ListDatasets,
    ListTables,
    GetTableSchema,
    ExecuteSql,
}

impl ToolName {
    pub const ALL: [ToolName; 4] = [
        ToolName::ListDatasets,
        ToolName::ListTables,
        ToolName::GetTableSchema,
        ToolName::ExecuteSql,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::ListDatasets => "list_datasets",
            ToolName::ListTables => "list_tables",
            ToolName::GetTableSchema => "get_table_schema",
            ToolName::ExecuteSql => "execute_sql",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }
}

impl std::fmt::Display for ToolName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registry of available tools
pub struct ToolRegistry {
    /// Tool definitions indexed by name
    definitions: HashMap<ToolName, ToolDefinition>,
    /// Warehouse the tools read from
    warehouse: Arc<dyn Warehouse>,
    /// Row cap for `execute_sql`
    max_rows: usize,
    /// Per-dispatch timeout
    timeout: Duration,
}

impl ToolRegistry {
    /// Create a registry over a warehouse
    pub fn new(warehouse: Arc<dyn Warehouse>, max_rows: usize, timeout: Duration) -> Self {
        let mut registry = Self {
            definitions: HashMap::new(),
            warehouse,
            max_rows,
            timeout,
        };
        registry.register_warehouse_tools();
        registry
    }

    fn register_warehouse_tools(&mut self) {
        self.register(
            ToolName::ListDatasets,
            ToolDefinition::function(
                ToolName::ListDatasets.as_str(),
                "List the BigQuery datasets available in the project. Use this first to discover the data.",
                serde_json::json!({
                    "type": "object",
                    "properties": {}
                }),
            ),
        );

        self.register(
            ToolName::ListTables,
            ToolDefinition::function(
                ToolName::ListTables.as_str(),
                "List the tables in a BigQuery dataset.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "dataset_id": {
                            "type": "string",
                            "description": "Dataset id, e.g. sales"
                        }
                    },
                    "required": ["dataset_id"]
                }),
            ),
        );

        self.register(
            ToolName::GetTableSchema,
            ToolDefinition::function(
                ToolName::GetTableSchema.as_str(),
                "Get the column names, types and nullability of a table. Always call this before writing SQL against the table.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "dataset_id": {
                            "type": "string",
                            "description": "Dataset id"
                        },
                        "table_id": {
                            "type": "string",
                            "description": "Table id inside the dataset"
                        }
                    },
                    "required": ["dataset_id", "table_id"]
                }),
            ),
        );

        self.register(
            ToolName::ExecuteSql,
            ToolDefinition::function(
                ToolName::ExecuteSql.as_str(),
                "Run a read-only BigQuery Standard SQL query (SELECT only). Fully qualify tables as `project.dataset.table`.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "A single SELECT statement"
                        }
                    },
                    "required": ["query"]
                }),
            ),
        );
    }

    /// Register a tool definition
    fn register(&mut self, name: ToolName, definition: ToolDefinition) {
        self.definitions.insert(name, definition);
    }

    /// All tool definitions, in a stable order
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        ToolName::ALL
            .iter()
            .filter_map(|name| self.definitions.get(name).cloned())
            .collect()
    }

    /// Row cap applied to query results
    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    /// Execute a tool call
    pub async fn dispatch(&self, tool_call: &ToolCall) -> ToolObservation {
        let Some(tool) = ToolName::parse(&tool_call.name) else {
            tracing::warn!(tool = %tool_call.name, "Model requested an unknown tool");
            return ToolObservation::failure(
                &tool_call.name,
                ToolErrorKind::UnknownTool,
                format!(
                    "Unknown tool '{}'. Available tools: {}",
                    tool_call.name,
                    ToolName::ALL.map(|t| t.as_str()).join(", ")
                ),
            );
        };

        tracing::info!(tool = %tool, "Dispatching tool call");

        match tool {
            ToolName::ListDatasets => self.list_datasets().await,
            ToolName::ListTables => match required_arg(tool_call, "dataset_id") {
                Ok(dataset) => self.list_tables(&dataset).await,
                Err(obs) => obs,
            },
            ToolName::GetTableSchema => {
                match (
                    required_arg(tool_call, "dataset_id"),
                    required_arg(tool_call, "table_id"),
                ) {
                    (Ok(dataset), Ok(table)) => self.get_table_schema(&dataset, &table).await,
                    (Err(obs), _) | (_, Err(obs)) => obs,
                }
            }
            ToolName::ExecuteSql => match required_arg(tool_call, "query") {
                Ok(query) => self.execute_sql(&query).await,
                Err(obs) => obs,
            },
        }
    }

    /// Run a warehouse call under the dispatch timeout
    async fn with_timeout<T>(
        &self,
        tool: ToolName,
        fut: impl Future<Output = Result<T, WarehouseError>>,
    ) -> Result<T, ToolObservation> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                tracing::warn!(tool = %tool, error = %e, "Warehouse call failed");
                Err(warehouse_failure(tool, e))
            }
            Err(_) => {
                tracing::warn!(tool = %tool, timeout_secs = self.timeout.as_secs(), "Warehouse call timed out");
                Err(ToolObservation::failure(
                    tool.as_str(),
                    ToolErrorKind::Timeout,
                    format!("{} did not finish within {}s", tool, self.timeout.as_secs()),
                ))
            }
        }
    }

    async fn list_datasets(&self) -> ToolObservation {
        let tool = ToolName::ListDatasets;
        let datasets = match self.with_timeout(tool, self.warehouse.list_datasets()).await {
            Ok(d) => d,
            Err(obs) => return obs,
        };
        let project = self.warehouse.project_id();

        if datasets.is_empty() {
            return ToolObservation::success_with_data(
                tool.as_str(),
                format!("No datasets are available in project {}.", project),
                serde_json::json!([]),
            );
        }

        tracing::info!(count = datasets.len(), "Listed datasets");
        ToolObservation::success_with_data(
            tool.as_str(),
            format!("Datasets in project {}: {}", project, datasets.join(", ")),
            serde_json::json!(datasets),
        )
    }

    async fn list_tables(&self, dataset_id: &str) -> ToolObservation {
        let tool = ToolName::ListTables;
        let tables = match self.with_timeout(tool, self.warehouse.list_tables(dataset_id)).await {
            Ok(t) => t,
            Err(obs) => return obs,
        };

        if tables.is_empty() {
            return ToolObservation::success_with_data(
                tool.as_str(),
                format!("Dataset {} has no tables.", dataset_id),
                serde_json::json!([]),
            );
        }

        tracing::info!(dataset = dataset_id, count = tables.len(), "Listed tables");
        ToolObservation::success_with_data(
            tool.as_str(),
            format!("Tables in dataset {}: {}", dataset_id, tables.join(", ")),
            serde_json::json!(tables),
        )
    }

    async fn get_table_schema(&self, dataset_id: &str, table_id: &str) -> ToolObservation {
        let tool = ToolName::GetTableSchema;
        let columns = match self
            .with_timeout(tool, self.warehouse.get_table_schema(dataset_id, table_id))
            .await
        {
            Ok(c) => c,
            Err(obs) => return obs,
        };

        let table_ref = format!("{}.{}.{}", self.warehouse.project_id(), dataset_id, table_id);
        let mut output = format!("Schema of table {}:", table_ref);
        for column in &columns {
            output.push_str(&format!(
                "\n- {} ({}, {})",
                column.name, column.data_type, column.mode
            ));
        }

        ToolObservation::success_with_data(
            tool.as_str(),
            output,
            serde_json::to_value(&columns).unwrap_or(serde_json::Value::Null),
        )
    }

    async fn execute_sql(&self, query: &str) -> ToolObservation {
        let tool = ToolName::ExecuteSql;
        tracing::debug!(sql = query, "execute_sql");

        if let Err(violation) = sql_guard::ensure_read_only(query) {
            tracing::warn!(reason = %violation, "Blocked non read-only SQL");
            return ToolObservation {
                tool_name: tool.as_str().to_string(),
                error: Some(ToolErrorKind::Guardrail),
                output: violation.to_observation(),
                data: None,
            };
        }

        let result = match self
            .with_timeout(tool, self.warehouse.run_query(query, self.max_rows))
            .await
        {
            Ok(r) => r,
            Err(obs) => return obs,
        };

        let shown = result.rows.len();
        let rows_json = serde_json::to_string(&result.rows).unwrap_or_else(|_| "[]".to_string());
        let output = if result.is_truncated() {
            format!(
                "Results (first {} of {} rows):\n{}",
                shown, result.total_rows, rows_json
            )
        } else {
            format!("Results ({} rows):\n{}", shown, rows_json)
        };

        tracing::info!(rows = result.total_rows, shown, "SQL executed");
        ToolObservation::success_with_data(
            tool.as_str(),
            output,
            serde_json::to_value(&result.rows).unwrap_or(serde_json::Value::Null),
        )
    }
}

/// Pull a non-empty string argument or explain what is missing
fn required_arg(tool_call: &ToolCall, key: &str) -> Result<String, ToolObservation> {
    match tool_call.get_string(key) {
        Some(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(ToolObservation::failure(
            &tool_call.name,
            ToolErrorKind::InvalidArguments,
            format!("Missing required string argument '{}'", key),
        )),
    }
}

fn warehouse_failure(tool: ToolName, error: WarehouseError) -> ToolObservation {
    let kind = match error {
        WarehouseError::NotFound(_) => ToolErrorKind::NotFound,
        WarehouseError::PermissionDenied(_) => ToolErrorKind::PermissionDenied,
        WarehouseError::InvalidQuery(_) => ToolErrorKind::InvalidQuery,
        WarehouseError::Transient(_) => ToolErrorKind::Transient,
    };
    ToolObservation::failure(tool.as_str(), kind, error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::{ColumnSchema, FieldMode, QueryResult, Row};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeWarehouse {
        queries: AtomicUsize,
        slow: bool,
    }

    #[async_trait]
    impl Warehouse for FakeWarehouse {
        async fn list_datasets(&self) -> Result<Vec<String>, WarehouseError> {
            Ok(vec![])
        }

        async fn list_tables(&self, dataset_id: &str) -> Result<Vec<String>, WarehouseError> {
            if dataset_id == "sales" {
                Ok(vec!["orders".to_string(), "customers".to_string()])
            } else {
                Err(WarehouseError::NotFound(format!("Dataset p:{} was not found", dataset_id)))
            }
        }

        async fn get_table_schema(
            &self,
            _dataset_id: &str,
            _table_id: &str,
        ) -> Result<Vec<ColumnSchema>, WarehouseError> {
            Ok(vec![
                ColumnSchema::new("id", "INTEGER", FieldMode::Required),
                ColumnSchema::new("amount", "FLOAT", FieldMode::Nullable),
            ])
        }

        async fn run_query(&self, _sql: &str, max_rows: usize) -> Result<QueryResult, WarehouseError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            if self.slow {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            let rows: Vec<Row> = (0..120)
                .map(|i| {
                    let mut row = Row::new();
                    row.insert("n".to_string(), serde_json::json!(i));
                    row
                })
                .take(max_rows)
                .collect();
            Ok(QueryResult {
                rows,
                total_rows: 120,
            })
        }

        fn project_id(&self) -> &str {
            "p"
        }
    }

    fn registry(warehouse: Arc<FakeWarehouse>) -> ToolRegistry {
        ToolRegistry::new(warehouse, 50, Duration::from_secs(1))
    }

    #[test]
    fn test_definitions_order() {
        let registry = registry(Arc::new(FakeWarehouse::default()));
        let names: Vec<String> = registry
            .definitions()
            .into_iter()
            .map(|d| d.function.name)
            .collect();
        assert_eq!(
            names,
            ["list_datasets", "list_tables", "get_table_schema", "execute_sql"]
        );
    }

    #[tokio::test]
    async fn test_empty_datasets_is_not_an_error() {
        let registry = registry(Arc::new(FakeWarehouse::default()));
        let obs = registry
            .dispatch(&ToolCall::new("list_datasets", serde_json::json!({})))
            .await;
        assert!(obs.is_success());
        assert!(obs.output.contains("No datasets"));
    }

    #[tokio::test]
    async fn test_missing_dataset_is_not_found() {
        let registry = registry(Arc::new(FakeWarehouse::default()));
        let obs = registry
            .dispatch(&ToolCall::new("list_tables", serde_json::json!({"dataset_id": "nope"})))
            .await;
        assert_eq!(obs.error, Some(ToolErrorKind::NotFound));
    }

    #[tokio::test]
    async fn test_schema_lists_nullability() {
        let registry = registry(Arc::new(FakeWarehouse::default()));
        let obs = registry
            .dispatch(&ToolCall::new(
                "get_table_schema",
                serde_json::json!({"dataset_id": "sales", "table_id": "orders"}),
            ))
            .await;
        assert!(obs.output.contains("Schema of table p.sales.orders"));
        assert!(obs.output.contains("- id (INTEGER, REQUIRED)"));
        assert!(obs.output.contains("- amount (FLOAT, NULLABLE)"));
    }

    #[tokio::test]
    async fn test_rows_are_capped() {
        let registry = registry(Arc::new(FakeWarehouse::default()));
        let obs = registry
            .dispatch(&ToolCall::new("execute_sql", serde_json::json!({"query": "SELECT n FROM t"})))
            .await;
        assert!(obs.is_success());
        assert!(obs.output.starts_with("Results (first 50 of 120 rows)"));
        assert_eq!(obs.data.unwrap().as_array().unwrap().len(), 50);
    }

    #[tokio::test]
    async fn test_mutating_sql_never_reaches_warehouse() {
        let warehouse = Arc::new(FakeWarehouse::default());
        let registry = registry(warehouse.clone());
        let obs = registry
            .dispatch(&ToolCall::new("execute_sql", serde_json::json!({"query": "DELETE FROM t"})))
            .await;
        assert_eq!(obs.error, Some(ToolErrorKind::Guardrail));
        assert!(obs.output.contains("DELETE"));
        assert_eq!(warehouse.queries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_argument() {
        let registry = registry(Arc::new(FakeWarehouse::default()));
        let obs = registry
            .dispatch(&ToolCall::new("get_table_schema", serde_json::json!({"dataset_id": "sales"})))
            .await;
        assert_eq!(obs.error, Some(ToolErrorKind::InvalidArguments));
        assert!(obs.output.contains("table_id"));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let registry = registry(Arc::new(FakeWarehouse::default()));
        let obs = registry
            .dispatch(&ToolCall::new("drop_everything", serde_json::json!({})))
            .await;
        assert_eq!(obs.error, Some(ToolErrorKind::UnknownTool));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_query_times_out() {
        let warehouse = Arc::new(FakeWarehouse {
            slow: true,
            ..Default::default()
        });
        let registry = registry(warehouse);
        let obs = registry
            .dispatch(&ToolCall::new("execute_sql", serde_json::json!({"query": "SELECT 1"})))
            .await;
        assert_eq!(obs.error, Some(ToolErrorKind::Timeout));
    }
}
