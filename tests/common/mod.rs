//! Shared test doubles: a counting in-memory warehouse and a scripted model

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bq_analyst::agent::{Analyst, InMemorySessionStore, SessionStore};
use bq_analyst::core::{AnalystError, Config, Message, Result, ToolCall, ToolDefinition};
use bq_analyst::llm::{GenerateOptions, LLMProvider, LLMResponse};
use bq_analyst::warehouse::{ColumnSchema, FieldMode, QueryResult, Row, Warehouse, WarehouseError};

/// In-memory warehouse with one `sales.orders` table. Counts every call.
#[derive(Default)]
pub struct CountingWarehouse {
    pub calls: AtomicUsize,
    pub queries: Mutex<Vec<String>>,
    pub query_delay: Option<Duration>,
}

impl CountingWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl Warehouse for CountingWarehouse {
    async fn list_datasets(&self) -> std::result::Result<Vec<String>, WarehouseError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec!["sales".to_string()])
    }

    async fn list_tables(&self, dataset_id: &str) -> std::result::Result<Vec<String>, WarehouseError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match dataset_id {
            "sales" => Ok(vec!["orders".to_string()]),
            other => Err(WarehouseError::NotFound(format!("Dataset test:{} was not found", other))),
        }
    }

    async fn get_table_schema(
        &self,
        dataset_id: &str,
        table_id: &str,
    ) -> std::result::Result<Vec<ColumnSchema>, WarehouseError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if (dataset_id, table_id) != ("sales", "orders") {
            return Err(WarehouseError::NotFound(format!(
                "Table test:{}.{} was not found",
                dataset_id, table_id
            )));
        }
        Ok(vec![
            ColumnSchema::new("order_id", "INTEGER", FieldMode::Required),
            ColumnSchema::new("amount", "NUMERIC", FieldMode::Nullable),
        ])
    }

    async fn run_query(&self, sql: &str, max_rows: usize) -> std::result::Result<QueryResult, WarehouseError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().unwrap().push(sql.to_string());
        if let Some(delay) = self.query_delay {
            tokio::time::sleep(delay).await;
        }

        if !sql.to_uppercase().contains("FROM") {
            return Err(WarehouseError::InvalidQuery("Syntax error: expected FROM".to_string()));
        }

        let mut row = Row::new();
        row.insert("f0_".to_string(), serde_json::json!(3));
        let rows = vec![row].into_iter().take(max_rows).collect();
        Ok(QueryResult { rows, total_rows: 1 })
    }

    fn project_id(&self) -> &str {
        "test"
    }
}

/// Model stub replaying a fixed script, shared by every thread.
/// Records the context of every call.
pub struct ScriptedModel {
    script: Mutex<VecDeque<Result<LLMResponse>>>,
    pub contexts: Mutex<Vec<Vec<Message>>>,
    pub delay: Option<Duration>,
}

impl ScriptedModel {
    pub fn new(script: Vec<LLMResponse>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().map(Ok).collect()),
            contexts: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn with_results(script: Vec<Result<LLMResponse>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            contexts: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.contexts.lock().unwrap().len()
    }

    pub fn context(&self, call: usize) -> Vec<Message> {
        self.contexts.lock().unwrap()[call].clone()
    }
}

#[async_trait]
impl LLMProvider for ScriptedModel {
    async fn chat_with_tools(
        &self,
        _model: &str,
        messages: &[Message],
        _tools: &[ToolDefinition],
        _options: Option<GenerateOptions>,
    ) -> Result<LLMResponse> {
        self.contexts.lock().unwrap().push(messages.to_vec());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Err(AnalystError::model("script exhausted")))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Deterministic model: a pure function of the question, independent of
/// call order. Looks the data up once, then answers.
pub struct DeterministicModel;

#[async_trait]
impl LLMProvider for DeterministicModel {
    async fn chat_with_tools(
        &self,
        _model: &str,
        messages: &[Message],
        _tools: &[ToolDefinition],
        _options: Option<GenerateOptions>,
    ) -> Result<LLMResponse> {
        let last = messages.last().ok_or_else(|| AnalystError::model("empty context"))?;
        if last.role == "tool" {
            return Ok(LLMResponse::text(format!("Based on the data: {}", last.content)));
        }
        Ok(LLMResponse::tool_call(sql("SELECT COUNT(*) FROM `test.sales.orders`")))
    }

    fn name(&self) -> &str {
        "deterministic"
    }
}

/// Model that keeps calling tools and never answers
pub struct LoopingModel;

#[async_trait]
impl LLMProvider for LoopingModel {
    async fn chat_with_tools(
        &self,
        _model: &str,
        _messages: &[Message],
        _tools: &[ToolDefinition],
        _options: Option<GenerateOptions>,
    ) -> Result<LLMResponse> {
        Ok(LLMResponse::tool_call(ToolCall::new("list_datasets", serde_json::json!({}))))
    }

    fn name(&self) -> &str {
        "looping"
    }
}

pub fn sql(query: &str) -> ToolCall {
    ToolCall::new("execute_sql", serde_json::json!({ "query": query }))
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.google.project_id = "test".to_string();
    config.agent.system_prompt = None;
    config
}

pub fn analyst_with(
    config: Config,
    llm: Arc<dyn LLMProvider>,
    warehouse: Arc<CountingWarehouse>,
) -> Analyst {
    analyst_with_store(config, llm, warehouse, Arc::new(InMemorySessionStore::new()))
}

pub fn analyst_with_store(
    config: Config,
    llm: Arc<dyn LLMProvider>,
    warehouse: Arc<CountingWarehouse>,
    sessions: Arc<dyn SessionStore>,
) -> Analyst {
    Analyst::new(config, llm, warehouse, sessions)
}

/// Count messages of a role in a context
pub fn count_roles(messages: &[Message]) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for m in messages {
        *counts.entry(m.role.clone()).or_insert(0) += 1;
    }
    counts
}
