//! BigQuery REST client
//!
//! Talks to the BigQuery v2 REST API with a bearer token. Only read
//! endpoints are used: dataset/table listing, table metadata, and
//! `jobs.query` / `jobs.getQueryResults` for SQL.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::core::{AnalystError, Config, Result, TokenSource};
use crate::warehouse::{ColumnSchema, FieldMode, QueryResult, Row, Warehouse, WarehouseError};

const DEFAULT_BASE_URL: &str = "https://bigquery.googleapis.com/bigquery/v2/";

/// How long a single `jobs.query` / `getQueryResults` call may block server-side
const QUERY_WAIT_MS: u64 = 10_000;

/// BigQuery API client bound to one project
#[derive(Clone)]
pub struct BigQueryClient {
    client: Client,
    base_url: Url,
    project_id: String,
    location: Option<String>,
    auth: Arc<TokenSource>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatasetList {
    #[serde(default)]
    datasets: Vec<DatasetEntry>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatasetEntry {
    dataset_reference: DatasetReference,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatasetReference {
    dataset_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableList {
    #[serde(default)]
    tables: Vec<TableEntry>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableEntry {
    table_reference: TableReference,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableReference {
    table_id: String,
}

#[derive(Debug, Deserialize)]
struct TableResource {
    schema: Option<TableSchema>,
}

#[derive(Debug, Default, Deserialize)]
struct TableSchema {
    #[serde(default)]
    fields: Vec<TableField>,
}

#[derive(Debug, Deserialize)]
struct TableField {
    name: String,
    #[serde(rename = "type")]
    field_type: String,
    mode: Option<String>,
    #[serde(default)]
    fields: Vec<TableField>,
}

/// Shared shape of `jobs.query` and `jobs.getQueryResults` responses
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    job_reference: Option<JobReference>,
    schema: Option<TableSchema>,
    #[serde(default)]
    rows: Vec<TableRow>,
    total_rows: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TableRow {
    #[serde(default)]
    f: Vec<TableCell>,
}

#[derive(Debug, Deserialize)]
struct TableCell {
    #[serde(default)]
    v: Value,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    reason: Option<String>,
}

impl BigQueryClient {
    /// Create a client from configuration
    pub fn from_config(config: &Config, auth: Arc<TokenSource>) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.agent.tool_timeout())
            .build()?;

        Self::with_base_url(client, DEFAULT_BASE_URL, &config.google.project_id, auth)
            .map(|c| c.with_location(config.google.bigquery_location.clone()))
    }

    /// Create a client against a custom API root
    pub fn with_base_url(
        client: Client,
        base_url: &str,
        project_id: &str,
        auth: Arc<TokenSource>,
    ) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| AnalystError::config(format!("Invalid BigQuery URL: {}", e)))?;
        if base_url.cannot_be_a_base() {
            return Err(AnalystError::config(format!(
                "BigQuery URL cannot be a base: {}",
                base_url
            )));
        }

        Ok(Self {
            client,
            base_url,
            project_id: project_id.to_string(),
            location: None,
            auth,
        })
    }

    /// Pin query jobs to a BigQuery location
    pub fn with_location(mut self, location: Option<String>) -> Self {
        self.location = location;
        self
    }

    /// Build `<base>/projects/<project>/<segments...>` with each segment escaped
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty()
                .extend(["projects", self.project_id.as_str()])
                .extend(segments);
        }
        url
    }

    async fn bearer(&self) -> std::result::Result<String, WarehouseError> {
        self.auth
            .token()
            .await
            .map_err(|e| WarehouseError::PermissionDenied(e.to_string()))
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: Url,
        query: &[(&str, String)],
    ) -> std::result::Result<T, WarehouseError> {
        let token = self.bearer().await?;
        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .query(query)
            .send()
            .await
            .map_err(transport_error)?;
        Self::decode(response).await
    }

    async fn post_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: Url,
        body: &Value,
    ) -> std::result::Result<T, WarehouseError> {
        let token = self.bearer().await?;
        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        Self::decode(response).await
    }

    async fn decode<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> std::result::Result<T, WarehouseError> {
        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            return Err(classify_error(status, &text));
        }

        serde_json::from_str(&text).map_err(|e| {
            WarehouseError::Transient(format!("Unexpected BigQuery response: {}", e))
        })
    }

    /// Poll `getQueryResults` until the job reports completion
    async fn wait_for_job(
        &self,
        mut response: QueryResponse,
        max_rows: usize,
    ) -> std::result::Result<QueryResponse, WarehouseError> {
        while !response.job_complete {
            let job = response.job_reference.as_ref().ok_or_else(|| {
                WarehouseError::Transient("Incomplete query job without a job reference".into())
            })?;
            tracing::debug!(job_id = %job.job_id, "Query job still running, polling");

            let mut params = vec![
                ("maxResults", max_rows.to_string()),
                ("timeoutMs", QUERY_WAIT_MS.to_string()),
            ];
            if let Some(location) = job.location.clone().or_else(|| self.location.clone()) {
                params.push(("location", location));
            }

            let url = self.endpoint(&["queries", job.job_id.as_str()]);
            response = self.get_json(url, &params).await?;
        }
        Ok(response)
    }
}

#[async_trait]
impl Warehouse for BigQueryClient {
    async fn list_datasets(&self) -> std::result::Result<Vec<String>, WarehouseError> {
        let mut datasets = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut params = vec![("all", "false".to_string())];
            if let Some(token) = page_token.take() {
                params.push(("pageToken", token));
            }

            let page: DatasetList = self.get_json(self.endpoint(&["datasets"]), &params).await?;
            datasets.extend(page.datasets.into_iter().map(|d| d.dataset_reference.dataset_id));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(datasets)
    }

    async fn list_tables(&self, dataset_id: &str) -> std::result::Result<Vec<String>, WarehouseError> {
        let mut tables = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut params = Vec::new();
            if let Some(token) = page_token.take() {
                params.push(("pageToken", token));
            }

            let url = self.endpoint(&["datasets", dataset_id, "tables"]);
            let page: TableList = self.get_json(url, &params).await?;
            tables.extend(page.tables.into_iter().map(|t| t.table_reference.table_id));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(tables)
    }

    async fn get_table_schema(
        &self,
        dataset_id: &str,
        table_id: &str,
    ) -> std::result::Result<Vec<ColumnSchema>, WarehouseError> {
        let url = self.endpoint(&["datasets", dataset_id, "tables", table_id]);
        let table: TableResource = self.get_json(url, &[]).await?;

        Ok(table
            .schema
            .unwrap_or_default()
            .fields
            .into_iter()
            .map(|field| {
                ColumnSchema::new(field.name, field.field_type, FieldMode::parse(field.mode.as_deref()))
            })
            .collect())
    }

    async fn run_query(
        &self,
        sql: &str,
        max_rows: usize,
    ) -> std::result::Result<QueryResult, WarehouseError> {
        let mut body = serde_json::json!({
            "query": sql,
            "useLegacySql": false,
            "maxResults": max_rows,
            "timeoutMs": QUERY_WAIT_MS,
        });
        if let Some(ref location) = self.location {
            body["location"] = Value::String(location.clone());
        }

        let first: QueryResponse = self.post_json(self.endpoint(&["queries"]), &body).await?;
        let response = self.wait_for_job(first, max_rows).await?;

        let fields = response.schema.unwrap_or_default().fields;
        let rows: Vec<Row> = response
            .rows
            .into_iter()
            .take(max_rows)
            .map(|row| convert_row(&fields, row.f))
            .collect();

        let total_rows = response
            .total_rows
            .and_then(|t| t.parse::<u64>().ok())
            .unwrap_or(rows.len() as u64);

        Ok(QueryResult { rows, total_rows })
    }

    fn project_id(&self) -> &str {
        &self.project_id
    }
}

fn transport_error(e: reqwest::Error) -> WarehouseError {
    if e.is_timeout() {
        WarehouseError::Transient(format!("BigQuery request timed out: {}", e))
    } else {
        WarehouseError::Transient(format!("BigQuery request failed: {}", e))
    }
}

/// Map an HTTP failure to a typed warehouse error using the BigQuery reason code
fn classify_error(status: StatusCode, body: &str) -> WarehouseError {
    let envelope = serde_json::from_str::<ErrorEnvelope>(body).ok();
    let reason = envelope
        .as_ref()
        .and_then(|e| e.error.errors.iter().find_map(|d| d.reason.clone()))
        .unwrap_or_default();
    let message = envelope
        .map(|e| e.error.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| format!("HTTP {}", status));

    match reason.as_str() {
        "notFound" => return WarehouseError::NotFound(message),
        "quotaExceeded" | "rateLimitExceeded" | "backendError" | "internalError" => {
            return WarehouseError::Transient(message)
        }
        "accessDenied" | "billingNotEnabled" => return WarehouseError::PermissionDenied(message),
        "invalidQuery" | "invalid" => return WarehouseError::InvalidQuery(message),
        _ => {}
    }

    match status.as_u16() {
        404 => WarehouseError::NotFound(message),
        401 | 403 => WarehouseError::PermissionDenied(message),
        400 => WarehouseError::InvalidQuery(message),
        _ => WarehouseError::Transient(message),
    }
}

fn convert_row(fields: &[TableField], cells: Vec<TableCell>) -> Row {
    fields
        .iter()
        .zip(cells)
        .map(|(field, cell)| (field.name.clone(), convert_value(field, cell.v)))
        .collect()
}

/// Convert BigQuery's string-encoded cell values into typed JSON
fn convert_value(field: &TableField, value: Value) -> Value {
    if FieldMode::parse(field.mode.as_deref()) == FieldMode::Repeated {
        if let Value::Array(items) = value {
            return Value::Array(
                items
                    .into_iter()
                    .map(|item| match item {
                        Value::Object(mut cell) => convert_scalar(field, cell.remove("v").unwrap_or(Value::Null)),
                        other => convert_scalar(field, other),
                    })
                    .collect(),
            );
        }
    }
    convert_scalar(field, value)
}

fn convert_scalar(field: &TableField, value: Value) -> Value {
    match value {
        Value::String(s) => match field.field_type.to_ascii_uppercase().as_str() {
            "INTEGER" | "INT64" => s.parse::<i64>().map(Value::from).unwrap_or(Value::String(s)),
            "FLOAT" | "FLOAT64" => s
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::String(s)),
            "BOOLEAN" | "BOOL" => match s.as_str() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                _ => Value::String(s),
            },
            _ => Value::String(s),
        },
        Value::Object(mut record) if !field.fields.is_empty() => {
            let cells: Vec<TableCell> = match record.remove("f") {
                Some(Value::Array(cells)) => cells
                    .into_iter()
                    .map(|c| TableCell {
                        v: match c {
                            Value::Object(mut o) => o.remove("v").unwrap_or(Value::Null),
                            other => other,
                        },
                    })
                    .collect(),
                _ => Vec::new(),
            };
            Value::Object(convert_row(&field.fields, cells))
        }
        other => other,
    }
}

impl std::fmt::Debug for BigQueryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BigQueryClient")
            .field("base_url", &self.base_url.as_str())
            .field("project_id", &self.project_id)
            .field("location", &self.location)
            .finish()
    }
}
