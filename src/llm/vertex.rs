//! Vertex AI Gemini provider
//!
//! Calls `generateContent` on the Vertex AI REST API with function
//! declarations, a system instruction and generation settings. Tool calls
//! come back as `functionCall` parts; observations go out as
//! `functionResponse` parts.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{AnalystError, Config, Message, Result, TokenSource, ToolCall, ToolDefinition};
use crate::llm::traits::{GenerateOptions, LLMProvider, LLMResponse, TokenUsage};

/// Vertex AI Gemini client
pub struct VertexProvider {
    client: Client,
    base_url: String,
    project_id: String,
    location: String,
    auth: Arc<TokenSource>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<VertexTool>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_response: Option<FunctionResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FunctionResponse {
    name: String,
    response: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VertexTool {
    function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct FunctionDeclaration {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    candidate_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
    #[serde(default)]
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Content,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

impl VertexProvider {
    /// Create a provider from configuration
    pub fn from_config(config: &Config, auth: Arc<TokenSource>) -> Self {
        Self {
            client: Client::new(),
            base_url: format!("https://{}", api_host(&config.google.location)),
            project_id: config.google.project_id.clone(),
            location: config.google.location.clone(),
            auth,
        }
    }

    /// Create a provider against a custom endpoint
    pub fn with_base_url(
        base_url: impl Into<String>,
        project_id: impl Into<String>,
        location: impl Into<String>,
        auth: Arc<TokenSource>,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            project_id: project_id.into(),
            location: location.into(),
            auth,
        }
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/v1/projects/{}/locations/{}/publishers/google/models/{}:generateContent",
            self.base_url,
            self.project_id,
            self.location,
            model_id(model)
        )
    }

    fn build_request(
        messages: &[Message],
        tools: &[ToolDefinition],
        options: Option<GenerateOptions>,
    ) -> GenerateContentRequest {
        let options = options.unwrap_or_default();

        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == "system")
            .map(|m| m.content.as_str())
            .collect();
        let system_instruction = (!system.is_empty()).then(|| Content {
            role: None,
            parts: vec![Part {
                text: Some(system.join("\n\n")),
                ..Default::default()
            }],
        });

        let contents = messages
            .iter()
            .filter(|m| m.role != "system")
            .map(to_content)
            .collect();

        let tools = if tools.is_empty() {
            Vec::new()
        } else {
            vec![VertexTool {
                function_declarations: tools.iter().map(to_declaration).collect(),
            }]
        };

        GenerateContentRequest {
            contents,
            system_instruction,
            tools,
            generation_config: GenerationConfig {
                candidate_count: 1,
                temperature: options.temperature,
                max_output_tokens: options.max_tokens,
            },
        }
    }

    fn to_llm_response(model: &str, response: GenerateContentResponse) -> Result<LLMResponse> {
        let Some(candidate) = response.candidates.into_iter().next() else {
            let reason = response
                .prompt_feedback
                .and_then(|f| f.block_reason)
                .unwrap_or_else(|| "no candidates returned".to_string());
            return Err(AnalystError::model(format!("Vertex AI returned no answer: {}", reason)));
        };

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        for part in candidate.content.parts {
            if let Some(text) = part.text {
                content.push_str(&text);
            }
            if let Some(call) = part.function_call {
                tool_calls.push(ToolCall::new(call.name, normalize_args(call.args)));
            }
        }

        if content.is_empty() && tool_calls.is_empty() {
            if let Some(reason) = candidate.finish_reason.filter(|r| r != "STOP") {
                tracing::warn!(finish_reason = %reason, "Vertex AI returned an empty candidate");
            }
        }

        Ok(LLMResponse {
            content,
            tool_calls,
            usage: response.usage_metadata.map(|u| TokenUsage {
                prompt_tokens: u.prompt_token_count,
                completion_tokens: u.candidates_token_count,
                total_tokens: u.total_token_count,
            }),
            model: response.model_version.unwrap_or_else(|| model.to_string()),
        })
    }
}

#[async_trait]
impl LLMProvider for VertexProvider {
    async fn chat_with_tools(
        &self,
        model: &str,
        messages: &[Message],
        tools: &[ToolDefinition],
        options: Option<GenerateOptions>,
    ) -> Result<LLMResponse> {
        let token = self.auth.token().await?;
        let request = Self::build_request(messages, tools, options);

        tracing::debug!(
            model = model,
            messages = request.contents.len(),
            tools = tools.len(),
            "Calling Vertex AI"
        );

        let resp = self
            .client
            .post(self.endpoint(model))
            .bearer_auth(token)
            .json(&request)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let error_text = resp.text().await.unwrap_or_default();
            return Err(AnalystError::model(format!(
                "Vertex AI error ({}): {}",
                status, error_text
            )));
        }

        let response: GenerateContentResponse = resp.json().await?;
        let response = Self::to_llm_response(model, response)?;

        if let Some(usage) = &response.usage {
            tracing::debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "Vertex AI usage"
            );
        }
        Ok(response)
    }

    fn name(&self) -> &str {
        "vertex_ai"
    }
}

/// Host for a Vertex AI location; `global` has no regional prefix
fn api_host(location: &str) -> String {
    if location == "global" {
        "aiplatform.googleapis.com".to_string()
    } else {
        format!("{}-aiplatform.googleapis.com", location)
    }
}

/// Accept both bare ids and `publishers/google/models/<id>` resource names
fn model_id(model: &str) -> &str {
    model
        .rsplit_once("models/")
        .map(|(_, id)| id)
        .unwrap_or(model)
        .trim_start_matches("google/")
}

fn normalize_args(args: Value) -> Value {
    match args {
        Value::Null => Value::Object(Default::default()),
        other => other,
    }
}

fn to_content(message: &Message) -> Content {
    let text_part = |text: &str| Part {
        text: Some(text.to_string()),
        ..Default::default()
    };

    match message.role.as_str() {
        "tool" => Content {
            role: Some("user".to_string()),
            parts: vec![Part {
                function_response: Some(FunctionResponse {
                    name: message.tool_name.clone().unwrap_or_default(),
                    response: serde_json::json!({ "content": message.content }),
                }),
                ..Default::default()
            }],
        },
        "assistant" => {
            let mut parts = Vec::new();
            if !message.content.is_empty() {
                parts.push(text_part(&message.content));
            }
            for call in message.tool_calls.iter().flatten() {
                parts.push(Part {
                    function_call: Some(FunctionCall {
                        name: sanitize_tool_name(&call.name),
                        args: call.arguments.clone(),
                    }),
                    ..Default::default()
                });
            }
            if parts.is_empty() {
                parts.push(text_part(""));
            }
            Content {
                role: Some("model".to_string()),
                parts,
            }
        }
        _ => Content {
            role: Some("user".to_string()),
            parts: vec![text_part(&message.content)],
        },
    }
}

fn to_declaration(tool: &ToolDefinition) -> FunctionDeclaration {
    FunctionDeclaration {
        name: sanitize_tool_name(&tool.function.name),
        description: tool.function.description.clone(),
        parameters: convert_schema(&tool.function.parameters),
    }
}

/// Function names may not contain `-`
pub fn sanitize_tool_name(name: &str) -> String {
    let sanitized = name.trim().replace('-', "_");
    if sanitized.is_empty() {
        "tool".to_string()
    } else {
        sanitized
    }
}

/// Convert a JSON schema to the Vertex AI schema dialect.
///
/// Types are upper-cased (`string` to `STRING`); unknown types become
/// `STRING` and a missing type means `OBJECT`. Object properties and array
/// items are converted recursively; empty property maps are omitted.
pub fn convert_schema(schema: &Value) -> Value {
    let Some(obj) = schema.as_object() else {
        return serde_json::json!({ "type": "OBJECT" });
    };

    let vertex_type = match obj.get("type").and_then(Value::as_str) {
        None => "OBJECT",
        Some(t) => match t.to_ascii_lowercase().as_str() {
            "string" => "STRING",
            "number" => "NUMBER",
            "integer" => "INTEGER",
            "boolean" => "BOOLEAN",
            "array" => "ARRAY",
            "object" => "OBJECT",
            _ => "STRING",
        },
    };

    let mut out = serde_json::Map::new();
    out.insert("type".to_string(), Value::from(vertex_type));

    for key in ["description", "enum", "format"] {
        if let Some(value) = obj.get(key) {
            out.insert(key.to_string(), value.clone());
        }
    }

    if vertex_type == "OBJECT" {
        if let Some(props) = obj.get("properties").and_then(Value::as_object) {
            if !props.is_empty() {
                let converted: serde_json::Map<String, Value> = props
                    .iter()
                    .map(|(k, v)| (k.clone(), convert_schema(v)))
                    .collect();
                out.insert("properties".to_string(), Value::Object(converted));
            }
        }
    }

    if vertex_type == "ARRAY" {
        if let Some(items) = obj.get("items") {
            out.insert("items".to_string(), convert_schema(items));
        }
    }

    if let Some(required) = obj.get("required").and_then(Value::as_array) {
        if !required.is_empty() {
            out.insert("required".to_string(), Value::Array(required.clone()));
        }
    }

    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_schema_nested() {
        let schema = serde_json::json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "SQL"},
                "limits": {"type": "array", "items": {"type": "integer"}},
                "odd": {"type": "datetime"}
            },
            "required": ["query"]
        });

        let converted = convert_schema(&schema);
        assert_eq!(converted["type"], "OBJECT");
        assert_eq!(converted["properties"]["query"]["type"], "STRING");
        assert_eq!(converted["properties"]["query"]["description"], "SQL");
        assert_eq!(converted["properties"]["limits"]["items"]["type"], "INTEGER");
        assert_eq!(converted["properties"]["odd"]["type"], "STRING");
        assert_eq!(converted["required"], serde_json::json!(["query"]));
    }

    #[test]
    fn test_convert_schema_empty_properties_omitted() {
        let converted = convert_schema(&serde_json::json!({"type": "object", "properties": {}}));
        assert_eq!(converted, serde_json::json!({"type": "OBJECT"}));
        assert_eq!(convert_schema(&Value::Null), serde_json::json!({"type": "OBJECT"}));
    }

    #[test]
    fn test_sanitize_tool_name() {
        assert_eq!(sanitize_tool_name(" list-tables "), "list_tables");
        assert_eq!(sanitize_tool_name(""), "tool");
    }

    #[test]
    fn test_api_host_and_model_id() {
        assert_eq!(api_host("global"), "aiplatform.googleapis.com");
        assert_eq!(api_host("europe-west1"), "europe-west1-aiplatform.googleapis.com");
        assert_eq!(model_id("publishers/google/models/gemini-2.5-flash"), "gemini-2.5-flash");
        assert_eq!(model_id("google/gemini-2.5-pro"), "gemini-2.5-pro");
        assert_eq!(model_id("gemini-2.5-flash"), "gemini-2.5-flash");
    }

    #[test]
    fn test_build_request_maps_roles() {
        let call = ToolCall::new("list_tables", serde_json::json!({"dataset_id": "sales"}));
        let messages = vec![
            Message::system("be brief"),
            Message::user("what tables?"),
            Message::tool_request(call),
            Message::tool_result("list_tables", "orders"),
        ];
        let request = VertexProvider::build_request(
            &messages,
            &[],
            Some(GenerateOptions {
                temperature: Some(0.0),
                max_tokens: Some(128),
            }),
        );

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "be brief");
        assert_eq!(json["contents"].as_array().unwrap().len(), 3);
        assert_eq!(json["contents"][1]["role"], "model");
        assert_eq!(json["contents"][1]["parts"][0]["functionCall"]["name"], "list_tables");
        assert_eq!(
            json["contents"][2]["parts"][0]["functionResponse"]["response"]["content"],
            "orders"
        );
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 128);
        assert!(json.get("tools").is_none());
    }

    #[test]
    fn test_parse_function_call_response() {
        let raw = serde_json::json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [{"functionCall": {"name": "execute_sql", "args": {"query": "SELECT 1"}}}]
                },
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 10, "candidatesTokenCount": 5, "totalTokenCount": 15}
        });
        let response: GenerateContentResponse = serde_json::from_value(raw).unwrap();
        let llm = VertexProvider::to_llm_response("gemini", response).unwrap();

        assert_eq!(llm.tool_calls.len(), 1);
        assert_eq!(llm.tool_calls[0].get_string("query").as_deref(), Some("SELECT 1"));
        assert_eq!(llm.usage.unwrap().total_tokens, 15);
    }

    #[test]
    fn test_blocked_prompt_is_model_error() {
        let raw = serde_json::json!({"promptFeedback": {"blockReason": "SAFETY"}});
        let response: GenerateContentResponse = serde_json::from_value(raw).unwrap();
        let err = VertexProvider::to_llm_response("gemini", response).unwrap_err();
        assert!(err.is_model_failure());
        assert!(err.to_string().contains("SAFETY"));
    }
}
