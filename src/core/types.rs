//! Shared types used across bq-analyst modules
//!
//! Contains message structures, tool definitions, and common data types.

use serde::{Deserialize, Serialize};

/// A message in the model context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender (user, assistant, system, tool)
    pub role: String,
    /// Content of the message
    pub content: String,
    /// Tool calls made by the assistant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Name of the tool that produced a `tool` message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl Message {
    fn with_role(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
            tool_calls: None,
            tool_name: None,
        }
    }

    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role("user", content)
    }

    /// Create a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role("assistant", content)
    }

    /// Create a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role("system", content)
    }

    /// Create an assistant message that requests a tool call
    pub fn tool_request(call: ToolCall) -> Self {
        Self {
            tool_calls: Some(vec![call]),
            ..Self::with_role("assistant", "")
        }
    }

    /// Create a message carrying a tool's output back to the model
    pub fn tool_result(tool_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_name: Some(tool_name.into()),
            ..Self::with_role("tool", content)
        }
    }
}

/// A tool call made by the LLM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Name of the tool to invoke
    pub name: String,
    /// JSON arguments for the tool
    pub arguments: serde_json::Value,
}

impl ToolCall {
    /// Create a new tool call
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    /// Get a string argument by key
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.arguments
            .get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }
}

/// Definition of a tool that can be called by the LLM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Type of tool (always "function" for now)
    #[serde(rename = "type")]
    pub tool_type: String,
    /// Function details
    pub function: FunctionDefinition,
}

/// Function definition within a tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    /// Name of the function
    pub name: String,
    /// Description of what the function does
    pub description: String,
    /// JSON Schema for the parameters
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    /// Create a new function tool definition
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

/// Classification of a failed tool execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    /// Dataset or table does not exist
    NotFound,
    /// The warehouse refused access
    PermissionDenied,
    /// The SQL guard rejected a mutating or non-read-only statement
    Guardrail,
    /// The warehouse rejected the query as malformed
    InvalidQuery,
    /// Network, quota or backend hiccup
    Transient,
    /// The call did not finish within the tool timeout
    Timeout,
    /// Missing or malformed tool arguments
    InvalidArguments,
    /// The model named a tool that does not exist
    UnknownTool,
}

impl std::fmt::Display for ToolErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolErrorKind::NotFound => write!(f, "not_found"),
            ToolErrorKind::PermissionDenied => write!(f, "permission_denied"),
            ToolErrorKind::Guardrail => write!(f, "guardrail_violation"),
            ToolErrorKind::InvalidQuery => write!(f, "invalid_query"),
            ToolErrorKind::Transient => write!(f, "transient"),
            ToolErrorKind::Timeout => write!(f, "timeout"),
            ToolErrorKind::InvalidArguments => write!(f, "invalid_arguments"),
            ToolErrorKind::UnknownTool => write!(f, "unknown_tool"),
        }
    }
}

/// Result of executing a tool, as fed back to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolObservation {
    /// Name of the tool that was executed
    pub tool_name: String,
    /// Failure classification; `None` when the call succeeded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolErrorKind>,
    /// Text shown to the model
    pub output: String,
    /// Optional structured data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ToolObservation {
    /// Create a successful observation
    pub fn success(tool_name: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            error: None,
            output: output.into(),
            data: None,
        }
    }

    /// Create a successful observation with structured data
    pub fn success_with_data(
        tool_name: impl Into<String>,
        output: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            data: Some(data),
            ..Self::success(tool_name, output)
        }
    }

    /// Create a failed observation
    pub fn failure(tool_name: impl Into<String>, kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            error: Some(kind),
            output: format!("Error ({}): {}", kind, message.into()),
            data: None,
        }
    }

    /// Whether the execution was successful
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Render as a `tool` message for the model context
    pub fn to_message(&self) -> Message {
        Message::tool_result(&self.tool_name, &self.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_result_message() {
        let msg = Message::tool_result("list_datasets", "['sales']");
        assert_eq!(msg.role, "tool");
        assert_eq!(msg.tool_name.as_deref(), Some("list_datasets"));
    }

    #[test]
    fn test_tool_request_message() {
        let call = ToolCall::new("list_tables", serde_json::json!({"dataset_id": "sales"}));
        let msg = Message::tool_request(call.clone());
        assert_eq!(msg.role, "assistant");
        assert_eq!(msg.tool_calls, Some(vec![call]));
    }

    #[test]
    fn test_failure_observation() {
        let obs = ToolObservation::failure("list_tables", ToolErrorKind::NotFound, "Dataset missing");
        assert!(!obs.is_success());
        assert_eq!(obs.output, "Error (not_found): Dataset missing");
        assert_eq!(obs.to_message().tool_name.as_deref(), Some("list_tables"));
    }

    #[test]
    fn test_get_string() {
        let call = ToolCall::new("execute_sql", serde_json::json!({"query": "SELECT 1", "n": 3}));
        assert_eq!(call.get_string("query").as_deref(), Some("SELECT 1"));
        assert_eq!(call.get_string("n"), None);
        assert_eq!(call.get_string("missing"), None);
    }
}
