//! Agent orchestrator
//!
//! Runs the reasoning loop: ask the model for the next action, execute the
//! chosen tool, feed the observation back, repeat until a final answer, the
//! recursion limit or the turn deadline. Also the boundary callers use:
//! [`Analyst::query`], [`Analyst::history`] and [`Analyst::health`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::agent::loop_state::{
    AgentLoopState, LoopPhase, ModelProposal, Turn, TurnMetadata, TurnOutcome,
};
use crate::agent::prompt;
use crate::agent::session::{
    new_thread_id, FileSessionStore, InMemorySessionStore, SessionLocks, SessionStore,
};
use crate::core::config::SessionBackend;
use crate::core::{
    AnalystError, Config, Message, Result, TokenSource, ToolDefinition, ToolErrorKind,
    ToolObservation,
};
use crate::llm::{GenerateOptions, LLMProvider, LLMResponse, TokenUsage, VertexProvider};
use crate::tools::ToolRegistry;
use crate::warehouse::{BigQueryClient, Warehouse};

/// Inbound question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

/// Outbound answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub response: String,
    pub thread_id: String,
    pub metadata: TurnMetadata,
}

/// One question/answer pair of a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub question: String,
    pub answer: String,
}

/// Liveness report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Why a turn failed, with the progress made before it did
type TurnFailure = (AnalystError, TurnMetadata);

/// Conversational BigQuery analyst
pub struct Analyst {
    /// Configuration
    config: Config,
    /// LLM client
    llm: Arc<dyn LLMProvider>,
    /// Tool registry
    tools: Arc<ToolRegistry>,
    /// Conversation memory
    sessions: Arc<dyn SessionStore>,
    /// Serializes turns of the same thread
    locks: SessionLocks,
    system_prompt: String,
}

impl Analyst {
    /// Assemble an analyst from its collaborators
    pub fn new(
        config: Config,
        llm: Arc<dyn LLMProvider>,
        warehouse: Arc<dyn Warehouse>,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        let system_prompt = config
            .agent
            .system_prompt
            .clone()
            .unwrap_or_else(|| prompt::system_prompt(warehouse.project_id(), config.agent.max_rows));

        let tools = ToolRegistry::new(warehouse, config.agent.max_rows, config.agent.tool_timeout());

        Self {
            config,
            llm,
            tools: Arc::new(tools),
            sessions,
            locks: SessionLocks::new(),
            system_prompt,
        }
    }

    /// Build the production stack: BigQuery, Vertex AI and the configured
    /// session backend
    pub async fn from_config(config: Config) -> Result<Self> {
        config.validate()?;

        let auth = Arc::new(TokenSource::from_config(&config.google));
        let warehouse: Arc<dyn Warehouse> =
            Arc::new(BigQueryClient::from_config(&config, auth.clone())?);
        let llm: Arc<dyn LLMProvider> = Arc::new(VertexProvider::from_config(&config, auth));

        let sessions: Arc<dyn SessionStore> = match config.sessions.backend {
            SessionBackend::Memory => Arc::new(InMemorySessionStore::new()),
            SessionBackend::File => Arc::new(FileSessionStore::open(config.sessions_dir()).await?),
        };

        tracing::info!(
            project = %config.google.project_id,
            model = %config.model.name,
            persistent_sessions = sessions.is_persistent(),
            "Analyst initialized"
        );

        Ok(Self::new(config, llm, warehouse, sessions))
    }

    /// Answer a question within a thread, creating the thread when the id is
    /// absent or unknown
    pub async fn query(&self, text: &str, thread_id: Option<&str>) -> Result<QueryResponse> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AnalystError::Other("Question must not be empty".to_string()));
        }

        let thread_id = thread_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(new_thread_id);

        // Held across load, loop and append so turns of one thread never interleave
        let _guard = self.locks.acquire(&thread_id).await;
        let (thread_id, history) = self.sessions.get_or_create(Some(&thread_id)).await?;

        tracing::info!(
            thread_id = %thread_id,
            prior_turns = history.len(),
            "Turn started"
        );

        match self.run_turn(&history, text).await {
            Ok(turn) => {
                let metadata = turn.metadata();
                let response = turn.answer.clone();
                self.sessions.append(&thread_id, turn).await?;

                tracing::info!(
                    thread_id = %thread_id,
                    steps = metadata.steps,
                    tool_calls = metadata.tool_calls,
                    outcome = %metadata.outcome,
                    "Turn finished"
                );

                Ok(QueryResponse {
                    response,
                    thread_id,
                    metadata,
                })
            }
            Err((source, metadata)) => {
                tracing::error!(
                    thread_id = %thread_id,
                    steps = metadata.steps,
                    error = %source,
                    "Turn failed"
                );
                Err(AnalystError::TurnFailed {
                    thread_id,
                    metadata,
                    source: Box::new(source),
                })
            }
        }
    }

    /// Same as [`Analyst::query`], taking the boundary request value
    pub async fn handle(&self, request: QueryRequest) -> Result<QueryResponse> {
        self.query(&request.text, request.thread_id.as_deref()).await
    }

    /// Run the loop for one question on top of prior turns
    pub async fn run_turn(
        &self,
        history: &[Turn],
        question: &str,
    ) -> std::result::Result<Turn, TurnFailure> {
        let deadline = Instant::now() + self.config.agent.turn_timeout();
        let mut state = AgentLoopState::new(question, self.config.agent.recursion_limit);
        let context = self.context_messages(history);
        let tool_defs = self.tools.definitions();
        let mut usage = TokenUsage::default();

        while state.should_continue() {
            state.phase = LoopPhase::AwaitingProposal;
            let mut messages = context.clone();
            messages.extend(state.messages());

            let response =
                match tokio::time::timeout_at(deadline, self.propose(&messages, &tool_defs)).await {
                    Ok(Ok(response)) => response,
                    Ok(Err(e)) => return Err((e, state.metadata(TurnOutcome::Failed))),
                    // Without a single proposal there is no turn to record
                    Err(_) if state.proposals() == 0 => {
                        let timeout = self.config.agent.turn_timeout().as_secs();
                        return Err((
                            AnalystError::ModelTimeout(timeout),
                            state.metadata(TurnOutcome::Failed),
                        ));
                    }
                    Err(_) => {
                        tracing::warn!(steps = state.proposals(), "Turn deadline reached");
                        return Ok(state.into_turn(TurnOutcome::DeadlineExceeded));
                    }
                };

            state.phase = LoopPhase::ProposalReceived;
            if let Some(u) = &response.usage {
                usage.accumulate(u);
            }
            let proposal = ModelProposal::from_response(response);
            let call = match &proposal {
                ModelProposal::CallTool(call) => Some(call.clone()),
                ModelProposal::FinalAnswer(_) => None,
            };

            tracing::info!(
                step = state.proposals() + 1,
                limit = state.recursion_limit,
                tool = call.as_ref().map(|c| c.name.as_str()).unwrap_or("final_answer"),
                "Model proposal"
            );
            state.record_proposal(proposal);

            let Some(call) = call else {
                break;
            };

            match tokio::time::timeout_at(deadline, self.tools.dispatch(&call)).await {
                Ok(observation) => {
                    if !observation.is_success() {
                        tracing::debug!(tool = %call.name, output = %observation.output, "Tool returned an error");
                    }
                    state.record_observation(observation);
                }
                Err(_) => {
                    state.record_observation(ToolObservation::failure(
                        &call.name,
                        ToolErrorKind::Timeout,
                        "Turn deadline reached before the tool finished",
                    ));
                    tracing::warn!(tool = %call.name, "Turn deadline reached during tool call");
                    return Ok(state.into_turn(TurnOutcome::DeadlineExceeded));
                }
            }
        }

        let outcome = if state.final_answer.is_some() {
            TurnOutcome::Answered
        } else {
            tracing::warn!(limit = state.recursion_limit, "Recursion limit reached");
            TurnOutcome::RecursionLimit
        };
        tracing::debug!(
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            total_tokens = usage.total_tokens,
            "Turn token usage"
        );
        Ok(state.into_turn(outcome))
    }

    /// Ask the model for the next action under the model timeout
    async fn propose(&self, messages: &[Message], tools: &[ToolDefinition]) -> Result<LLMResponse> {
        let timeout = self.config.agent.model_timeout();
        let options = GenerateOptions {
            temperature: Some(self.config.model.temperature),
            max_tokens: Some(self.config.model.max_output_tokens),
        };

        tracing::debug!(messages = messages.len(), tools = tools.len(), "Calling model");

        match tokio::time::timeout(
            timeout,
            self.llm
                .chat_with_tools(&self.config.model.name, messages, tools, Some(options)),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(AnalystError::ModelTimeout(timeout.as_secs())),
        }
    }

    /// System prompt followed by every prior turn
    fn context_messages(&self, history: &[Turn]) -> Vec<Message> {
        let mut messages = vec![Message::system(&self.system_prompt)];
        for turn in history {
            messages.extend(turn.to_messages());
        }
        messages
    }

    /// Question/answer pairs of a thread, oldest first
    pub async fn history(&self, thread_id: &str) -> Result<Vec<HistoryEntry>> {
        Ok(self
            .sessions
            .history(thread_id)
            .await?
            .into_iter()
            .map(|turn| HistoryEntry {
                question: turn.question,
                answer: turn.answer,
            })
            .collect())
    }

    /// Liveness, independent of the model and the warehouse
    pub fn health(&self) -> HealthStatus {
        HealthStatus {
            status: "ok".to_string(),
            service: "bq-analyst".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Tool definitions offered to the model
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools.definitions()
    }

    /// Get current configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Provider backing the loop
    pub fn provider_name(&self) -> &str {
        self.llm.name()
    }

    /// Whether threads survive a restart
    pub fn sessions_persistent(&self) -> bool {
        self.sessions.is_persistent()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ToolCall;
    use crate::warehouse::{ColumnSchema, QueryResult, WarehouseError};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct EmptyWarehouse;

    #[async_trait]
    impl Warehouse for EmptyWarehouse {
        async fn list_datasets(&self) -> std::result::Result<Vec<String>, WarehouseError> {
            Ok(vec!["sales".to_string()])
        }
        async fn list_tables(&self, _: &str) -> std::result::Result<Vec<String>, WarehouseError> {
            Ok(vec![])
        }
        async fn get_table_schema(
            &self,
            _: &str,
            _: &str,
        ) -> std::result::Result<Vec<ColumnSchema>, WarehouseError> {
            Ok(vec![])
        }
        async fn run_query(
            &self,
            _: &str,
            _: usize,
        ) -> std::result::Result<QueryResult, WarehouseError> {
            Ok(QueryResult::default())
        }
        fn project_id(&self) -> &str {
            "test-project"
        }
    }

    /// Replays canned responses and records the context it was given
    struct Scripted {
        responses: Mutex<VecDeque<LLMResponse>>,
        seen: Mutex<Vec<Vec<Message>>>,
    }

    impl Scripted {
        fn new(responses: Vec<LLMResponse>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LLMProvider for Scripted {
        async fn chat_with_tools(
            &self,
            _model: &str,
            messages: &[Message],
            _tools: &[ToolDefinition],
            _options: Option<GenerateOptions>,
        ) -> Result<LLMResponse> {
            self.seen.lock().unwrap().push(messages.to_vec());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| AnalystError::model("script exhausted"))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn analyst(llm: Arc<Scripted>) -> Analyst {
        let mut config = Config::default();
        config.google.project_id = "test-project".to_string();
        Analyst::new(
            config,
            llm,
            Arc::new(EmptyWarehouse),
            Arc::new(InMemorySessionStore::new()),
        )
    }

    #[tokio::test]
    async fn test_direct_answer() {
        let llm = Arc::new(Scripted::new(vec![LLMResponse::text("Hello")]));
        let analyst = analyst(llm.clone());

        let response = analyst.query("hi", None).await.unwrap();
        assert_eq!(response.response, "Hello");
        assert_eq!(response.metadata.steps, 1);
        assert_eq!(response.metadata.tool_calls, 0);
        assert_eq!(response.metadata.outcome, TurnOutcome::Answered);

        let seen = llm.seen.lock().unwrap();
        assert_eq!(seen[0][0].role, "system");
        assert!(seen[0][0].content.contains("test-project"));
    }

    #[tokio::test]
    async fn test_observation_is_fed_back() {
        let llm = Arc::new(Scripted::new(vec![
            LLMResponse::tool_call(ToolCall::new("list_datasets", serde_json::json!({}))),
            LLMResponse::text("You have one dataset: sales."),
        ]));
        let analyst = analyst(llm.clone());

        let response = analyst.query("what data?", None).await.unwrap();
        assert_eq!(response.metadata.steps, 2);
        assert_eq!(response.metadata.tool_calls, 1);

        let seen = llm.seen.lock().unwrap();
        let last = seen[1].last().unwrap();
        assert_eq!(last.role, "tool");
        assert!(last.content.contains("sales"));
    }

    #[tokio::test]
    async fn test_empty_question_rejected() {
        let analyst = analyst(Arc::new(Scripted::new(vec![])));
        assert!(analyst.query("   ", None).await.is_err());
    }

    #[tokio::test]
    async fn test_health_is_independent() {
        let analyst = analyst(Arc::new(Scripted::new(vec![])));
        let health = analyst.health();
        assert_eq!(health.status, "ok");
        assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_response_serialization() {
        let response = QueryResponse {
            response: "42".to_string(),
            thread_id: "t".to_string(),
            metadata: TurnMetadata {
                steps: 2,
                tool_calls: 1,
                outcome: TurnOutcome::Answered,
            },
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["metadata"]["outcome"], "answered");
        assert_eq!(json["metadata"]["tool_calls"], 1);

        let request: QueryRequest = serde_json::from_str(r#"{"text": "hi"}"#).unwrap();
        assert_eq!(request.thread_id, None);
    }
}
