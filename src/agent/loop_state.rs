//! Agent loop state management
//!
//! Tracks the state of the reasoning loop: proposals from the model,
//! observations from tool executions, and the bounds that force termination.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{Message, ToolCall, ToolObservation};
use crate::llm::LLMResponse;

/// Text used when the model ends a turn without saying anything
const EMPTY_ANSWER: &str = "I apologize, but I couldn't generate a response.";

/// What the model wants to do next
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ModelProposal {
    CallTool(ToolCall),
    FinalAnswer(String),
}

impl ModelProposal {
    /// Convert a model response into exactly one proposal.
    ///
    /// Only the first tool call is honored; any others in the same response
    /// are dropped so every proposal maps to one observation.
    pub fn from_response(response: LLMResponse) -> Self {
        if let Some(call) = response.tool_calls.into_iter().next() {
            return ModelProposal::CallTool(call);
        }

        let text = response.content.trim();
        if text.is_empty() {
            ModelProposal::FinalAnswer(EMPTY_ANSWER.to_string())
        } else {
            ModelProposal::FinalAnswer(text.to_string())
        }
    }

    pub fn is_tool_call(&self) -> bool {
        matches!(self, ModelProposal::CallTool(_))
    }
}

/// One entry in a turn's trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Step {
    Proposal(ModelProposal),
    Observation(ToolObservation),
}

/// How a turn ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    /// The model produced a final answer
    Answered,
    /// The proposal budget ran out
    RecursionLimit,
    /// The turn deadline passed
    DeadlineExceeded,
    /// The model backend failed; never stored in a session
    Failed,
}

impl TurnOutcome {
    pub fn is_degraded(&self) -> bool {
        !matches!(self, TurnOutcome::Answered)
    }
}

impl std::fmt::Display for TurnOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TurnOutcome::Answered => write!(f, "answered"),
            TurnOutcome::RecursionLimit => write!(f, "recursion_limit"),
            TurnOutcome::DeadlineExceeded => write!(f, "deadline_exceeded"),
            TurnOutcome::Failed => write!(f, "failed"),
        }
    }
}

/// Counters reported with every answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnMetadata {
    /// Model proposals made during the turn
    pub steps: usize,
    /// Tool calls dispatched during the turn
    pub tool_calls: usize,
    pub outcome: TurnOutcome,
}

/// A completed question/answer exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub question: String,
    pub steps: Vec<Step>,
    pub answer: String,
    pub outcome: TurnOutcome,
    pub started_at: DateTime<Utc>,
}

impl Turn {
    pub fn metadata(&self) -> TurnMetadata {
        TurnMetadata {
            steps: count_proposals(&self.steps),
            tool_calls: count_tool_calls(&self.steps),
            outcome: self.outcome,
        }
    }

    /// Replay the turn as model context: the question, every step, and the
    /// answer when it was not itself the last proposal
    pub fn to_messages(&self) -> Vec<Message> {
        let mut messages = vec![Message::user(&self.question)];
        messages.extend(self.steps.iter().map(step_message));

        let ends_with_answer = matches!(
            self.steps.last(),
            Some(Step::Proposal(ModelProposal::FinalAnswer(_)))
        );
        if !ends_with_answer {
            messages.push(Message::assistant(&self.answer));
        }
        messages
    }
}

fn step_message(step: &Step) -> Message {
    match step {
        Step::Proposal(ModelProposal::CallTool(call)) => Message::tool_request(call.clone()),
        Step::Proposal(ModelProposal::FinalAnswer(text)) => Message::assistant(text),
        Step::Observation(obs) => obs.to_message(),
    }
}

fn count_proposals(steps: &[Step]) -> usize {
    steps
        .iter()
        .filter(|s| matches!(s, Step::Proposal(_)))
        .count()
}

fn count_tool_calls(steps: &[Step]) -> usize {
    steps
        .iter()
        .filter(|s| matches!(s, Step::Proposal(p) if p.is_tool_call()))
        .count()
}

/// Where the loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    AwaitingProposal,
    ProposalReceived,
    ExecutingTool,
    Terminating,
}

/// State of the agent reasoning loop for one turn
#[derive(Debug, Clone)]
pub struct AgentLoopState {
    question: String,
    started_at: DateTime<Utc>,
    /// Maximum proposals before the loop is cut off
    pub recursion_limit: usize,
    pub phase: LoopPhase,
    steps: Vec<Step>,
    /// Final answer if the model has completed reasoning
    pub final_answer: Option<String>,
}

impl AgentLoopState {
    pub fn new(question: impl Into<String>, recursion_limit: usize) -> Self {
        Self {
            question: question.into(),
            started_at: Utc::now(),
            recursion_limit,
            phase: LoopPhase::AwaitingProposal,
            steps: Vec::new(),
            final_answer: None,
        }
    }

    /// Check if the loop should ask the model again
    pub fn should_continue(&self) -> bool {
        self.final_answer.is_none() && self.proposals() < self.recursion_limit
    }

    pub fn proposals(&self) -> usize {
        count_proposals(&self.steps)
    }

    pub fn tool_calls(&self) -> usize {
        count_tool_calls(&self.steps)
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Record a proposal and move to the phase it leads to
    pub fn record_proposal(&mut self, proposal: ModelProposal) {
        self.phase = match &proposal {
            ModelProposal::FinalAnswer(text) => {
                self.final_answer = Some(text.clone());
                LoopPhase::Terminating
            }
            ModelProposal::CallTool(_) => LoopPhase::ExecutingTool,
        };
        self.steps.push(Step::Proposal(proposal));
    }

    /// Record the observation for the pending tool call
    pub fn record_observation(&mut self, observation: ToolObservation) {
        self.steps.push(Step::Observation(observation));
        self.phase = LoopPhase::AwaitingProposal;
    }

    pub fn last_observation(&self) -> Option<&ToolObservation> {
        self.steps.iter().rev().find_map(|s| match s {
            Step::Observation(obs) => Some(obs),
            _ => None,
        })
    }

    /// Messages for this turn so far, starting with the question
    pub fn messages(&self) -> Vec<Message> {
        let mut messages = vec![Message::user(&self.question)];
        messages.extend(self.steps.iter().map(step_message));
        messages
    }

    pub fn metadata(&self, outcome: TurnOutcome) -> TurnMetadata {
        TurnMetadata {
            steps: self.proposals(),
            tool_calls: self.tool_calls(),
            outcome,
        }
    }

    /// Answer given when the loop is cut off before the model finished
    pub fn degraded_answer(&self, outcome: TurnOutcome) -> String {
        let reason = match outcome {
            TurnOutcome::DeadlineExceeded => "I ran out of time before reaching a final answer.".to_string(),
            _ => format!(
                "I could not reach a final answer within {} steps.",
                self.recursion_limit
            ),
        };

        match self.last_observation() {
            Some(obs) => format!(
                "{} The last result I obtained ({}) was:\n{}",
                reason, obs.tool_name, obs.output
            ),
            None => reason,
        }
    }

    /// Close the loop and produce the turn record
    pub fn into_turn(mut self, outcome: TurnOutcome) -> Turn {
        self.phase = LoopPhase::Terminating;
        let answer = match (&self.final_answer, outcome) {
            (Some(answer), TurnOutcome::Answered) => answer.clone(),
            _ => self.degraded_answer(outcome),
        };

        Turn {
            question: self.question,
            steps: self.steps,
            answer,
            outcome,
            started_at: self.started_at,
        }
    }
}
