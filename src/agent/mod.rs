//! Agent module - orchestration and conversation memory
//!
//! Contains the reasoning loop, its state, and the session store.

pub mod loop_state;
pub mod orchestrator;
pub mod prompt;
pub mod session;

pub use loop_state::{AgentLoopState, ModelProposal, Step, Turn, TurnMetadata, TurnOutcome};
pub use orchestrator::{Analyst, HealthStatus, HistoryEntry, QueryRequest, QueryResponse};
pub use session::{FileSessionStore, InMemorySessionStore, SessionLocks, SessionStore};
