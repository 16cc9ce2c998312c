//! Tools module - warehouse tools exposed to the agent
//!
//! Contains the read-only SQL guard and the tool registry.

pub mod registry;
pub mod sql_guard;

pub use registry::{ToolName, ToolRegistry};
pub use sql_guard::GuardrailViolation;
