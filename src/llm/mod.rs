//! LLM module - Language Model integrations
//!
//! Provides the provider abstraction and the Vertex AI Gemini backend.

pub mod traits;
pub mod vertex;

pub use traits::{GenerateOptions, LLMProvider, LLMResponse, TokenUsage};
pub use vertex::VertexProvider;
