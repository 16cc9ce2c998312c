//! bq-analyst - conversational BigQuery analytics
//!
//! An LLM-driven agent that answers natural-language questions about a
//! BigQuery project. The model picks read-only tools (list datasets, list
//! tables, fetch a schema, run a SELECT), observes their results, and
//! iterates until it can answer. Conversations are kept per thread.
//!
//! # Architecture
//!
//! - **Core**: Shared types, configuration, credentials and error handling
//! - **Warehouse**: Read-only BigQuery REST client behind a trait
//! - **Tools**: Tool registry and the read-only SQL guard
//! - **LLM**: LLM provider abstraction with a Vertex AI Gemini implementation
//! - **Agent**: Reasoning loop, turn state and session memory
//! - **CLI**: Command-line interface and REPL
//!
//! # Usage
//!
//! ```rust,no_run
//! use bq_analyst::{Analyst, Config};
//!
//! #[tokio::main]
//! async fn main() -> bq_analyst::Result<()> {
//!     let analyst = Analyst::from_config(Config::load()).await?;
//!
//!     let first = analyst.query("Which datasets do we have?", None).await?;
//!     println!("{}", first.response);
//!
//!     let follow_up = analyst
//!         .query("How many tables are in the first one?", Some(&first.thread_id))
//!         .await?;
//!     println!("{}", follow_up.response);
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod cli;
pub mod core;
pub mod llm;
pub mod tools;
pub mod warehouse;

// Re-export commonly used items
pub use agent::{Analyst, QueryRequest, QueryResponse};
pub use cli::Repl;
pub use core::{AnalystError, Config, Result};
