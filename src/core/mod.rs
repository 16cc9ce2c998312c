//! Core module - shared infrastructure for bq-analyst
//!
//! This module contains foundational types, configuration, and error handling
//! used throughout the application.

pub mod auth;
pub mod config;
pub mod error;
pub mod types;

pub use auth::TokenSource;
pub use config::Config;
pub use error::{AnalystError, Result};
pub use types::*;
