//! Configuration management for bq-analyst
//!
//! Supports environment variables, config files, and runtime overrides.
//! The loaded value is passed explicitly into [`crate::agent::Analyst`];
//! nothing below the binary reads process state after startup.
//!
//! Config file location: ~/.config/bq-analyst/config.toml

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::core::error::{AnalystError, Result};

/// Main configuration for bq-analyst
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Google Cloud project and credentials
    pub google: GoogleConfig,
    /// Model configuration
    pub model: ModelConfig,
    /// Agent loop configuration
    pub agent: AgentConfig,
    /// Session memory configuration
    #[serde(default)]
    pub sessions: SessionConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Google Cloud configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleConfig {
    /// Project that owns the datasets and pays for queries
    pub project_id: String,
    /// Vertex AI location (default: global)
    pub location: String,
    /// BigQuery job location, e.g. "EU" (default: let BigQuery decide)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bigquery_location: Option<String>,
    /// Static OAuth access token; when unset, `gcloud auth print-access-token` is used
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

/// Model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Vertex AI model, either a short name or a `publishers/...` resource path
    pub name: String,
    /// Sampling temperature (0.0 - 2.0)
    pub temperature: f32,
    /// Maximum tokens per model response
    pub max_output_tokens: u32,
}

/// Agent loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum model proposals per turn before a degraded answer is forced
    /// Default: 15
    pub recursion_limit: usize,
    /// Row cap for `execute_sql` results
    /// Default: 50
    pub max_rows: usize,
    /// Timeout for a single model invocation
    pub model_timeout_secs: u64,
    /// Timeout for a single tool dispatch
    pub tool_timeout_secs: u64,
    /// Wall-clock budget for a whole turn
    pub turn_timeout_secs: u64,
    /// System prompt override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

/// Session store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionBackend {
    /// Lost when the process exits
    #[default]
    Memory,
    /// One JSON document per session under `sessions.dir`
    File,
}

/// Session memory configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    pub backend: SessionBackend,
    /// Directory for the file backend (default: <data dir>/bq-analyst/sessions)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is not set
    pub level: String,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            project_id: env::var("GOOGLE_CLOUD_PROJECT").unwrap_or_default(),
            location: env::var("GOOGLE_CLOUD_LOCATION").unwrap_or_else(|_| "global".to_string()),
            bigquery_location: env::var("BIGQUERY_LOCATION").ok(),
            access_token: env::var("GOOGLE_OAUTH_ACCESS_TOKEN").ok(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: env::var("MODEL_NAME").unwrap_or_else(|_| "gemini-2.5-flash".to_string()),
            temperature: env::var("AGENT_TEMPERATURE")
                .ok()
                .and_then(|t| t.parse().ok())
                .unwrap_or(0.0),
            max_output_tokens: 4096,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            recursion_limit: env::var("AGENT_RECURSION_LIMIT")
                .ok()
                .and_then(|l| l.parse().ok())
                .unwrap_or(15),
            max_rows: 50,
            model_timeout_secs: 60,
            tool_timeout_secs: 60,
            turn_timeout_secs: 300,
            system_prompt: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: env::var("LOG_LEVEL")
                .map(|l| l.to_lowercase())
                .unwrap_or_else(|_| "info".to_string()),
        }
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("bq-analyst")
    }

    /// Get the config file path
    pub fn config_file() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Default directory for the file session backend
    pub fn default_sessions_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("bq-analyst")
            .join("sessions")
    }

    /// Load configuration from file, environment, and defaults
    /// Priority: CLI args > config file > env vars > defaults
    pub fn load() -> Self {
        // Try to load .env file if it exists
        let _ = dotenvy::dotenv();

        if let Ok(config) = Self::load_from_file() {
            return config;
        }

        // Fall back to defaults (which respect env vars)
        Self::default()
    }

    /// Load configuration from file only
    pub fn load_from_file() -> Result<Self> {
        let config_path = Self::config_file();

        if !config_path.exists() {
            return Err(AnalystError::config("Config file not found"));
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|e| AnalystError::config(format!("Failed to read config: {}", e)))?;

        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| AnalystError::config(format!("Failed to parse config: {}", e)))
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<PathBuf> {
        let config_dir = Self::config_dir();
        let config_path = Self::config_file();

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .map_err(|e| AnalystError::config(format!("Failed to create config dir: {}", e)))?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| AnalystError::config(format!("Failed to serialize config: {}", e)))?;

        fs::write(&config_path, content)
            .map_err(|e| AnalystError::config(format!("Failed to write config: {}", e)))?;

        Ok(config_path)
    }

    /// Reject values the agent loop cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.google.project_id.trim().is_empty() {
            return Err(AnalystError::config(
                "Google Cloud project is not set (GOOGLE_CLOUD_PROJECT or --project)",
            ));
        }
        if self.agent.recursion_limit == 0 {
            return Err(AnalystError::config("recursion_limit must be at least 1"));
        }
        if self.agent.max_rows == 0 {
            return Err(AnalystError::config("max_rows must be at least 1"));
        }
        for (name, secs) in [
            ("model_timeout_secs", self.agent.model_timeout_secs),
            ("tool_timeout_secs", self.agent.tool_timeout_secs),
            ("turn_timeout_secs", self.agent.turn_timeout_secs),
        ] {
            if secs == 0 {
                return Err(AnalystError::config(format!("{name} must be at least 1")));
            }
        }
        if !(0.0..=2.0).contains(&self.model.temperature) {
            return Err(AnalystError::config(format!(
                "temperature {} is outside 0.0..=2.0",
                self.model.temperature
            )));
        }
        Ok(())
    }

    /// Directory used by the file session backend
    pub fn sessions_dir(&self) -> PathBuf {
        self.sessions
            .dir
            .clone()
            .unwrap_or_else(Self::default_sessions_dir)
    }

    /// Generate a default config file content for display
    pub fn default_config_toml() -> String {
        toml::to_string_pretty(&Config::default())
            .unwrap_or_else(|_| String::from("# Error generating config"))
    }
}

impl AgentConfig {
    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn turn_timeout(&self) -> Duration {
        Duration::from_secs(self.turn_timeout_secs)
    }
}
