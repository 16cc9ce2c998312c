//! Google OAuth access tokens
//!
//! Either a static token from configuration or one minted by the local
//! `gcloud` CLI. Minted tokens are cached; gcloud tokens live for an hour.

use std::time::{Duration, Instant};

use tokio::process::Command;
use tokio::sync::Mutex;

use crate::core::config::GoogleConfig;
use crate::core::error::{AnalystError, Result};

const GCLOUD_TOKEN_TTL: Duration = Duration::from_secs(45 * 60);

/// Source of bearer tokens for Google APIs
pub struct TokenSource {
    static_token: Option<String>,
    cached: Mutex<Option<(String, Instant)>>,
}

impl TokenSource {
    pub fn from_config(config: &GoogleConfig) -> Self {
        Self {
            static_token: config.access_token.clone().filter(|t| !t.trim().is_empty()),
            cached: Mutex::new(None),
        }
    }

    /// A source that always returns the given token
    pub fn fixed(token: impl Into<String>) -> Self {
        Self {
            static_token: Some(token.into()),
            cached: Mutex::new(None),
        }
    }

    /// Get a bearer token, refreshing it through gcloud when stale
    pub async fn token(&self) -> Result<String> {
        if let Some(ref token) = self.static_token {
            return Ok(token.clone());
        }

        let mut cached = self.cached.lock().await;
        if let Some((ref token, minted_at)) = *cached {
            if minted_at.elapsed() < GCLOUD_TOKEN_TTL {
                return Ok(token.clone());
            }
        }

        let token = Self::mint_with_gcloud().await?;
        *cached = Some((token.clone(), Instant::now()));
        Ok(token)
    }

    async fn mint_with_gcloud() -> Result<String> {
        tracing::debug!("Requesting access token from gcloud");
        let output = Command::new("gcloud")
            .args(["auth", "print-access-token"])
            .output()
            .await
            .map_err(|e| AnalystError::auth(format!("Failed to execute gcloud: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AnalystError::auth(format!(
                "gcloud auth failed: {}",
                stderr.trim()
            )));
        }

        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            return Err(AnalystError::auth("gcloud returned an empty access token"));
        }
        Ok(token)
    }
}
