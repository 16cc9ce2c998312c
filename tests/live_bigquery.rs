//! Live BigQuery and Vertex AI tests
//!
//! Require `GOOGLE_CLOUD_PROJECT` and working gcloud credentials.
//! Run with `cargo test --test live_bigquery -- --ignored`.

use std::sync::Arc;
use std::time::Duration;

use bq_analyst::core::{Config, TokenSource};
use bq_analyst::warehouse::{BigQueryClient, Warehouse};
use bq_analyst::Analyst;
use tokio::time::timeout;

/// Helper to load a config for live tests
fn live_config() -> Result<Config, Box<dyn std::error::Error>> {
    let config = Config::load();
    config.validate()?;
    Ok(config)
}

#[tokio::test]
#[ignore] // Requires Google Cloud credentials
async fn test_list_datasets_live() {
    let config = match live_config() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Skipping test: {}", e);
            return;
        }
    };

    let auth = Arc::new(TokenSource::from_config(&config.google));
    let client = BigQueryClient::from_config(&config, auth).unwrap();

    let datasets = timeout(Duration::from_secs(30), client.list_datasets()).await;
    assert!(datasets.is_ok(), "Listing timed out");
    assert!(datasets.unwrap().is_ok(), "Listing failed");
}

#[tokio::test]
#[ignore]
async fn test_question_round_trip_live() {
    let config = match live_config() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Skipping test: {}", e);
            return;
        }
    };

    let analyst = Analyst::from_config(config).await.unwrap();
    let result = timeout(
        Duration::from_secs(120),
        analyst.query("Which datasets are available?", None),
    )
    .await;

    assert!(result.is_ok(), "Turn timed out");
    let response = result.unwrap().unwrap();
    assert!(response.metadata.steps >= 1);
    assert!(!response.response.is_empty());
}
