//! bq-analyst - conversational BigQuery analytics
//!
//! Main entry point for the CLI application.

use std::path::PathBuf;

use bq_analyst::agent::Analyst;
use bq_analyst::cli::repl::footer;
use bq_analyst::core::config::SessionBackend;
use bq_analyst::{Config, Repl};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// bq-analyst - ask questions about your BigQuery data
#[derive(Parser, Debug)]
#[command(name = "bq-analyst")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Google Cloud project holding the data
    #[arg(long)]
    project: Option<String>,

    /// Vertex AI model name
    #[arg(long, short = 'm')]
    model: Option<String>,

    /// Maximum model proposals per question
    #[arg(long)]
    recursion_limit: Option<usize>,

    /// Continue an existing conversation thread
    #[arg(long, short = 't')]
    thread: Option<String>,

    /// Store conversations as JSON files in this directory
    #[arg(long)]
    sessions_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short = 'd')]
    debug: bool,

    /// Single prompt mode (non-interactive)
    #[arg(long, short = 'p')]
    prompt: Option<String>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,

    /// Write the effective configuration to the config file and exit
    #[arg(long)]
    save_config: bool,
}

fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("bq_analyst={level},warn").into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Build configuration
    let mut config = Config::load();

    // Apply CLI overrides
    if let Some(project) = args.project {
        config.google.project_id = project;
    }

    if let Some(model) = args.model {
        config.model.name = model;
    }

    if let Some(limit) = args.recursion_limit {
        config.agent.recursion_limit = limit;
    }

    if let Some(dir) = args.sessions_dir {
        config.sessions.backend = SessionBackend::File;
        config.sessions.dir = Some(dir);
    }

    if args.debug {
        config.logging.level = "debug".to_string();
    }

    if args.print_config {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    if args.save_config {
        let path = config.save()?;
        println!("Configuration written to {}", path.display());
        return Ok(());
    }

    init_tracing(&config.logging.level);

    let analyst = Analyst::from_config(config).await?;

    // Single prompt mode
    if let Some(prompt) = args.prompt {
        let response = analyst.query(&prompt, args.thread.as_deref()).await?;
        println!("{}", response.response);
        eprintln!("{}", footer(&response));
        return Ok(());
    }

    // Interactive REPL mode
    let mut repl = Repl::new(analyst).with_thread(args.thread);
    repl.run().await?;

    Ok(())
}
