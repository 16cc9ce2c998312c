//! Interactive REPL for bq-analyst
//!
//! Provides the main user interaction loop. Each REPL tracks one current
//! thread; `new` starts another and `thread <id>` resumes an existing one.

use std::io::{self, BufRead, Write};

use crate::agent::{Analyst, QueryResponse, TurnOutcome};
use crate::cli::commands::{handle_command, CommandResult};
use crate::core::{Config, Result};

/// Interactive REPL (Read-Eval-Print Loop)
pub struct Repl {
    analyst: Analyst,
    thread_id: Option<String>,
}

impl Repl {
    /// Create a REPL with custom configuration
    pub async fn with_config(config: Config) -> Result<Self> {
        Ok(Self::new(Analyst::from_config(config).await?))
    }

    /// Create a REPL around an existing analyst
    pub fn new(analyst: Analyst) -> Self {
        Self {
            analyst,
            thread_id: None,
        }
    }

    /// Resume a thread instead of starting a new one
    pub fn with_thread(mut self, thread_id: Option<String>) -> Self {
        self.thread_id = thread_id;
        self
    }

    /// Run the REPL
    pub async fn run(&mut self) -> Result<()> {
        self.print_banner();

        let stdin = io::stdin();
        let mut stdout = io::stdout();

        loop {
            print!("You: ");
            stdout.flush()?;

            let mut input = String::new();
            match stdin.lock().read_line(&mut input) {
                Ok(0) => {
                    // EOF (Ctrl+D)
                    println!("\nGoodbye!");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    eprintln!("Error reading input: {}", e);
                    continue;
                }
            }

            let input = input.trim();
            if input.is_empty() {
                continue;
            }

            match handle_command(input, &self.analyst, self.thread_id.as_deref()).await {
                Ok(CommandResult::Exit) => {
                    println!("\nGoodbye!");
                    break;
                }
                Ok(CommandResult::NewThread) => {
                    self.thread_id = None;
                    println!("Started a new conversation.\n");
                }
                Ok(CommandResult::SwitchThread(id)) => {
                    println!("Switched to thread {}.\n", id);
                    self.thread_id = Some(id);
                }
                Ok(CommandResult::Handled(output)) => {
                    println!("{}\n", output);
                }
                Ok(CommandResult::Continue(question)) => {
                    match self
                        .analyst
                        .query(&question, self.thread_id.as_deref())
                        .await
                    {
                        Ok(response) => {
                            println!("\nAssistant:\n{}\n", response.response);
                            println!("{}\n", footer(&response));
                            self.thread_id = Some(response.thread_id);
                        }
                        Err(e) => {
                            eprintln!("\nError: {}\n", e);
                        }
                    }
                }
                Err(e) => {
                    eprintln!("Command error: {}\n", e);
                }
            }
        }

        Ok(())
    }

    /// Print the startup banner
    fn print_banner(&self) {
        let config = self.analyst.config();

        println!();
        println!("bq-analyst {} - conversational BigQuery analytics", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Project:  {}", config.google.project_id);
        println!("Model:    {}", config.model.name);
        if let Some(id) = &self.thread_id {
            println!("Thread:   {}", id);
        }
        println!();
        println!("Commands: help, new, thread, history, status, tools, exit");
        println!("─────────────────────────────────────────────────────────");
    }
}

/// One-line summary printed under each answer
pub fn footer(response: &QueryResponse) -> String {
    let meta = &response.metadata;
    let mut line = format!(
        "[thread {} | {} step(s), {} tool call(s)",
        response.thread_id, meta.steps, meta.tool_calls
    );
    if meta.outcome != TurnOutcome::Answered {
        line.push_str(&format!(" | stopped: {}", meta.outcome));
    }
    line.push(']');
    line
}
