//! CLI commands
//!
//! Special commands that can be executed in the REPL. A command word only
//! counts as a command when it has the expected arguments, so questions such
//! as "history of refunds by month" still reach the analyst.

use crate::agent::Analyst;
use crate::core::Result;

/// Result of parsing a command
#[derive(Debug, PartialEq)]
pub enum CommandResult {
    /// Continue processing as normal input
    Continue(String),
    /// Command was handled, show output
    Handled(String),
    /// Exit the REPL
    Exit,
    /// Start a fresh thread
    NewThread,
    /// Switch to an existing thread
    SwitchThread(String),
}

/// Parse and handle special commands
pub async fn handle_command(
    input: &str,
    analyst: &Analyst,
    thread_id: Option<&str>,
) -> Result<CommandResult> {
    let input = input.trim();
    let stripped = input.strip_prefix('/').unwrap_or(input);
    let parts: Vec<&str> = stripped.split_whitespace().collect();
    let cmd = parts.first().map(|c| c.to_lowercase()).unwrap_or_default();
    let args = &parts[1.min(parts.len())..];

    match (cmd.as_str(), args) {
        ("exit" | "quit" | "q", []) => Ok(CommandResult::Exit),

        ("help" | "?", []) => Ok(CommandResult::Handled(help_text())),

        ("new" | "reset", []) => Ok(CommandResult::NewThread),

        ("thread", []) => Ok(CommandResult::Handled(match thread_id {
            Some(id) => format!("Current thread: {}", id),
            None => "No thread yet. Ask a question to start one.".to_string(),
        })),

        ("thread", [id]) => Ok(CommandResult::SwitchThread(id.to_string())),

        ("history", []) => {
            let Some(id) = thread_id else {
                return Ok(CommandResult::Handled("No conversation yet.".to_string()));
            };
            let entries = analyst.history(id).await?;
            if entries.is_empty() {
                return Ok(CommandResult::Handled(format!("Thread {} has no turns.", id)));
            }

            let mut output = format!("History of thread {}:\n", id);
            for (i, entry) in entries.iter().enumerate() {
                output.push_str(&format!(
                    "\n[{}] You: {}\n    Assistant: {}\n",
                    i + 1,
                    entry.question,
                    entry.answer.replace('\n', "\n    ")
                ));
            }
            Ok(CommandResult::Handled(output))
        }

        ("status", []) => {
            let config = analyst.config();
            let status = format!(
                "bq-analyst status:\n\
                 ─────────────────────────────\n\
                 Project:         {}\n\
                 Model:           {} ({})\n\
                 Temperature:     {}\n\
                 Recursion limit: {}\n\
                 Max rows:        {}\n\
                 Sessions:        {}\n\
                 Thread:          {}",
                config.google.project_id,
                config.model.name,
                analyst.provider_name(),
                config.model.temperature,
                config.agent.recursion_limit,
                config.agent.max_rows,
                if analyst.sessions_persistent() {
                    "persistent"
                } else {
                    "in-memory"
                },
                thread_id.unwrap_or("(none)")
            );
            Ok(CommandResult::Handled(status))
        }

        ("tools", []) => {
            let mut output = String::from("Available tools:\n");
            for def in analyst.tool_definitions() {
                output.push_str(&format!(
                    "  {:<18} {}\n",
                    def.function.name, def.function.description
                ));
            }
            Ok(CommandResult::Handled(output))
        }

        _ => {
            if input.starts_with('/') {
                Ok(CommandResult::Handled(format!(
                    "Unknown command: {}. Type 'help' for available commands.",
                    cmd
                )))
            } else {
                Ok(CommandResult::Continue(input.to_string()))
            }
        }
    }
}

/// Generate help text
fn help_text() -> String {
    r#"bq-analyst commands:
─────────────────────────────────────────────
  help, ?          Show this help message
  exit, quit, q    Exit
  new              Start a new conversation thread
  thread           Show the current thread id
  thread <id>      Continue an existing thread
  history          Show questions and answers of this thread
  status           Show current configuration
  tools            List the tools the analyst can use

Anything else is sent to the analyst as a question.

Keyboard Shortcuts:
  Ctrl+D           Exit
─────────────────────────────────────────────"#
        .to_string()
}
