//! CLI module - command-line interface
//!
//! Contains the REPL and the commands it understands.

pub mod commands;
pub mod repl;

pub use repl::Repl;
