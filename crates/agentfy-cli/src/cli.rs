//! CLI argument definitions for agentfy.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// agentfy -- plan and run multi-step social media workflows from plain
/// language.
#[derive(Parser)]
#[command(
    name = "agentfy",
    version,
    about = "agentfy -- natural-language workflows over a capability registry",
    long_about = "Turns a request such as \"post this tweet\" into a validated plan over the \
                  registered platform capabilities, asks for any missing inputs, and runs it."
)]
pub struct Cli {
    /// Configuration file (defaults to config/default.toml when present).
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the capability registry as the planner sees it.
    Catalog,

    /// Plan a request without executing it.
    Plan {
        /// The request, in plain language.
        request: String,
    },

    /// Start the interactive workflow REPL.
    Run {
        /// Optional first request to run before prompting.
        request: Option<String>,
    },
}
