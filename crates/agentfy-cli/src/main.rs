//! CLI entry point for agentfy.
//!
//! This binary provides the `agentfy` command with subcommands for
//! inspecting the capability registry, planning a request, and running the
//! interactive workflow REPL.

mod cli;
mod config;
mod helpers;
mod remote;
mod repl;

use agentfy_registry::Category;
use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;

use cli::{Cli, Commands};
use config::AppConfig;
use helpers::{init_tracing, load_catalog, print_plan};

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;
    init_tracing(&config.log_level, config.log_format);

    match cli.command {
        Commands::Catalog => cmd_catalog(&config),
        Commands::Plan { request } => cmd_plan(&config, &request).await,
        Commands::Run { request } => repl::cmd_run(&config, request).await,
    }
}

// ---------------------------------------------------------------------------
// Subcommand: catalog
// ---------------------------------------------------------------------------

fn cmd_catalog(config: &AppConfig) -> Result<()> {
    let registry = load_catalog(config)?;
    let rendered = serde_json::to_string_pretty(&registry.describe())
        .context("failed to serialize catalog")?;
    println!("{rendered}");

    // Summary goes to stderr so stdout stays valid JSON.
    let counts: Vec<String> = [Category::Crawler, Category::Analysis, Category::Interactive]
        .into_iter()
        .map(|category| {
            let count = registry.by_category(category).len();
            format!("{count} {}", category.section())
        })
        .collect();
    eprintln!("  {} capabilities: {}", registry.len(), counts.join(", "));
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: plan
// ---------------------------------------------------------------------------

async fn cmd_plan(config: &AppConfig, request: &str) -> Result<()> {
    let registry = load_catalog(config)?;
    let planner = helpers::build_planner(config)?;

    let workflow = planner
        .plan(request, &registry, &[])
        .await
        .context("planning failed")?;
    print_plan(&workflow);

    let missing = agentfy_agent::resolve(&workflow, &registry).unresolved;
    let rendered = serde_json::to_string_pretty(&json!({
        "workflow": workflow,
        "missing_inputs": missing,
    }))
    .context("failed to serialize workflow")?;
    println!("{rendered}");
    Ok(())
}
