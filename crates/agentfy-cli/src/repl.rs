//! Subcommand: `agentfy run` -- interactive workflow REPL.
//!
//! Each request is planned, shown to the user, then executed step by step.
//! When a step needs a value nobody supplied, the REPL asks for it and
//! resumes the workflow.  Answers are free text read by the planner's model;
//! `/fields` switches to asking for each value on its own.

use std::io::{self, Write as _};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use agentfy_agent::{Advance, Executor, Message, MissingInput, Planner, SuppliedInput, Workflow};
use agentfy_registry::Registry;

use crate::config::AppConfig;
use crate::helpers::{build_planner, describe_missing, load_registry, parse_input_value, print_plan};

/// Run the interactive REPL.
pub async fn cmd_run(config: &AppConfig, initial_request: Option<String>) -> Result<()> {
    info!("starting agentfy");

    let planner = build_planner(config)?;
    let registry = Arc::new(load_registry(config)?);
    let executor = Executor::new(Arc::clone(&registry), config.executor_config());

    println!();
    println!("  agentfy v{}", env!("CARGO_PKG_VERSION"));
    println!("  Platforms: {}", registry.platforms().join(", "));
    println!("  Capabilities: {}", registry.len());
    println!("  Type your request, or 'quit' to exit.");
    println!();

    let mut history: Vec<Message> = Vec::new();

    if let Some(request) = initial_request {
        handle_request(&planner, &executor, &registry, &mut history, request.trim()).await?;
    }

    let stdin = io::stdin();
    let mut line_buf = String::new();

    loop {
        print!("> ");
        io::stdout().flush().ok();

        line_buf.clear();
        match stdin.read_line(&mut line_buf) {
            Ok(0) => {
                println!();
                info!("EOF received, exiting");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                eprintln!("  Error reading input: {e}");
                continue;
            }
        }

        let trimmed = line_buf.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed == "quit" || trimmed == "exit" {
            info!("user requested exit");
            break;
        }

        handle_request(&planner, &executor, &registry, &mut history, trimmed).await?;
    }

    Ok(())
}

/// Plan, confirm inputs for, and execute one request.
async fn handle_request(
    planner: &Planner,
    executor: &Executor,
    registry: &Registry,
    history: &mut Vec<Message>,
    request: &str,
) -> Result<()> {
    let mut workflow = match planner.plan(request, registry, history.as_slice()).await {
        Ok(workflow) => workflow,
        Err(e) => {
            warn!(error = %e, "planning failed");
            eprintln!("  Could not plan this request: {e}");
            history.push(Message::user(request));
            history.push(Message::assistant(format!("Planning failed: {e}")));
            return Ok(());
        }
    };

    print_plan(&workflow);
    drive(planner, executor, &mut workflow).await?;

    let summary = workflow.summary();
    let rendered =
        serde_json::to_string_pretty(&summary).context("failed to serialize execution summary")?;
    println!("{rendered}");
    println!();

    history.push(Message::user(request));
    history.push(Message::assistant(format!(
        "Workflow `{}` finished with status {}: {}",
        workflow.name,
        workflow.status,
        serde_json::to_string(&summary.outputs).unwrap_or_default()
    )));
    Ok(())
}

/// Execute until terminal, asking the user for every missing input.
async fn drive(planner: &Planner, executor: &Executor, workflow: &mut Workflow) -> Result<()> {
    loop {
        match executor.run_until_blocked(workflow).await? {
            Advance::AwaitingParams(missing) => {
                let Some(inputs) = collect_inputs(planner, workflow, &missing).await else {
                    executor.cancel(workflow)?;
                    println!("  Workflow cancelled.");
                    return Ok(());
                };
                if inputs.is_empty() {
                    println!("  No values found in that answer; please try again.");
                } else if let Err(e) = executor.resume(workflow, inputs) {
                    eprintln!("  {e}");
                }
            }
            _ if workflow.is_terminal() => return Ok(()),
            // run_until_blocked only stops when blocked or terminal.
            other => {
                warn!(advance = ?other, "executor stopped unexpectedly");
                return Ok(());
            }
        }
    }
}

/// Ask for the missing inputs in one free-text answer.
///
/// Returns `None` when the user cancels.  An answer the model cannot read
/// yields an empty list so the caller asks again.
async fn collect_inputs(
    planner: &Planner,
    workflow: &Workflow,
    missing: &[MissingInput],
) -> Option<Vec<SuppliedInput>> {
    println!("  The workflow needs more information:");
    for input in missing {
        println!("  {}", describe_missing(input));
    }
    println!("  Answer in your own words, '/fields' to answer one by one, or 'cancel'.");

    let answer = read_answer()?;
    if answer == "/fields" {
        return prompt_inputs(missing);
    }

    match planner.extract_inputs(workflow, missing, &answer).await {
        Ok(inputs) => Some(inputs),
        Err(e) => {
            warn!(error = %e, "input extraction failed");
            eprintln!("  Could not read that answer: {e}");
            Some(Vec::new())
        }
    }
}

/// Ask for each missing input on stdin.
///
/// Returns `None` when the user cancels or closes stdin.
fn prompt_inputs(missing: &[MissingInput]) -> Option<Vec<SuppliedInput>> {
    let mut inputs = Vec::with_capacity(missing.len());
    for input in missing {
        println!("  {}", describe_missing(input));
        let text = read_answer()?;
        inputs.push(SuppliedInput::new(
            input.step_id.clone(),
            input.name.clone(),
            parse_input_value(&text, &input.value_type),
        ));
    }
    Some(inputs)
}

/// Read one trimmed line.  A blank line, `cancel` or EOF yield `None`.
fn read_answer() -> Option<String> {
    print!("  ? ");
    io::stdout().flush().ok();

    let mut line = String::new();
    match io::stdin().read_line(&mut line) {
        Ok(0) | Err(_) => return None,
        Ok(_) => {}
    }
    let text = line.trim();
    if text.is_empty() || text == "cancel" {
        return None;
    }
    Some(text.to_owned())
}
