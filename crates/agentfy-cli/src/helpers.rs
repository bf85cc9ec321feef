//! Shared helpers for the agentfy CLI subcommands.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use agentfy_agent::{LlmClient, MissingInput, Planner, Workflow};
use agentfy_registry::{Agent, CatalogDocument, Registry, RegistryBuilder, ValueType};

use crate::config::{AppConfig, LogFormat};
use crate::remote::remote_agents;

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Initialize the tracing subscriber.  `RUST_LOG` wins over `default_level`.
pub fn init_tracing(default_level: &str, format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    match format {
        LogFormat::Compact => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .init(),
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Load the catalog without binding any implementation.
pub fn load_catalog(config: &AppConfig) -> Result<Registry> {
    let path = &config.registry.path;
    let document = CatalogDocument::from_path(path)
        .with_context(|| format!("failed to load registry {}", path.display()))?;
    RegistryBuilder::new(document)
        .build_catalog_only()
        .context("invalid capability registry")
}

/// Load the catalog and bind every agent that has an HTTP endpoint.
///
/// Agents without one stay unbound; steps that use them fail at dispatch.
pub fn load_registry(config: &AppConfig) -> Result<Registry> {
    let path = &config.registry.path;
    let document = CatalogDocument::from_path(path)
        .with_context(|| format!("failed to load registry {}", path.display()))?;

    let catalog = RegistryBuilder::new(document.clone())
        .build_catalog_only()
        .context("invalid capability registry")?;
    let (agents, unbound) = remote_agents(&catalog, &config.agents)?;

    let mut builder = RegistryBuilder::new(document);
    for agent in agents {
        info!(agent_id = %agent.agent_id(), endpoint = %agent.endpoint(), "agent bound");
        builder = builder.bind(Arc::new(agent));
    }

    if unbound.is_empty() {
        builder.build().context("failed to bind capability implementations")
    } else {
        warn!(agents = ?unbound, "no endpoint configured, these agents cannot run");
        builder
            .build_catalog_only()
            .context("failed to bind capability implementations")
    }
}

// ---------------------------------------------------------------------------
// Planner
// ---------------------------------------------------------------------------

/// Build the planner from the configured LLM provider.
pub fn build_planner(config: &AppConfig) -> Result<Planner> {
    let llm_config = config.llm_client_config()?;
    let provider = llm_config.provider;
    let llm = LlmClient::new(llm_config).context("failed to create LLM client")?;
    info!(provider = ?provider, model = %config.llm.model, "LLM client ready");
    Ok(Planner::new(Arc::new(llm), config.planner_config()))
}

// ---------------------------------------------------------------------------
// User input
// ---------------------------------------------------------------------------

/// Turn a line typed by the user into a value for a parameter of type
/// `value_type`.
///
/// Text is parsed as JSON when possible.  String parameters take the line
/// verbatim unless it is a quoted JSON string, and a plain line given for a
/// list of strings becomes a one-element list.
pub fn parse_input_value(text: &str, value_type: &ValueType) -> Value {
    let text = text.trim();
    let parsed: Option<Value> = serde_json::from_str(text).ok();

    match value_type {
        ValueType::String => match parsed {
            Some(Value::String(s)) => Value::String(s),
            _ => Value::String(text.to_owned()),
        },
        ValueType::List(element) if **element == ValueType::String => match parsed {
            Some(Value::Array(items)) => Value::Array(items),
            Some(Value::String(s)) => Value::Array(vec![Value::String(s)]),
            _ => Value::Array(vec![Value::String(text.to_owned())]),
        },
        _ => parsed.unwrap_or_else(|| Value::String(text.to_owned())),
    }
}

// ---------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------

/// Print a short human-readable outline of a planned workflow.
pub fn print_plan(workflow: &Workflow) {
    println!();
    if workflow.name.is_empty() {
        println!("  Plan ({} steps)", workflow.steps.len());
    } else {
        println!("  Plan: {} ({} steps)", workflow.name, workflow.steps.len());
    }
    for (i, step) in workflow.steps.iter().enumerate() {
        println!(
            "  {}. [{}] {}.{} {}",
            i + 1,
            step.step_id,
            step.agent_id,
            step.function_id,
            step.description
        );
        for (name, binding) in &step.input_bindings {
            println!("       {name} = {binding}");
        }
    }
    for conflict in &workflow.conflicts {
        println!(
            "  ! conflict on {}.{}: {}",
            conflict.step_id, conflict.parameter, conflict.reason
        );
    }
    println!();
}

/// One-line prompt label for a missing input.
pub fn describe_missing(input: &MissingInput) -> String {
    let mut label = format!("{}.{} ({})", input.step_id, input.name, input.value_type);
    if !input.description.is_empty() {
        label.push_str(&format!(" -- {}", input.description));
    }
    if !input.suggestions.is_empty() {
        let options: Vec<String> = input.suggestions.iter().map(Value::to_string).collect();
        label.push_str(&format!(" [{}]", options.join(", ")));
    }
    label
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_parameters_take_text_verbatim() {
        assert_eq!(parse_input_value("42", &ValueType::String), json!("42"));
        assert_eq!(parse_input_value("\"quoted\"", &ValueType::String), json!("quoted"));
        assert_eq!(parse_input_value(" elon ", &ValueType::String), json!("elon"));
    }

    #[test]
    fn string_lists_wrap_plain_text() {
        let list = ValueType::List(Box::new(ValueType::String));
        assert_eq!(
            parse_input_value("AI is eating the world!", &list),
            json!(["AI is eating the world!"])
        );
        assert_eq!(parse_input_value(r#"["a", "b"]"#, &list), json!(["a", "b"]));
    }

    #[test]
    fn other_types_parse_json_with_string_fallback() {
        assert_eq!(parse_input_value("3", &ValueType::Integer), json!(3));
        assert_eq!(parse_input_value("true", &ValueType::Boolean), json!(true));
        assert_eq!(parse_input_value("{\"a\": 1}", &ValueType::Object), json!({"a": 1}));
        assert_eq!(parse_input_value("three", &ValueType::Integer), json!("three"));
    }

    #[test]
    fn missing_input_label_lists_suggestions() {
        let input = MissingInput {
            step_id: "step1".into(),
            name: "search_type".into(),
            description: "Result ordering".into(),
            value_type: ValueType::String,
            suggestions: vec![json!("Top"), json!("Latest")],
        };
        assert_eq!(
            describe_missing(&input),
            "step1.search_type (string) -- Result ordering [\"Top\", \"Latest\"]"
        );
    }
}
