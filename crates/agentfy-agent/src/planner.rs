//! Workflow planner.
//!
//! Turns a natural-language request into a validated [`Workflow`] by asking a
//! [`LanguageModel`] for a structured plan over the capabilities in the
//! [`Registry`].  The model's reply is untrusted input: it is parsed into a
//! strict structure, every step is checked against the registry, and a plan
//! that fails any check is rejected as a whole.
//!
//! Structural parse failures get a bounded number of corrective retries in
//! which the model sees its previous reply and the parse error.  Semantic
//! failures (unknown capability, type mismatch, forward reference) are
//! returned immediately.
//!
//! The same model also reads free-text answers to a paused workflow's
//! questions ([`Planner::extract_inputs`]).  Whatever it extracts is still
//! validated by [`Executor::resume`](crate::Executor::resume) before use.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use agentfy_registry::{CapabilityEntry, Registry, ValueType};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{AgentError, PlanningError};
use crate::executor::SuppliedInput;
use crate::llm::{ChatRequest, LanguageModel, Message, Role};
use crate::resolver::{MissingInput, refresh_step_statuses};
use crate::workflow::{Binding, ParameterConflict, Workflow, WorkflowStatus, WorkflowStep};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for the planner.
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Model identifier passed to the language model.  Empty means the
    /// backend's default.
    pub model: String,

    /// Maximum tokens for the planning response.
    pub max_tokens: u32,

    /// Sampling temperature (low for deterministic planning).
    pub temperature: f32,

    /// Corrective retries allowed after a structurally malformed reply.
    pub max_repair_attempts: u32,

    /// How many prior conversation turns are included in the prompt.
    pub history_window: usize,

    /// Upper bound on a single language-model call.
    pub request_timeout: Duration,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            max_tokens: 4096,
            temperature: 0.0,
            max_repair_attempts: 1,
            history_window: 5,
            request_timeout: Duration::from_secs(120),
        }
    }
}

// ---------------------------------------------------------------------------
// Raw plan (wire shape of the model reply)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawPlan {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    steps: Vec<RawStep>,
    /// Ignored: missing inputs are derived from the registry schema.
    #[serde(default)]
    #[allow(dead_code)]
    missing_parameters: Option<Vec<Value>>,
    #[serde(default)]
    parameter_conflicts: Option<Vec<RawConflict>>,
}

#[derive(Debug, Deserialize)]
struct RawStep {
    #[serde(default)]
    step_id: Option<String>,
    agent_id: String,
    function_id: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct RawConflict {
    #[serde(alias = "parameter1", alias = "parameter2")]
    parameter: String,
    #[serde(default)]
    step_id: Option<String>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    resolution: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawExtraction {
    inputs: Vec<RawInput>,
}

#[derive(Debug, Deserialize)]
struct RawInput {
    step_id: String,
    name: String,
    #[serde(default)]
    value: Value,
}

// ---------------------------------------------------------------------------
// Planner
// ---------------------------------------------------------------------------

/// Produces validated workflows from user requests.
pub struct Planner {
    llm: Arc<dyn LanguageModel>,
    config: PlannerConfig,
}

impl Planner {
    pub fn new(llm: Arc<dyn LanguageModel>, config: PlannerConfig) -> Self {
        Self { llm, config }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Plan a workflow for `request`.
    ///
    /// `history` holds prior conversation turns; only the last
    /// `history_window` are sent.  On success the workflow is in
    /// [`WorkflowStatus::AwaitingParams`] when some required input has no
    /// value source, otherwise [`WorkflowStatus::Executing`].
    pub async fn plan(
        &self,
        request: &str,
        registry: &Registry,
        history: &[Message],
    ) -> Result<Workflow, PlanningError> {
        tracing::info!(request = %request, capabilities = registry.len(), "planning workflow");

        let messages = vec![
            Message::system(build_system_prompt(registry)),
            Message::user(self.build_user_prompt(request, history)),
        ];
        let raw = self.complete_parsed(messages, "workflow plan", parse_plan).await?;

        let mut workflow = build_workflow(request, raw, registry)?;
        let missing = refresh_step_statuses(&mut workflow, registry);
        workflow.status = if missing.is_empty() {
            WorkflowStatus::Executing
        } else {
            WorkflowStatus::AwaitingParams
        };
        workflow.touch();

        tracing::info!(
            workflow_id = %workflow.workflow_id,
            steps = workflow.steps.len(),
            missing = missing.len(),
            status = %workflow.status,
            "workflow planned"
        );

        Ok(workflow)
    }

    /// Read values for `missing` out of the user's free-text `answer`.
    ///
    /// Only inputs the answer actually states are returned; the rest stay
    /// open.  Pairs the model invents that are not in `missing`, and null
    /// values, are dropped.  Types are not checked here: pass the result to
    /// [`Executor::resume`](crate::Executor::resume), which rejects anything
    /// that does not fit.
    pub async fn extract_inputs(
        &self,
        workflow: &Workflow,
        missing: &[MissingInput],
        answer: &str,
    ) -> Result<Vec<SuppliedInput>, PlanningError> {
        if missing.is_empty() {
            return Ok(Vec::new());
        }
        tracing::info!(
            workflow_id = %workflow.workflow_id,
            missing = missing.len(),
            "extracting inputs from free text"
        );

        let messages = vec![
            Message::system(build_extraction_prompt(workflow, missing)),
            Message::user(format!("User answer: {answer}")),
        ];
        let raw = self
            .complete_parsed(messages, "input list", parse_extraction)
            .await?;

        let mut inputs = Vec::with_capacity(raw.inputs.len());
        for input in raw.inputs {
            let asked = missing
                .iter()
                .any(|m| m.step_id == input.step_id && m.name == input.name);
            if !asked {
                tracing::warn!(
                    step_id = %input.step_id,
                    name = %input.name,
                    "model returned an input nobody asked for, dropping"
                );
                continue;
            }
            if input.value.is_null()
                || inputs.iter().any(|i: &SuppliedInput| {
                    i.step_id == input.step_id && i.name == input.name
                })
            {
                continue;
            }
            inputs.push(SuppliedInput::new(input.step_id, input.name, input.value));
        }

        tracing::info!(
            workflow_id = %workflow.workflow_id,
            extracted = inputs.len(),
            "inputs extracted"
        );
        Ok(inputs)
    }

    /// Call the model and parse its reply, asking for a corrected reply up
    /// to `max_repair_attempts` times when parsing fails.
    async fn complete_parsed<T>(
        &self,
        mut messages: Vec<Message>,
        expected: &str,
        parse: fn(&str) -> Result<T, String>,
    ) -> Result<T, PlanningError> {
        let mut repairs = 0;
        loop {
            let text = self.complete(&messages).await?;
            tracing::debug!(response_len = text.len(), repairs, expected, "response received");

            match parse(&text) {
                Ok(parsed) => return Ok(parsed),
                Err(reason) if repairs < self.config.max_repair_attempts => {
                    repairs += 1;
                    tracing::warn!(
                        reason = %reason,
                        attempt = repairs,
                        expected,
                        "malformed response, requesting repair"
                    );
                    messages.push(Message::assistant(text));
                    messages.push(Message::user(build_repair_prompt(expected, &reason)));
                }
                Err(reason) => {
                    tracing::warn!(reason = %reason, expected, "malformed response after repairs");
                    return Err(PlanningError::MalformedResponse { reason });
                }
            }
        }
    }

    async fn complete(&self, messages: &[Message]) -> Result<String, PlanningError> {
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: messages.to_vec(),
            temperature: Some(self.config.temperature),
            max_tokens: Some(self.config.max_tokens),
        };

        match tokio::time::timeout(self.config.request_timeout, self.llm.complete(&request)).await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(AgentError::Provider { reason })) => Err(PlanningError::Provider { reason }),
            Ok(Err(e)) => Err(PlanningError::Provider {
                reason: e.to_string(),
            }),
            Err(_elapsed) => Err(PlanningError::Provider {
                reason: format!("timed out after {:?}", self.config.request_timeout),
            }),
        }
    }

    fn build_user_prompt(&self, request: &str, history: &[Message]) -> String {
        let mut prompt = String::new();

        let start = history.len().saturating_sub(self.config.history_window);
        let recent = &history[start..];
        if !recent.is_empty() {
            prompt.push_str("Conversation so far:\n");
            for message in recent {
                let speaker = match message.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                prompt.push_str(&format!("{speaker}: {}\n", message.content));
            }
            prompt.push('\n');
        }

        prompt.push_str(&format!("User request: {request}"));
        prompt
    }
}

impl std::fmt::Debug for Planner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Planner").field("config", &self.config).finish()
    }
}

// ---------------------------------------------------------------------------
// Prompts
// ---------------------------------------------------------------------------

fn build_system_prompt(registry: &Registry) -> String {
    format!(
        r#"You are a workflow planner. Turn the user's request into an ordered list of steps, each calling exactly one of the available capabilities below.

## Available capabilities

{catalog:#}

## Rules

- Use only the agent_id / function_id pairs listed above.
- Use only parameter names declared by the chosen function.
- Order steps so that each step only uses outputs of earlier steps.
- To pass an earlier step's result, use the exact string "{{{{<step_id>.output}}}}", or "{{{{<step_id>.output.<field>}}}}" for one field of it.
- If the user did not provide a required value and no earlier step produces it, set the parameter to null. Never invent values.
- Report contradictory values for a parameter in "parameter_conflicts".

Respond with valid JSON (no markdown fencing) in this exact structure:
{{
  "name": "short workflow name",
  "description": "what the workflow does",
  "steps": [
    {{
      "step_id": "step1",
      "agent_id": "<agent_id>",
      "function_id": "<function_id>",
      "description": "what this step does",
      "parameters": {{"<name>": <value or null>}}
    }}
  ],
  "parameter_conflicts": [
    {{"parameter": "<name>", "step_id": "step1", "reason": "...", "resolution": "..."}}
  ]
}}"#,
        catalog = registry.describe()
    )
}

fn build_extraction_prompt(workflow: &Workflow, missing: &[MissingInput]) -> String {
    let questions: Vec<Value> = missing
        .iter()
        .map(|m| {
            serde_json::json!({
                "step_id": m.step_id,
                "name": m.name,
                "type": m.value_type.to_string(),
                "description": m.description,
                "suggestions": m.suggestions,
            })
        })
        .collect();

    format!(
        r#"A workflow is paused because some inputs have no value yet. Read the user's answer and pick out the values it gives for these inputs.

Original request: {request}

## Open inputs

{questions:#}

## Rules

- Only use values the user actually states. Never invent or guess a value.
- Leave out any input the answer does not mention.
- Give each value the JSON type listed for its input (a list for list types, a number for int).

Respond with valid JSON (no markdown fencing) in this exact structure:
{{
  "inputs": [
    {{"step_id": "<step_id>", "name": "<name>", "value": <value>}}
  ]
}}"#,
        request = workflow.original_request,
        questions = Value::Array(questions),
    )
}

fn build_repair_prompt(expected: &str, reason: &str) -> String {
    format!(
        "Your previous reply could not be parsed as a {expected}: {reason}\n\
         Reply again with only the JSON object in the required structure."
    )
}

// ---------------------------------------------------------------------------
// Parsing and validation
// ---------------------------------------------------------------------------

/// Parse the model reply into the raw plan structure.
fn parse_plan(text: &str) -> Result<RawPlan, String> {
    let json_text = extract_json_block(text);
    if json_text.is_empty() {
        return Err("empty response".into());
    }
    serde_json::from_str(json_text).map_err(|e| format!("invalid plan JSON: {e}"))
}

/// Parse the model reply into extracted inputs.
fn parse_extraction(text: &str) -> Result<RawExtraction, String> {
    let json_text = extract_json_block(text);
    if json_text.is_empty() {
        return Err("empty response".into());
    }
    serde_json::from_str(json_text).map_err(|e| format!("invalid input JSON: {e}"))
}

/// Check a raw plan against the registry and build the workflow.
///
/// Validation is all-or-nothing: the first violation rejects the plan.
fn build_workflow(
    request: &str,
    raw: RawPlan,
    registry: &Registry,
) -> Result<Workflow, PlanningError> {
    if raw.steps.is_empty() {
        return Err(PlanningError::EmptyPlan);
    }

    let mut seen: HashSet<String> = HashSet::new();
    let mut steps: Vec<WorkflowStep> = Vec::with_capacity(raw.steps.len());
    let mut entries: Vec<&CapabilityEntry> = Vec::with_capacity(raw.steps.len());

    for (i, raw_step) in raw.steps.into_iter().enumerate() {
        let step_id = raw_step
            .step_id
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("step{}", i + 1));

        if !seen.insert(step_id.clone()) {
            return Err(PlanningError::MalformedResponse {
                reason: format!("duplicate step id `{step_id}`"),
            });
        }

        let entry = registry
            .lookup(&raw_step.agent_id, &raw_step.function_id)
            .ok_or_else(|| PlanningError::UnknownCapability {
                step_id: step_id.clone(),
                agent_id: raw_step.agent_id.clone(),
                function_id: raw_step.function_id.clone(),
            })?;

        let mut input_bindings = BTreeMap::new();
        for (name, value) in raw_step.parameters.unwrap_or_default() {
            let param = entry.parameter(&name).ok_or_else(|| PlanningError::TypeMismatch {
                step_id: step_id.clone(),
                parameter: name.clone(),
                reason: format!("not a parameter of `{}`", entry.qualified_name()),
            })?;

            let binding = Binding::from_plan_value(value);
            match &binding {
                Binding::Literal { value } => {
                    param.check(value).map_err(|reason| PlanningError::TypeMismatch {
                        step_id: step_id.clone(),
                        parameter: name.clone(),
                        reason,
                    })?;
                }
                Binding::StepOutput {
                    step_id: reference,
                    path,
                } => {
                    let source = steps
                        .iter()
                        .position(|s| &s.step_id == reference)
                        .ok_or_else(|| PlanningError::ForwardReference {
                            step_id: step_id.clone(),
                            reference: binding.to_string(),
                        })?;

                    let source_type = output_type(&entries[source].returns.value_type, path);
                    if !param.value_type.is_assignable_from(&source_type) {
                        return Err(PlanningError::TypeMismatch {
                            step_id: step_id.clone(),
                            parameter: name.clone(),
                            reason: format!(
                                "expects {}, but `{binding}` is {source_type}",
                                param.value_type
                            ),
                        });
                    }
                }
                Binding::Unbound => {}
            }
            input_bindings.insert(name, binding);
        }

        let mut step =
            WorkflowStep::new(step_id, entry.agent_id.clone(), entry.function_id.clone());
        step.description = raw_step.description.unwrap_or_default();
        step.input_bindings = input_bindings;
        steps.push(step);
        entries.push(entry);
    }

    let mut workflow = Workflow::new(request, steps);
    workflow.name = raw.name.unwrap_or_default();
    workflow.description = raw.description.unwrap_or_default();

    for conflict in raw.parameter_conflicts.unwrap_or_default() {
        apply_conflict(&mut workflow, conflict);
    }

    Ok(workflow)
}

/// Record a model-reported conflict and unbind the affected parameter so
/// the user decides its value.
fn apply_conflict(workflow: &mut Workflow, conflict: RawConflict) {
    let target = conflict.step_id.filter(|s| !s.is_empty());

    let mut affected = Vec::new();
    for step in &mut workflow.steps {
        if target.as_deref().is_some_and(|t| t != step.step_id) {
            continue;
        }
        if let Some(binding) = step.input_bindings.get_mut(&conflict.parameter) {
            *binding = Binding::Unbound;
            affected.push(step.step_id.clone());
        }
    }

    if affected.is_empty() {
        tracing::debug!(
            parameter = %conflict.parameter,
            "conflict names no bound parameter, ignoring"
        );
        return;
    }

    tracing::warn!(
        parameter = %conflict.parameter,
        steps = ?affected,
        "parameter conflict reported, value left to the user"
    );

    for step_id in affected {
        workflow.conflicts.push(ParameterConflict {
            step_id,
            parameter: conflict.parameter.clone(),
            reason: conflict.reason.clone().unwrap_or_default(),
            resolution: conflict.resolution.clone().unwrap_or_default(),
        });
    }
}

/// Declared type of a field path into a value of type `root`.
///
/// Numeric segments into a list yield the element type; anything else is
/// only known at run time.
fn output_type(root: &ValueType, path: &[String]) -> ValueType {
    path.iter().fold(root.clone(), |current, segment| match current {
        ValueType::List(element) if segment.parse::<usize>().is_ok() => *element,
        _ => ValueType::Any,
    })
}

/// Extract a JSON block from text that may be wrapped in markdown fences.
fn extract_json_block(text: &str) -> &str {
    let trimmed = text.trim();

    if let Some(start) = trimmed.find("```json") {
        let json_start = start + 7;
        if let Some(end) = trimmed[json_start..].find("```") {
            return trimmed[json_start..json_start + end].trim();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let json_start = start + 3;
        if let Some(end) = trimmed[json_start..].find("```") {
            return trimmed[json_start..json_start + end].trim();
        }
    }

    trimmed
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use agentfy_registry::{CatalogDocument, RegistryBuilder};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    use crate::error::Result;
    use crate::workflow::StepStatus;

    /// Returns canned replies in order and records every request.
    struct ScriptedModel {
        replies: Mutex<Vec<String>>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedModel {
        fn new(replies: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.iter().rev().map(|s| s.to_string()).collect()),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn complete(&self, request: &ChatRequest) -> Result<String> {
            self.requests.lock().unwrap().push(request.clone());
            self.replies
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| AgentError::Provider {
                    reason: "no scripted reply left".into(),
                })
        }
    }

    fn registry() -> Registry {
        let doc = CatalogDocument::from_json_str(
            &json!({
                "x": {
                    "crawlers": [{
                        "agent_id": "x_crawler", "function_id": "fetch_user_tweets",
                        "parameters": [
                            {"name": "screen_name", "type": "str", "required": true},
                            {"name": "max_pages", "type": "int", "required": false, "default": 1}
                        ],
                        "returns": {"type": "List[str]"}
                    }],
                    "interactive": [{
                        "agent_id": "x_interactive", "function_id": "post_tweets",
                        "parameters": [{"name": "messages", "type": "List[str]", "required": true}],
                        "returns": {"type": "bool"}
                    }, {
                        "agent_id": "x_interactive", "function_id": "like_tweet",
                        "parameters": [{"name": "tweet_id", "type": "str", "required": true}],
                        "returns": {"type": "bool"}
                    }]
                }
            })
            .to_string(),
        )
        .unwrap();
        RegistryBuilder::new(doc).build_catalog_only().unwrap()
    }

    fn raw(value: Value) -> RawPlan {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn extract_json_from_fenced_block() {
        let text = "Here is the plan:\n```json\n{\"steps\": []}\n```\nDone.";
        assert_eq!(extract_json_block(text), "{\"steps\": []}");
    }

    #[test]
    fn extract_json_from_bare_fences() {
        let text = "```\n{\"steps\": []}\n```";
        assert_eq!(extract_json_block(text), "{\"steps\": []}");
    }

    #[test]
    fn extract_json_plain() {
        assert_eq!(extract_json_block("  {\"a\": 1}  "), "{\"a\": 1}");
    }

    #[test]
    fn parse_plan_rejects_structural_problems() {
        assert!(parse_plan("not json").is_err());
        assert!(parse_plan("{\"name\": \"no steps\"}").is_err());
        assert!(parse_plan("{\"steps\": [{\"agent_id\": 3}]}").is_err());
        assert!(parse_plan("").is_err());
    }

    #[test]
    fn conflict_accepts_numbered_parameter_key() {
        let plan = parse_plan(
            r#"{"steps": [], "parameter_conflicts": [{"parameter1": "messages", "step_id": "step1", "reason": "two texts"}]}"#,
        )
        .unwrap();
        assert_eq!(plan.parameter_conflicts.unwrap()[0].parameter, "messages");
    }

    #[test]
    fn build_assigns_missing_step_ids() {
        let registry = registry();
        let wf = build_workflow(
            "req",
            raw(json!({"steps": [
                {"agent_id": "x_crawler", "function_id": "fetch_user_tweets",
                 "parameters": {"screen_name": "elon"}},
                {"agent_id": "x_interactive", "function_id": "post_tweets",
                 "parameters": {"messages": "{{step1.output}}"}}
            ]})),
            &registry,
        )
        .unwrap();
        assert_eq!(wf.steps[0].step_id, "step1");
        assert_eq!(wf.steps[1].step_id, "step2");
        assert_eq!(
            wf.steps[1].input_bindings["messages"],
            Binding::StepOutput {
                step_id: "step1".into(),
                path: vec![]
            }
        );
    }

    #[test]
    fn build_rejects_empty_and_duplicate_plans() {
        let registry = registry();
        assert_eq!(
            build_workflow("r", raw(json!({"steps": []})), &registry).unwrap_err(),
            PlanningError::EmptyPlan
        );

        let err = build_workflow(
            "r",
            raw(json!({"steps": [
                {"step_id": "a", "agent_id": "x_interactive", "function_id": "like_tweet"},
                {"step_id": "a", "agent_id": "x_interactive", "function_id": "like_tweet"}
            ]})),
            &registry,
        )
        .unwrap_err();
        assert!(matches!(err, PlanningError::MalformedResponse { .. }));
    }

    #[test]
    fn build_rejects_literal_type_mismatch() {
        let registry = registry();
        let err = build_workflow(
            "r",
            raw(json!({"steps": [
                {"agent_id": "x_interactive", "function_id": "post_tweets",
                 "parameters": {"messages": "hello"}}
            ]})),
            &registry,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            PlanningError::TypeMismatch { ref parameter, .. } if parameter == "messages"
        ));
    }

    #[test]
    fn build_rejects_undeclared_parameter() {
        let registry = registry();
        let err = build_workflow(
            "r",
            raw(json!({"steps": [
                {"agent_id": "x_interactive", "function_id": "like_tweet",
                 "parameters": {"id": "1"}}
            ]})),
            &registry,
        )
        .unwrap_err();
        assert!(matches!(err, PlanningError::TypeMismatch { .. }));
    }

    #[test]
    fn build_rejects_forward_and_self_references() {
        let registry = registry();
        let forward = build_workflow(
            "r",
            raw(json!({"steps": [
                {"step_id": "post", "agent_id": "x_interactive", "function_id": "post_tweets",
                 "parameters": {"messages": "{{fetch.output}}"}},
                {"step_id": "fetch", "agent_id": "x_crawler", "function_id": "fetch_user_tweets",
                 "parameters": {"screen_name": "a"}}
            ]})),
            &registry,
        )
        .unwrap_err();
        assert!(matches!(forward, PlanningError::ForwardReference { .. }));

        let self_ref = build_workflow(
            "r",
            raw(json!({"steps": [
                {"step_id": "like", "agent_id": "x_interactive", "function_id": "like_tweet",
                 "parameters": {"tweet_id": "{{like.output}}"}}
            ]})),
            &registry,
        )
        .unwrap_err();
        assert!(matches!(self_ref, PlanningError::ForwardReference { .. }));
    }

    #[test]
    fn build_checks_referenced_return_type() {
        let registry = registry();
        // bool result cannot feed a List[str] parameter.
        let err = build_workflow(
            "r",
            raw(json!({"steps": [
                {"step_id": "like", "agent_id": "x_interactive", "function_id": "like_tweet",
                 "parameters": {"tweet_id": "1"}},
                {"step_id": "post", "agent_id": "x_interactive", "function_id": "post_tweets",
                 "parameters": {"messages": "{{like.output}}"}}
            ]})),
            &registry,
        )
        .unwrap_err();
        assert!(matches!(err, PlanningError::TypeMismatch { .. }));

        // An indexed element of List[str] is a string.
        let ok = build_workflow(
            "r",
            raw(json!({"steps": [
                {"step_id": "fetch", "agent_id": "x_crawler", "function_id": "fetch_user_tweets",
                 "parameters": {"screen_name": "a"}},
                {"step_id": "like", "agent_id": "x_interactive", "function_id": "like_tweet",
                 "parameters": {"tweet_id": "{{fetch.output.0}}"}}
            ]})),
            &registry,
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn conflicts_unbind_parameter() {
        let registry = registry();
        let wf = build_workflow(
            "r",
            raw(json!({
                "steps": [{"agent_id": "x_interactive", "function_id": "like_tweet",
                           "parameters": {"tweet_id": "1"}}],
                "parameter_conflicts": [{"parameter": "tweet_id", "step_id": "step1",
                                         "reason": "two ids mentioned"}]
            })),
            &registry,
        )
        .unwrap();
        assert_eq!(wf.steps[0].input_bindings["tweet_id"], Binding::Unbound);
        assert_eq!(wf.conflicts.len(), 1);
        assert_eq!(wf.conflicts[0].reason, "two ids mentioned");
    }

    #[test]
    fn output_type_follows_list_indexes() {
        let list = ValueType::List(Box::new(ValueType::String));
        assert_eq!(output_type(&list, &[]), list);
        assert_eq!(output_type(&list, &["0".to_string()]), ValueType::String);
        assert_eq!(output_type(&ValueType::Object, &["a".to_string()]), ValueType::Any);
    }

    #[tokio::test]
    async fn plan_marks_missing_required_input() {
        let registry = registry();
        let model = ScriptedModel::new(&[
            r#"{"name": "Like", "steps": [{"agent_id": "x_interactive", "function_id": "like_tweet", "parameters": {"tweet_id": null}}]}"#,
        ]);
        let planner = Planner::new(model, PlannerConfig::default());

        let wf = planner.plan("like a tweet", &registry, &[]).await.unwrap();
        assert_eq!(wf.status, WorkflowStatus::AwaitingParams);
        assert_eq!(wf.steps[0].status, StepStatus::AwaitingInput);
        assert_eq!(wf.name, "Like");
        assert_eq!(wf.original_request, "like a tweet");
    }

    #[tokio::test]
    async fn plan_repairs_once_then_gives_up() {
        let registry = registry();
        let model = ScriptedModel::new(&["nope", "still nope"]);
        let planner = Planner::new(model.clone(), PlannerConfig::default());

        let err = planner.plan("post", &registry, &[]).await.unwrap_err();
        assert!(matches!(err, PlanningError::MalformedResponse { .. }));

        let requests = model.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        // The repair request carries the previous reply and the parse error.
        let repair = &requests[1].messages;
        assert_eq!(repair[repair.len() - 2].content, "nope");
        assert!(repair[repair.len() - 1].content.contains("could not be parsed"));
    }

    #[tokio::test]
    async fn plan_does_not_repair_semantic_errors() {
        let registry = registry();
        let model = ScriptedModel::new(&[
            r#"{"steps": [{"agent_id": "linkedin_interactive", "function_id": "post", "parameters": {}}]}"#,
        ]);
        let planner = Planner::new(model.clone(), PlannerConfig::default());

        let err = planner.plan("post on linkedin", &registry, &[]).await.unwrap_err();
        assert!(matches!(err, PlanningError::UnknownCapability { .. }));
        assert_eq!(model.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn plan_maps_provider_failure() {
        let registry = registry();
        let planner = Planner::new(ScriptedModel::new(&[]), PlannerConfig::default());
        let err = planner.plan("anything", &registry, &[]).await.unwrap_err();
        assert!(matches!(err, PlanningError::Provider { .. }));
    }

    #[tokio::test]
    async fn plan_includes_only_recent_history() {
        let registry = registry();
        let model = ScriptedModel::new(&[
            r#"{"steps": [{"agent_id": "x_interactive", "function_id": "like_tweet", "parameters": {"tweet_id": "9"}}]}"#,
        ]);
        let config = PlannerConfig {
            history_window: 2,
            ..PlannerConfig::default()
        };
        let planner = Planner::new(model.clone(), config);
        let history = vec![
            Message::user("first turn"),
            Message::assistant("second turn"),
            Message::user("third turn"),
        ];

        let wf = planner.plan("like tweet 9", &registry, &history).await.unwrap();
        assert_eq!(wf.status, WorkflowStatus::Executing);

        let requests = model.requests.lock().unwrap();
        let user_prompt = &requests[0].messages[1].content;
        assert!(!user_prompt.contains("first turn"));
        assert!(user_prompt.contains("second turn"));
        assert!(user_prompt.contains("third turn"));
        assert!(user_prompt.ends_with("User request: like tweet 9"));
        assert!(requests[0].messages[0].content.contains("like_tweet"));
    }

    // -- Free-text inputs ---------------------------------------------------

    fn paused_post_and_like() -> Workflow {
        let mut wf = Workflow::new(
            "post hello then like a tweet",
            vec![
                WorkflowStep::new("post", "x_interactive", "post_tweets"),
                WorkflowStep::new("like", "x_interactive", "like_tweet"),
            ],
        );
        refresh_step_statuses(&mut wf, &registry());
        wf
    }

    fn missing_of(wf: &Workflow) -> Vec<MissingInput> {
        crate::resolver::resolve(wf, &registry()).unresolved
    }

    #[tokio::test]
    async fn extract_inputs_reads_answer_and_drops_unasked_pairs() {
        let wf = paused_post_and_like();
        let missing = missing_of(&wf);
        assert_eq!(missing.len(), 2);

        let model = ScriptedModel::new(&[r#"```json
{"inputs": [
  {"step_id": "post", "name": "messages", "value": ["hello world"]},
  {"step_id": "like", "name": "tweet_id", "value": null},
  {"step_id": "post", "name": "media", "value": "cat.png"}
]}
```"#]);
        let planner = Planner::new(model.clone(), PlannerConfig::default());

        let inputs = planner
            .extract_inputs(&wf, &missing, "post 'hello world', not sure which tweet yet")
            .await
            .unwrap();
        assert_eq!(
            inputs,
            vec![SuppliedInput::new("post", "messages", json!(["hello world"]))]
        );

        let requests = model.requests.lock().unwrap();
        let system = &requests[0].messages[0].content;
        assert!(system.contains("tweet_id"));
        assert!(system.contains("post hello then like a tweet"));
        assert!(requests[0].messages[1].content.contains("not sure which tweet"));
    }

    #[tokio::test]
    async fn extracted_inputs_still_go_through_resume() {
        let registry = Arc::new(registry());
        let executor = crate::Executor::new(Arc::clone(&registry), Default::default());
        let mut wf = paused_post_and_like();
        let missing = missing_of(&wf);

        let model = ScriptedModel::new(&[
            r#"{"inputs": [{"step_id": "post", "name": "messages", "value": "hello"},
                           {"step_id": "like", "name": "tweet_id", "value": "42"}]}"#,
        ]);
        let planner = Planner::new(model, PlannerConfig::default());
        let inputs = planner
            .extract_inputs(&wf, &missing, "say hello and like 42")
            .await
            .unwrap();
        assert_eq!(inputs.len(), 2);

        // A bare string is not a list of strings.
        let err = executor.resume(&mut wf, inputs).unwrap_err();
        assert!(matches!(err, AgentError::InputTypeMismatch { .. }));
        assert!(wf.steps.iter().all(|s| s.supplied.is_empty()));
    }

    #[tokio::test]
    async fn extract_inputs_repairs_malformed_reply() {
        let wf = paused_post_and_like();
        let missing = missing_of(&wf);
        let model = ScriptedModel::new(&[
            "tweet 42 please",
            r#"{"inputs": [{"step_id": "like", "name": "tweet_id", "value": "42"}]}"#,
        ]);
        let planner = Planner::new(model.clone(), PlannerConfig::default());

        let inputs = planner.extract_inputs(&wf, &missing, "like 42").await.unwrap();
        assert_eq!(inputs, vec![SuppliedInput::new("like", "tweet_id", json!("42"))]);

        let requests = model.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        let repair = &requests[1].messages;
        assert!(repair[repair.len() - 1].content.contains("input list"));
    }

    #[tokio::test]
    async fn extract_inputs_without_open_inputs_skips_model() {
        let wf = paused_post_and_like();
        let model = ScriptedModel::new(&[]);
        let planner = Planner::new(model.clone(), PlannerConfig::default());

        let inputs = planner.extract_inputs(&wf, &[], "anything").await.unwrap();
        assert!(inputs.is_empty());
        assert!(model.requests.lock().unwrap().is_empty());
    }
}
