//! Parameter resolution.
//!
//! Works out, per step, which argument values are available right now.  For
//! each declared parameter the sources are tried in order:
//!
//! 1. a literal bound at planning time,
//! 2. a field of a succeeded earlier step's result (if the field is absent,
//!    resolution falls through to the next source),
//! 3. a value the user supplied after an `awaiting_input` pause,
//! 4. the capability's declared default.
//!
//! A required parameter left without a value is reported as a
//! [`MissingInput`]; an optional one is omitted.  Values are never guessed.

use std::collections::BTreeMap;

use agentfy_registry::{Arguments, CapabilityEntry, Registry, ValueType};
use serde::Serialize;
use serde_json::Value;

use crate::workflow::{Binding, StepStatus, Workflow, extract_path};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A required parameter the user must supply before its step can run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissingInput {
    pub step_id: String,
    pub name: String,
    pub description: String,
    pub value_type: ValueType,
    /// Values worth offering the user, e.g. the allowed enum values.
    pub suggestions: Vec<Value>,
}

/// Resolution state of one step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepInputs {
    /// Every required parameter has a value.
    Ready(Arguments),
    /// The step references a step that has not succeeded yet.
    Waiting { step_id: String },
    /// Required parameters without any value source.
    Missing(Vec<MissingInput>),
}

/// Result of resolving a whole workflow.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    /// Arguments of every not-yet-run step whose inputs are complete.
    pub arguments: BTreeMap<String, Arguments>,
    /// Required parameters that only the user can fill.
    pub unresolved: Vec<MissingInput>,
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Resolve the inputs of `workflow.steps[index]` against its capability.
///
/// Missing inputs take precedence over waiting on an earlier step, so the
/// user can be asked for everything up front.
pub fn resolve_step(workflow: &Workflow, index: usize, entry: &CapabilityEntry) -> StepInputs {
    let step = &workflow.steps[index];
    let mut arguments = Arguments::new();
    let mut missing = Vec::new();
    let mut waiting_on: Option<String> = None;

    for param in &entry.parameters {
        let binding = step.input_bindings.get(&param.name).unwrap_or(&Binding::Unbound);

        match binding {
            Binding::Literal { value } => {
                arguments.insert(param.name.clone(), value.clone());
                continue;
            }
            Binding::StepOutput { step_id, path } => {
                match workflow.step(step_id) {
                    Some(source) if source.status == StepStatus::Succeeded => {
                        if let Some(value) = source
                            .result
                            .as_ref()
                            .and_then(|result| extract_path(result, path))
                        {
                            arguments.insert(param.name.clone(), value.clone());
                            continue;
                        }
                        tracing::debug!(
                            step_id = %step.step_id,
                            parameter = %param.name,
                            reference = %binding,
                            "referenced field absent, falling back"
                        );
                    }
                    _ => {
                        waiting_on.get_or_insert_with(|| step_id.clone());
                        continue;
                    }
                }
            }
            Binding::Unbound => {}
        }

        if let Some(value) = step.supplied.get(&param.name) {
            arguments.insert(param.name.clone(), value.clone());
        } else if let Some(default) = &param.default {
            arguments.insert(param.name.clone(), default.clone());
        } else if param.required {
            missing.push(MissingInput {
                step_id: step.step_id.clone(),
                name: param.name.clone(),
                description: param.description.clone(),
                value_type: param.value_type.clone(),
                suggestions: param.allowed.clone().unwrap_or_default(),
            });
        }
    }

    if !missing.is_empty() {
        StepInputs::Missing(missing)
    } else if let Some(step_id) = waiting_on {
        StepInputs::Waiting { step_id }
    } else {
        StepInputs::Ready(arguments)
    }
}

/// Resolve every step that has not run yet.
///
/// Steps whose capability is not in the registry are skipped here; the
/// executor reports them when it reaches them.
pub fn resolve(workflow: &Workflow, registry: &Registry) -> Resolution {
    let mut resolution = Resolution::default();

    for (index, step) in workflow.steps.iter().enumerate() {
        if !matches!(step.status, StepStatus::Pending | StepStatus::AwaitingInput) {
            continue;
        }
        let Some(entry) = registry.lookup(&step.agent_id, &step.function_id) else {
            continue;
        };
        match resolve_step(workflow, index, entry) {
            StepInputs::Ready(arguments) => {
                resolution.arguments.insert(step.step_id.clone(), arguments);
            }
            StepInputs::Missing(inputs) => resolution.unresolved.extend(inputs),
            StepInputs::Waiting { .. } => {}
        }
    }

    resolution
}

/// Re-derive `pending` / `awaiting_input` for every step that has not run,
/// returning the inputs the user still has to supply.
pub(crate) fn refresh_step_statuses(
    workflow: &mut Workflow,
    registry: &Registry,
) -> Vec<MissingInput> {
    let mut unresolved = Vec::new();

    for index in 0..workflow.steps.len() {
        let step = &workflow.steps[index];
        if !matches!(step.status, StepStatus::Pending | StepStatus::AwaitingInput) {
            continue;
        }
        let Some(entry) = registry.lookup(&step.agent_id, &step.function_id) else {
            continue;
        };
        let status = match resolve_step(workflow, index, entry) {
            StepInputs::Missing(inputs) => {
                unresolved.extend(inputs);
                StepStatus::AwaitingInput
            }
            _ => StepStatus::Pending,
        };
        workflow.steps[index].status = status;
    }

    unresolved
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
