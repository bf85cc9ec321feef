//! Workflow state model.
//!
//! A [`Workflow`] is the ordered plan produced for one user request, together
//! with everything execution has learned so far: per-step status, results,
//! errors, user-supplied inputs and timing.  The planner creates it, the
//! executor is its sole writer afterwards.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Bindings
// ---------------------------------------------------------------------------

/// `{{step_id.output}}` or `{{step_id.output.field.path}}`.
static REFERENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\{\{\s*([A-Za-z0-9_\-]+)\.output((?:\.[A-Za-z0-9_\-]+)*)\s*\}\}$")
        .unwrap_or_else(|e| unreachable!("reference pattern is valid: {e}"))
});

/// Where a step parameter gets its value from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Binding {
    /// A concrete value fixed at planning time.
    Literal { value: Value },
    /// A field of an earlier step's result.  An empty path means the whole
    /// result.
    StepOutput { step_id: String, path: Vec<String> },
    /// Nothing bound; the value comes from the user or the capability default.
    Unbound,
}

impl Binding {
    /// Interpret a parameter value as proposed by the planner model.
    ///
    /// `null` is unbound, a string of the exact form `{{id.output[.path]}}` is
    /// a step reference, anything else is a literal.
    pub fn from_plan_value(value: Value) -> Self {
        if value.is_null() {
            return Self::Unbound;
        }
        if let Some(text) = value.as_str() {
            if let Some(caps) = REFERENCE_RE.captures(text) {
                let path = caps
                    .get(2)
                    .map(|m| {
                        m.as_str()
                            .split('.')
                            .filter(|s| !s.is_empty())
                            .map(str::to_owned)
                            .collect()
                    })
                    .unwrap_or_default();
                return Self::StepOutput {
                    step_id: caps[1].to_owned(),
                    path,
                };
            }
        }
        Self::Literal { value }
    }

    pub fn is_unbound(&self) -> bool {
        matches!(self, Self::Unbound)
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal { value } => write!(f, "{value}"),
            Self::StepOutput { step_id, path } if path.is_empty() => {
                write!(f, "{{{{{step_id}.output}}}}")
            }
            Self::StepOutput { step_id, path } => {
                write!(f, "{{{{{step_id}.output.{}}}}}", path.join("."))
            }
            Self::Unbound => write!(f, "<unbound>"),
        }
    }
}

/// Follow a field path into a step result.  Numeric segments index lists.
pub fn extract_path<'a>(value: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

/// Lifecycle of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    /// A required parameter has no value; the user must supply one.
    AwaitingInput,
    Running,
    Succeeded,
    Failed,
    /// Never run because the workflow was cancelled.
    Skipped,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::AwaitingInput => "awaiting_input",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Lifecycle of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Planning,
    AwaitingParams,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    /// Completed, failed and cancelled workflows never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Planning => "planning",
            Self::AwaitingParams => "awaiting_params",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Step errors
// ---------------------------------------------------------------------------

/// Classification of a step failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepErrorKind {
    /// The registry has no agent for the step (or none bound).
    AgentNotFound,
    /// The agent exists but does not expose the function.
    FunctionNotFound,
    /// The capability kept failing with a retryable error.
    Transient,
    /// Every attempt exceeded the step timeout.
    Timeout,
    /// The capability reported a permanent failure.
    Capability,
    /// A resolved argument does not fit the declared parameter type.
    TypeMismatch,
    /// The capability returned a value that does not fit its declared type.
    InvalidOutput,
    /// A binding points at a step that has not succeeded and never will
    /// before this one runs.
    UnresolvedReference,
}

/// A failure recorded on a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepError {
    pub kind: StepErrorKind,
    pub message: String,
}

impl StepError {
    pub fn new(kind: StepErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// One capability invocation inside a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub step_id: String,
    pub agent_id: String,
    pub function_id: String,
    #[serde(default)]
    pub description: String,
    /// Planner-proposed binding per parameter name.
    pub input_bindings: BTreeMap<String, Binding>,
    /// Values supplied by the user after an `awaiting_input` pause.
    #[serde(default)]
    pub supplied: BTreeMap<String, Value>,
    pub status: StepStatus,
    pub result: Option<Value>,
    pub error: Option<StepError>,
    /// Number of dispatch attempts made so far.
    #[serde(default)]
    pub attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl WorkflowStep {
    pub fn new(
        step_id: impl Into<String>,
        agent_id: impl Into<String>,
        function_id: impl Into<String>,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            agent_id: agent_id.into(),
            function_id: function_id.into(),
            description: String::new(),
            input_bindings: BTreeMap::new(),
            supplied: BTreeMap::new(),
            status: StepStatus::Pending,
            result: None,
            error: None,
            attempts: 0,
            started_at: None,
            finished_at: None,
        }
    }

    /// Builder-style binding, used by tests and programmatic plans.
    pub fn bind(mut self, name: impl Into<String>, binding: Binding) -> Self {
        self.input_bindings.insert(name.into(), binding);
        self
    }

    /// Wall-clock duration of the last run, if it finished.
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// A conflict the planner model noticed between the request and a
/// parameter (e.g. two incompatible values mentioned).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterConflict {
    pub step_id: String,
    pub parameter: String,
    pub reason: String,
    #[serde(default)]
    pub resolution: String,
}

/// An ordered plan and its execution state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub workflow_id: Uuid,
    pub name: String,
    pub description: String,
    pub original_request: String,
    /// Steps in dependency order.
    pub steps: Vec<WorkflowStep>,
    pub status: WorkflowStatus,
    #[serde(default)]
    pub conflicts: Vec<ParameterConflict>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    /// Create a workflow in [`WorkflowStatus::Planning`].
    pub fn new(original_request: impl Into<String>, steps: Vec<WorkflowStep>) -> Self {
        let now = Utc::now();
        Self {
            workflow_id: Uuid::now_v7(),
            name: String::new(),
            description: String::new(),
            original_request: original_request.into(),
            steps,
            status: WorkflowStatus::Planning,
            conflicts: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn step(&self, step_id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    pub fn step_index(&self, step_id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.step_id == step_id)
    }

    /// Results of succeeded steps keyed by step id.
    pub fn results(&self) -> BTreeMap<&str, &Value> {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Succeeded)
            .filter_map(|s| s.result.as_ref().map(|r| (s.step_id.as_str(), r)))
            .collect()
    }

    /// Succeeded steps in execution order.
    pub fn history(&self) -> Vec<&WorkflowStep> {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Succeeded)
            .collect()
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Aggregate view of the run, suitable for display.
    pub fn summary(&self) -> ExecutionSummary {
        let mut outputs = BTreeMap::new();
        let mut errors = BTreeMap::new();
        let mut step_durations_ms = BTreeMap::new();

        for step in &self.steps {
            if let Some(result) = &step.result {
                outputs.insert(step.step_id.clone(), result.clone());
            }
            if let Some(error) = &step.error {
                errors.insert(step.step_id.clone(), error.clone());
            }
            if let Some(ms) = step.duration_ms() {
                step_durations_ms.insert(step.step_id.clone(), ms);
            }
        }

        ExecutionSummary {
            workflow_id: self.workflow_id,
            status: self.status,
            outputs,
            errors,
            total_duration_ms: step_durations_ms.values().sum(),
            step_durations_ms,
        }
    }
}

/// Outcome of a workflow run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionSummary {
    pub workflow_id: Uuid,
    pub status: WorkflowStatus,
    pub outputs: BTreeMap<String, Value>,
    pub errors: BTreeMap<String, StepError>,
    pub step_durations_ms: BTreeMap<String, i64>,
    pub total_duration_ms: i64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
