//! Agent error types.
//!
//! Planning failures are reported as [`PlanningError`]; everything else the
//! agent crate can fail with is an [`AgentError`].  Step-level failures are
//! not errors at all: they are recorded on the
//! [`WorkflowStep`](crate::workflow::WorkflowStep) as a
//! [`StepError`](crate::workflow::StepError).

use uuid::Uuid;

/// Why a request could not be turned into a workflow.
///
/// The user may retry with a reworded request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanningError {
    /// The model's output did not parse into the plan structure, even after
    /// the corrective retry.
    #[error("malformed plan response: {reason}")]
    MalformedResponse { reason: String },

    /// A step names a capability the registry does not contain.
    #[error("step `{step_id}` references unknown capability `{agent_id}.{function_id}`")]
    UnknownCapability {
        step_id: String,
        agent_id: String,
        function_id: String,
    },

    /// A bound value does not fit the declared parameter type.
    #[error("step `{step_id}` parameter `{parameter}`: {reason}")]
    TypeMismatch {
        step_id: String,
        parameter: String,
        reason: String,
    },

    /// A step binds to the output of itself, a later step, or a step that
    /// does not exist.
    #[error("step `{step_id}` references `{reference}`, which is not an earlier step")]
    ForwardReference { step_id: String, reference: String },

    /// The model returned a plan with no steps.
    #[error("plan contains zero steps")]
    EmptyPlan,

    /// The language model could not be reached or returned an unusable
    /// envelope.
    #[error("language model unavailable: {reason}")]
    Provider { reason: String },
}

/// Unified error type for the agent crate.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    // -- Planning ------------------------------------------------------------
    /// The planner rejected the request.
    #[error(transparent)]
    Planning(#[from] PlanningError),

    // -- LLM errors ----------------------------------------------------------
    /// Transport failure, non-2xx status or undecodable provider envelope.
    #[error("llm provider error: {reason}")]
    Provider { reason: String },

    /// The API key is missing for a provider that requires one.
    #[error("missing api key for provider: {provider}")]
    MissingApiKey { provider: String },

    // -- Workflow errors -----------------------------------------------------
    /// The workflow is in a state that does not allow the operation.
    #[error("workflow {workflow_id}: {reason}")]
    InvalidWorkflowState { workflow_id: Uuid, reason: String },

    /// A resume value names a step/parameter that is not an open input.
    #[error("step `{step_id}` has no open input `{name}`")]
    UnknownInput { step_id: String, name: String },

    /// A resume value does not fit the declared parameter type.
    #[error("input `{step_id}.{name}` rejected: {reason}")]
    InputTypeMismatch {
        step_id: String,
        name: String,
        reason: String,
    },

    /// The store holds no workflow with this id.
    #[error("workflow not found: {workflow_id}")]
    WorkflowNotFound { workflow_id: Uuid },
}

/// Convenience alias used throughout the agent crate.
pub type Result<T> = std::result::Result<T, AgentError>;

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        Self::Provider {
            reason: err.to_string(),
        }
    }
}
