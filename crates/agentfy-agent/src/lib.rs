//! Workflow planning and execution for agentfy.
//!
//! This crate turns a natural-language request into a validated workflow
//! over the capabilities of an [`agentfy_registry::Registry`] and then runs
//! it step by step, pausing when a required input is missing.
//!
//! ## Architecture
//!
//! ```text
//! request ──> Planner ──> Workflow ──> Executor ──> Registry::dispatch ──> Agent
//!               │                        │
//!          LanguageModel            Resolver (literals, earlier results,
//!                                   user input, defaults)
//! ```
//!
//! ## Modules
//!
//! - **[`llm`]** -- [`LanguageModel`] seam plus an HTTP client for Anthropic
//!   and OpenAI-compatible APIs.
//! - **[`planner`]** -- Prompts the model, parses and validates its plan, and
//!   repairs structurally malformed replies once.
//! - **[`workflow`]** -- Workflow, step, binding and status types.
//! - **[`resolver`]** -- Works out each step's arguments from literals, earlier
//!   results, user input and defaults.
//! - **[`executor`]** -- Advances a workflow one step per call with retry,
//!   timeout, pause/resume and cancellation.
//! - **[`store`]** -- Concurrent in-memory map of workflows.
//! - **[`error`]** -- [`PlanningError`] and [`AgentError`].

pub mod error;
pub mod executor;
pub mod llm;
pub mod planner;
pub mod resolver;
pub mod store;
pub mod workflow;

pub use error::{AgentError, PlanningError, Result};
pub use executor::{Advance, Executor, ExecutorConfig, SuppliedInput};
pub use llm::{ChatRequest, LanguageModel, LlmClient, LlmClientConfig, LlmProvider, Message, Role};
pub use planner::{Planner, PlannerConfig};
pub use resolver::{MissingInput, Resolution, StepInputs, resolve, resolve_step};
pub use store::{WorkflowHandle, WorkflowStore};
pub use workflow::{
    Binding, ExecutionSummary, ParameterConflict, StepError, StepErrorKind, StepStatus, Workflow,
    WorkflowStatus, WorkflowStep, extract_path,
};
