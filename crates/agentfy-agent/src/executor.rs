//! Workflow executor.
//!
//! Advances a [`Workflow`] one step per call.  Each [`Executor::advance`]
//! picks the first step that has not succeeded, resolves its arguments,
//! dispatches it through the [`Registry`] and records the outcome.  The
//! workflow pauses in `awaiting_params` when that step lacks a required
//! input, and fails fast on the first failed step.
//!
//! Transient capability failures and timeouts are retried with exponential
//! backoff.  Nothing is rolled back: side effects of steps that already
//! succeeded stay in place when a later step fails or the workflow is
//! cancelled.

use std::sync::Arc;
use std::time::Duration;

use agentfy_registry::{Arguments, CapabilityError, DispatchError, Registry};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AgentError, Result};
use crate::resolver::{self, MissingInput, StepInputs};
use crate::workflow::{Binding, StepError, StepErrorKind, StepStatus, Workflow, WorkflowStatus};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for the executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum number of retry attempts per step (0 = no retries).
    pub max_retries: u32,

    /// Initial delay between retries.
    pub initial_retry_delay: Duration,

    /// Multiplier applied to the delay after each retry (exponential backoff).
    pub retry_backoff_factor: f64,

    /// Maximum delay between retries (caps the backoff).
    pub max_retry_delay: Duration,

    /// Timeout for a single capability invocation.
    pub step_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_retry_delay: Duration::from_millis(500),
            retry_backoff_factor: 2.0,
            max_retry_delay: Duration::from_secs(10),
            step_timeout: Duration::from_secs(60),
        }
    }
}

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// What a single [`Executor::advance`] call did.
#[derive(Debug, Clone, PartialEq)]
pub enum Advance {
    /// The workflow was already terminal; nothing changed.
    Unchanged,
    /// The next step needs user input.
    AwaitingParams(Vec<MissingInput>),
    /// One step ran and succeeded; more remain.
    StepSucceeded { step_id: String },
    /// One step ran and failed; the workflow is now failed.
    StepFailed { step_id: String },
    /// Every step has succeeded.
    Completed,
}

/// A user-supplied value for an open input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuppliedInput {
    pub step_id: String,
    pub name: String,
    pub value: Value,
}

impl SuppliedInput {
    pub fn new(step_id: impl Into<String>, name: impl Into<String>, value: Value) -> Self {
        Self {
            step_id: step_id.into(),
            name: name.into(),
            value,
        }
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Runs workflow steps against the capabilities bound in a registry.
#[derive(Debug, Clone)]
pub struct Executor {
    registry: Arc<Registry>,
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(registry: Arc<Registry>, config: ExecutorConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Inputs the user still has to supply, across all steps not yet run.
    pub fn pending_inputs(&self, workflow: &Workflow) -> Vec<MissingInput> {
        resolver::resolve(workflow, &self.registry).unresolved
    }

    /// Run at most one step.
    ///
    /// Returns [`Advance::Unchanged`] without touching a terminal workflow.
    pub async fn advance(&self, workflow: &mut Workflow) -> Result<Advance> {
        if workflow.is_terminal() {
            return Ok(Advance::Unchanged);
        }

        let Some(index) = workflow
            .steps
            .iter()
            .position(|s| s.status != StepStatus::Succeeded)
        else {
            return Ok(self.complete(workflow));
        };

        if !matches!(
            workflow.steps[index].status,
            StepStatus::Pending | StepStatus::AwaitingInput | StepStatus::Running
        ) {
            return Err(AgentError::InvalidWorkflowState {
                workflow_id: workflow.workflow_id,
                reason: format!(
                    "step `{}` is {} in a non-terminal workflow",
                    workflow.steps[index].step_id, workflow.steps[index].status
                ),
            });
        }

        let registry = Arc::clone(&self.registry);
        let step_id = workflow.steps[index].step_id.clone();

        let dispatch = match registry.dispatch(
            &workflow.steps[index].agent_id,
            &workflow.steps[index].function_id,
        ) {
            Ok(dispatch) => dispatch,
            Err(e) => {
                let kind = match e {
                    DispatchError::AgentNotFound { .. } => StepErrorKind::AgentNotFound,
                    DispatchError::FunctionNotFound { .. } => StepErrorKind::FunctionNotFound,
                };
                tracing::error!(
                    workflow_id = %workflow.workflow_id,
                    step_id = %step_id,
                    error = %e,
                    "step capability could not be dispatched"
                );
                return Ok(self.fail(workflow, index, StepError::new(kind, e.to_string())));
            }
        };

        let arguments = match resolver::resolve_step(workflow, index, dispatch.entry) {
            StepInputs::Ready(arguments) => arguments,
            StepInputs::Missing(_) => {
                let missing = resolver::refresh_step_statuses(workflow, &registry);
                workflow.status = WorkflowStatus::AwaitingParams;
                workflow.touch();
                tracing::info!(
                    workflow_id = %workflow.workflow_id,
                    step_id = %step_id,
                    missing = missing.len(),
                    "workflow awaiting parameters"
                );
                return Ok(Advance::AwaitingParams(missing));
            }
            StepInputs::Waiting { step_id: reference } => {
                let error = StepError::new(
                    StepErrorKind::UnresolvedReference,
                    format!("references step `{reference}`, which has not succeeded"),
                );
                return Ok(self.fail(workflow, index, error));
            }
        };

        // Literals and user inputs were checked earlier; referenced values
        // are only known now.
        for (name, value) in &arguments {
            if let Some(param) = dispatch.entry.parameter(name) {
                if let Err(reason) = param.check(value) {
                    let error = StepError::new(StepErrorKind::TypeMismatch, reason);
                    return Ok(self.fail(workflow, index, error));
                }
            }
        }

        workflow.status = WorkflowStatus::Executing;
        {
            let step = &mut workflow.steps[index];
            step.status = StepStatus::Running;
            step.started_at = Some(Utc::now());
            step.finished_at = None;
        }
        workflow.touch();

        tracing::info!(
            workflow_id = %workflow.workflow_id,
            step_id = %step_id,
            capability = %dispatch.entry.qualified_name(),
            "executing step"
        );

        let outcome = self
            .invoke_with_retry(workflow, index, &**dispatch.agent, arguments)
            .await;

        let result = match outcome {
            Ok(value) if !dispatch.entry.returns.value_type.accepts(&value) => {
                let error = StepError::new(
                    StepErrorKind::InvalidOutput,
                    format!(
                        "`{}` returned {value}, expected {}",
                        dispatch.entry.qualified_name(),
                        dispatch.entry.returns.value_type
                    ),
                );
                return Ok(self.fail(workflow, index, error));
            }
            Ok(value) => value,
            Err(error) => return Ok(self.fail(workflow, index, error)),
        };

        {
            let step = &mut workflow.steps[index];
            step.status = StepStatus::Succeeded;
            step.result = Some(result);
            step.error = None;
            step.finished_at = Some(Utc::now());
        }
        workflow.touch();

        tracing::info!(
            workflow_id = %workflow.workflow_id,
            step_id = %step_id,
            attempts = workflow.steps[index].attempts,
            "step succeeded"
        );

        if workflow.steps.iter().all(|s| s.status == StepStatus::Succeeded) {
            return Ok(self.complete(workflow));
        }

        // A later step may have been waiting on this one.
        let missing = resolver::refresh_step_statuses(workflow, &registry);
        tracing::debug!(
            workflow_id = %workflow.workflow_id,
            missing = missing.len(),
            "step statuses refreshed"
        );

        Ok(Advance::StepSucceeded { step_id })
    }

    /// Call [`advance`](Self::advance) until the workflow is terminal or
    /// waiting for user input.  Returns the last outcome.
    pub async fn run_until_blocked(&self, workflow: &mut Workflow) -> Result<Advance> {
        loop {
            match self.advance(workflow).await? {
                Advance::StepSucceeded { .. } => continue,
                other => return Ok(other),
            }
        }
    }

    /// Attach user-supplied values to open inputs.
    ///
    /// Every input is validated before any is applied: the step must exist
    /// and not have run, the parameter must be declared by its capability
    /// and still be open, and the value must fit the declared type.  A
    /// parameter is open when the plan left it unbound, or when it is one of
    /// the [`pending_inputs`](Self::pending_inputs).  Values for parameters
    /// the plan already fills are rejected rather than dropped.
    pub fn resume(&self, workflow: &mut Workflow, inputs: Vec<SuppliedInput>) -> Result<()> {
        if workflow.is_terminal() {
            return Err(AgentError::InvalidWorkflowState {
                workflow_id: workflow.workflow_id,
                reason: format!("cannot resume a {} workflow", workflow.status),
            });
        }

        let pending = self.pending_inputs(workflow);
        let mut accepted = Vec::with_capacity(inputs.len());
        for input in inputs {
            let unknown = || AgentError::UnknownInput {
                step_id: input.step_id.clone(),
                name: input.name.clone(),
            };

            let index = workflow.step_index(&input.step_id).ok_or_else(unknown)?;
            let step = &workflow.steps[index];
            if !matches!(step.status, StepStatus::Pending | StepStatus::AwaitingInput) {
                return Err(unknown());
            }

            let param = self
                .registry
                .lookup(&step.agent_id, &step.function_id)
                .and_then(|entry| entry.parameter(&input.name))
                .ok_or_else(unknown)?;

            let unbound = matches!(
                step.input_bindings.get(&input.name),
                None | Some(Binding::Unbound)
            );
            let is_pending = pending
                .iter()
                .any(|open| open.step_id == input.step_id && open.name == input.name);
            if !unbound && !is_pending {
                return Err(unknown());
            }

            param
                .check(&input.value)
                .map_err(|reason| AgentError::InputTypeMismatch {
                    step_id: input.step_id.clone(),
                    name: input.name.clone(),
                    reason,
                })?;

            accepted.push((index, input));
        }

        for (index, input) in accepted {
            tracing::debug!(
                workflow_id = %workflow.workflow_id,
                step_id = %input.step_id,
                name = %input.name,
                "input supplied"
            );
            workflow.steps[index].supplied.insert(input.name, input.value);
        }

        let missing = resolver::refresh_step_statuses(workflow, &self.registry);
        workflow.status = if missing.is_empty() {
            WorkflowStatus::Executing
        } else {
            WorkflowStatus::AwaitingParams
        };
        workflow.touch();

        tracing::info!(
            workflow_id = %workflow.workflow_id,
            missing = missing.len(),
            status = %workflow.status,
            "workflow resumed"
        );
        Ok(())
    }

    /// Cancel a workflow that has not finished.
    ///
    /// Steps that have not succeeded are marked skipped.  Steps that already
    /// ran are not compensated.
    pub fn cancel(&self, workflow: &mut Workflow) -> Result<()> {
        if workflow.is_terminal() {
            return Err(AgentError::InvalidWorkflowState {
                workflow_id: workflow.workflow_id,
                reason: format!("cannot cancel a {} workflow", workflow.status),
            });
        }

        let mut skipped = 0usize;
        for step in &mut workflow.steps {
            if step.status != StepStatus::Succeeded {
                step.status = StepStatus::Skipped;
                skipped += 1;
            }
        }
        workflow.status = WorkflowStatus::Cancelled;
        workflow.touch();

        tracing::warn!(workflow_id = %workflow.workflow_id, skipped, "workflow cancelled");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn invoke_with_retry(
        &self,
        workflow: &mut Workflow,
        index: usize,
        agent: &dyn agentfy_registry::Agent,
        arguments: Arguments,
    ) -> std::result::Result<Value, StepError> {
        let workflow_id = workflow.workflow_id;
        let step = &mut workflow.steps[index];
        let max_attempts = self.config.max_retries.saturating_add(1);
        let mut delay = self.config.initial_retry_delay;

        for attempt in 1..=max_attempts {
            step.attempts += 1;
            tracing::debug!(
                workflow_id = %workflow_id,
                step_id = %step.step_id,
                attempt,
                max_attempts,
                "capability invocation attempt"
            );

            let result = tokio::time::timeout(
                self.config.step_timeout,
                agent.invoke(&step.function_id, arguments.clone()),
            )
            .await;

            let error = match result {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(CapabilityError::Failed { reason })) => {
                    return Err(StepError::new(StepErrorKind::Capability, reason));
                }
                Ok(Err(CapabilityError::Transient { reason })) => {
                    StepError::new(StepErrorKind::Transient, reason)
                }
                Err(_elapsed) => StepError::new(
                    StepErrorKind::Timeout,
                    format!("timed out after {:?}", self.config.step_timeout),
                ),
            };

            tracing::warn!(
                workflow_id = %workflow_id,
                step_id = %step.step_id,
                attempt,
                error = %error.message,
                "capability invocation failed"
            );

            if attempt == max_attempts {
                return Err(error);
            }

            tracing::debug!(delay = ?delay, "retrying after delay");
            tokio::time::sleep(delay).await;
            delay = next_delay(delay, &self.config);
        }

        Err(StepError::new(
            StepErrorKind::Transient,
            "no invocation attempts were made",
        ))
    }

    fn fail(&self, workflow: &mut Workflow, index: usize, error: StepError) -> Advance {
        let step_id = workflow.steps[index].step_id.clone();
        tracing::warn!(
            workflow_id = %workflow.workflow_id,
            step_id = %step_id,
            kind = ?error.kind,
            error = %error.message,
            "step failed, workflow failed"
        );

        let step = &mut workflow.steps[index];
        step.status = StepStatus::Failed;
        step.error = Some(error);
        if step.started_at.is_some() {
            step.finished_at = Some(Utc::now());
        }
        workflow.status = WorkflowStatus::Failed;
        workflow.touch();

        Advance::StepFailed { step_id }
    }

    fn complete(&self, workflow: &mut Workflow) -> Advance {
        workflow.status = WorkflowStatus::Completed;
        workflow.touch();
        tracing::info!(
            workflow_id = %workflow.workflow_id,
            steps = workflow.steps.len(),
            "workflow completed"
        );
        Advance::Completed
    }
}

/// Grow `delay` by the backoff factor, capped at `max_retry_delay`.
///
/// A factor that would shrink, negate or overflow the delay keeps the
/// current delay instead.
fn next_delay(delay: Duration, config: &ExecutorConfig) -> Duration {
    let factor = config.retry_backoff_factor;
    if !(factor.is_finite() && factor >= 1.0) {
        return delay.min(config.max_retry_delay);
    }
    Duration::try_from_secs_f64(delay.as_secs_f64() * factor)
        .map_or(config.max_retry_delay, |grown| grown.min(config.max_retry_delay))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use agentfy_registry::{CatalogDocument, FunctionAgent, RegistryBuilder};
    use serde_json::json;

    use crate::workflow::WorkflowStep;

    fn catalog() -> CatalogDocument {
        CatalogDocument::from_json_str(
            &json!({
                "x": {
                    "crawlers": [{
                        "agent_id": "x_crawler", "function_id": "fetch_user_tweets",
                        "parameters": [{"name": "screen_name", "type": "str", "required": true}],
                        "returns": {"type": "Dict"}
                    }],
                    "interactive": [{
                        "agent_id": "x_interactive", "function_id": "post_tweets",
                        "parameters": [{"name": "messages", "type": "List[str]", "required": true}],
                        "returns": {"type": "bool"}
                    }]
                }
            })
            .to_string(),
        )
        .unwrap()
    }

    fn fast_config() -> ExecutorConfig {
        ExecutorConfig {
            max_retries: 2,
            initial_retry_delay: Duration::from_millis(1),
            retry_backoff_factor: 2.0,
            max_retry_delay: Duration::from_millis(5),
            step_timeout: Duration::from_millis(200),
        }
    }

    fn executor(crawler: FunctionAgent, interactive: FunctionAgent) -> Executor {
        let registry = RegistryBuilder::new(catalog())
            .bind(Arc::new(crawler))
            .bind(Arc::new(interactive))
            .build()
            .unwrap();
        Executor::new(Arc::new(registry), fast_config())
    }

    fn crawler() -> FunctionAgent {
        FunctionAgent::new("x_crawler").function("fetch_user_tweets", |args: Arguments| async move {
            Ok(json!({"user": args["screen_name"], "texts": ["t1", "t2"]}))
        })
    }

    fn poster() -> FunctionAgent {
        FunctionAgent::new("x_interactive").function("post_tweets", |_| async { Ok(json!(true)) })
    }

    fn chained() -> Workflow {
        Workflow::new(
            "repost tweets",
            vec![
                WorkflowStep::new("fetch", "x_crawler", "fetch_user_tweets")
                    .bind("screen_name", Binding::Literal { value: json!("rustlang") }),
                WorkflowStep::new("post", "x_interactive", "post_tweets").bind(
                    "messages",
                    Binding::StepOutput {
                        step_id: "fetch".into(),
                        path: vec!["texts".into()],
                    },
                ),
            ],
        )
    }

    #[tokio::test]
    async fn advance_runs_one_step_per_call() {
        let exec = executor(crawler(), poster());
        let mut wf = chained();

        assert_eq!(
            exec.advance(&mut wf).await.unwrap(),
            Advance::StepSucceeded {
                step_id: "fetch".into()
            }
        );
        assert_eq!(wf.steps[0].status, StepStatus::Succeeded);
        assert_eq!(wf.steps[1].status, StepStatus::Pending);
        assert_eq!(wf.status, WorkflowStatus::Executing);

        assert_eq!(exec.advance(&mut wf).await.unwrap(), Advance::Completed);
        assert_eq!(wf.status, WorkflowStatus::Completed);
        assert_eq!(wf.steps[1].result, Some(json!(true)));
        assert_eq!(wf.steps[0].attempts, 1);
    }

    #[tokio::test]
    async fn terminal_workflow_is_unchanged() {
        let exec = executor(crawler(), poster());
        let mut wf = chained();
        exec.run_until_blocked(&mut wf).await.unwrap();
        let snapshot = wf.clone();

        assert_eq!(exec.advance(&mut wf).await.unwrap(), Advance::Unchanged);
        assert_eq!(wf, snapshot);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let flaky = FunctionAgent::new("x_crawler").function("fetch_user_tweets", move |_| {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(CapabilityError::transient("rate limited"))
                } else {
                    Ok(json!({"texts": ["ok"]}))
                }
            }
        });
        let exec = executor(flaky, poster());
        let mut wf = chained();

        exec.advance(&mut wf).await.unwrap();
        assert_eq!(wf.steps[0].status, StepStatus::Succeeded);
        assert_eq!(wf.steps[0].attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_as_transient() {
        let failing = FunctionAgent::new("x_crawler")
            .function("fetch_user_tweets", |_| async { Err(CapabilityError::transient("503")) });
        let exec = executor(failing, poster());
        let mut wf = chained();

        let outcome = exec.advance(&mut wf).await.unwrap();
        assert_eq!(
            outcome,
            Advance::StepFailed {
                step_id: "fetch".into()
            }
        );
        assert_eq!(wf.steps[0].attempts, 3);
        assert_eq!(wf.steps[0].error.as_ref().unwrap().kind, StepErrorKind::Transient);
        assert_eq!(wf.steps[1].status, StepStatus::Pending);
        assert_eq!(wf.status, WorkflowStatus::Failed);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let failing = FunctionAgent::new("x_crawler")
            .function("fetch_user_tweets", |_| async { Err(CapabilityError::failed("suspended")) });
        let exec = executor(failing, poster());
        let mut wf = chained();

        exec.advance(&mut wf).await.unwrap();
        assert_eq!(wf.steps[0].attempts, 1);
        assert_eq!(wf.steps[0].error.as_ref().unwrap().kind, StepErrorKind::Capability);
    }

    #[tokio::test]
    async fn slow_capability_times_out() {
        let slow = FunctionAgent::new("x_crawler").function("fetch_user_tweets", |_| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(json!({}))
        });
        let exec = executor(slow, poster());
        let mut wf = chained();

        exec.advance(&mut wf).await.unwrap();
        assert_eq!(wf.steps[0].error.as_ref().unwrap().kind, StepErrorKind::Timeout);
        assert_eq!(wf.status, WorkflowStatus::Failed);
    }

    #[tokio::test]
    async fn referenced_value_of_wrong_type_fails_step() {
        let odd = FunctionAgent::new("x_crawler")
            .function("fetch_user_tweets", |_| async { Ok(json!({"texts": "not a list"})) });
        let exec = executor(odd, poster());
        let mut wf = chained();

        exec.run_until_blocked(&mut wf).await.unwrap();
        assert_eq!(wf.steps[1].status, StepStatus::Failed);
        assert_eq!(wf.steps[1].error.as_ref().unwrap().kind, StepErrorKind::TypeMismatch);
    }

    #[tokio::test]
    async fn result_of_wrong_type_is_invalid_output() {
        let wrong = FunctionAgent::new("x_interactive")
            .function("post_tweets", |_| async { Ok(json!("posted")) });
        let exec = executor(crawler(), wrong);
        let mut wf = chained();

        exec.run_until_blocked(&mut wf).await.unwrap();
        assert_eq!(wf.steps[1].error.as_ref().unwrap().kind, StepErrorKind::InvalidOutput);
    }

    #[tokio::test]
    async fn unbound_capability_fails_with_dispatch_kind() {
        let registry = RegistryBuilder::new(catalog()).build_catalog_only().unwrap();
        let exec = Executor::new(Arc::new(registry), fast_config());
        let mut wf = chained();

        exec.advance(&mut wf).await.unwrap();
        assert_eq!(wf.steps[0].error.as_ref().unwrap().kind, StepErrorKind::AgentNotFound);
        assert_eq!(wf.status, WorkflowStatus::Failed);
    }

    #[tokio::test]
    async fn missing_input_pauses_until_resumed() {
        let exec = executor(crawler(), poster());
        let mut wf = Workflow::new(
            "post",
            vec![WorkflowStep::new("post", "x_interactive", "post_tweets")],
        );

        let Advance::AwaitingParams(missing) = exec.advance(&mut wf).await.unwrap() else {
            panic!("expected a pause");
        };
        assert_eq!(missing[0].name, "messages");
        assert_eq!(wf.status, WorkflowStatus::AwaitingParams);
        assert_eq!(wf.steps[0].status, StepStatus::AwaitingInput);
        assert_eq!(exec.pending_inputs(&wf).len(), 1);

        exec.resume(&mut wf, vec![SuppliedInput::new("post", "messages", json!(["hi"]))])
            .unwrap();
        assert_eq!(wf.status, WorkflowStatus::Executing);
        assert!(exec.pending_inputs(&wf).is_empty());

        assert_eq!(exec.advance(&mut wf).await.unwrap(), Advance::Completed);
    }

    #[tokio::test]
    async fn resume_validates_all_inputs_first() {
        let exec = executor(crawler(), poster());
        let mut wf = Workflow::new(
            "post",
            vec![WorkflowStep::new("post", "x_interactive", "post_tweets")],
        );

        let err = exec
            .resume(&mut wf, vec![SuppliedInput::new("post", "text", json!("x"))])
            .unwrap_err();
        assert!(matches!(err, AgentError::UnknownInput { .. }));

        let err = exec
            .resume(&mut wf, vec![SuppliedInput::new("nope", "messages", json!(["x"]))])
            .unwrap_err();
        assert!(matches!(err, AgentError::UnknownInput { .. }));

        let err = exec
            .resume(
                &mut wf,
                vec![
                    SuppliedInput::new("post", "messages", json!(["ok"])),
                    SuppliedInput::new("post", "messages", json!("not a list")),
                ],
            )
            .unwrap_err();
        assert!(matches!(err, AgentError::InputTypeMismatch { .. }));
        assert!(wf.steps[0].supplied.is_empty());
    }

    #[tokio::test]
    async fn resume_rejects_parameter_bound_by_plan() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let recording =
            FunctionAgent::new("x_interactive").function("post_tweets", move |args: Arguments| {
                let sink = Arc::clone(&sink);
                async move {
                    sink.lock().unwrap().push(args["messages"].clone());
                    Ok(json!(true))
                }
            });
        let exec = executor(crawler(), recording);
        let mut wf = Workflow::new(
            "post",
            vec![
                WorkflowStep::new("post", "x_interactive", "post_tweets")
                    .bind("messages", Binding::Literal { value: json!(["planned"]) }),
            ],
        );

        let override_input = SuppliedInput::new("post", "messages", json!(["user override"]));
        let err = exec.resume(&mut wf, vec![override_input]).unwrap_err();
        assert!(matches!(err, AgentError::UnknownInput { .. }));
        assert!(wf.steps[0].supplied.is_empty());

        assert_eq!(exec.run_until_blocked(&mut wf).await.unwrap(), Advance::Completed);
        assert_eq!(*seen.lock().unwrap(), vec![json!(["planned"])]);
    }

    #[tokio::test]
    async fn resume_accepts_reference_whose_field_is_absent() {
        let sparse = FunctionAgent::new("x_crawler")
            .function("fetch_user_tweets", |_| async { Ok(json!({"user": "rustlang"})) });
        let exec = executor(sparse, poster());
        let mut wf = chained();

        let outcome = exec.run_until_blocked(&mut wf).await.unwrap();
        let Advance::AwaitingParams(missing) = outcome else {
            panic!("expected a pause, got {outcome:?}");
        };
        assert_eq!(missing[0].step_id, "post");

        exec.resume(&mut wf, vec![SuppliedInput::new("post", "messages", json!(["by hand"]))])
            .unwrap();
        assert_eq!(exec.run_until_blocked(&mut wf).await.unwrap(), Advance::Completed);
    }

    #[tokio::test]
    async fn negative_backoff_factor_still_fails_cleanly() {
        let failing = FunctionAgent::new("x_crawler")
            .function("fetch_user_tweets", |_| async { Err(CapabilityError::transient("503")) });
        let registry = RegistryBuilder::new(catalog())
            .bind(Arc::new(failing))
            .bind(Arc::new(poster()))
            .build()
            .unwrap();
        let config = ExecutorConfig {
            retry_backoff_factor: -2.0,
            ..fast_config()
        };
        let exec = Executor::new(Arc::new(registry), config);
        let mut wf = chained();

        let outcome = exec.advance(&mut wf).await.unwrap();
        assert_eq!(outcome, Advance::StepFailed { step_id: "fetch".into() });
        assert_eq!(wf.steps[0].attempts, 3);
        assert_eq!(wf.steps[0].error.as_ref().unwrap().kind, StepErrorKind::Transient);
    }

    #[test]
    fn backoff_is_capped_and_never_shrinks() {
        let config = fast_config();
        let one = Duration::from_millis(1);
        assert_eq!(next_delay(one, &config), Duration::from_millis(2));
        assert_eq!(next_delay(Duration::from_millis(4), &config), Duration::from_millis(5));

        let huge = ExecutorConfig {
            retry_backoff_factor: f64::MAX,
            ..fast_config()
        };
        assert_eq!(next_delay(Duration::from_secs(1), &huge), Duration::from_millis(5));

        for factor in [-2.0, 0.5, f64::NAN, f64::INFINITY] {
            let odd = ExecutorConfig {
                retry_backoff_factor: factor,
                ..fast_config()
            };
            assert_eq!(next_delay(one, &odd), one);
        }
    }

    #[tokio::test]
    async fn cancel_skips_unfinished_steps() {
        let exec = executor(crawler(), poster());
        let mut wf = chained();
        exec.advance(&mut wf).await.unwrap();

        exec.cancel(&mut wf).unwrap();
        assert_eq!(wf.status, WorkflowStatus::Cancelled);
        assert_eq!(wf.steps[0].status, StepStatus::Succeeded);
        assert_eq!(wf.steps[1].status, StepStatus::Skipped);

        assert!(matches!(
            exec.cancel(&mut wf),
            Err(AgentError::InvalidWorkflowState { .. })
        ));
        assert!(matches!(
            exec.resume(&mut wf, vec![]),
            Err(AgentError::InvalidWorkflowState { .. })
        ));
        assert_eq!(exec.advance(&mut wf).await.unwrap(), Advance::Unchanged);
    }
}
