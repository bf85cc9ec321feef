//! Capability implementation trait.
//!
//! Concrete platform agents (crawlers, analysers, interactive clients) live
//! outside this crate.  They plug into the registry by implementing
//! [`Agent`]; the executor only ever reaches them through
//! [`Registry::dispatch`](crate::Registry::dispatch).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

/// Arguments passed to a capability: parameter name to value.
pub type Arguments = Map<String, Value>;

/// Failure signal returned by a capability implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapabilityError {
    /// The call failed for a reason that may go away on retry (timeout, rate
    /// limit, upstream 5xx).
    #[error("transient failure: {reason}")]
    Transient { reason: String },

    /// The call failed and retrying will not help.
    #[error("{reason}")]
    Failed { reason: String },
}

impl CapabilityError {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient {
            reason: reason.into(),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    /// Whether the executor may retry the call.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// A bound implementation for every function of one catalog agent.
#[async_trait]
pub trait Agent: Send + Sync {
    /// The catalog `agent_id` this implementation serves.
    fn agent_id(&self) -> &str;

    /// The function ids this implementation provides, if it knows them up
    /// front.  When `Some`, the registry refuses to build unless every
    /// catalog function for this agent is listed.
    fn function_ids(&self) -> Option<Vec<String>> {
        None
    }

    /// Invoke one function with already-validated arguments.
    async fn invoke(
        &self,
        function_id: &str,
        arguments: Arguments,
    ) -> Result<Value, CapabilityError>;
}

// ---------------------------------------------------------------------------
// Function table agent
// ---------------------------------------------------------------------------

/// Boxed future returned by a [`FunctionAgent`] handler.
pub type CapabilityFuture = Pin<Box<dyn Future<Output = Result<Value, CapabilityError>> + Send>>;

/// A handler bound to one function id.
pub type CapabilityFn = Arc<dyn Fn(Arguments) -> CapabilityFuture + Send + Sync>;

/// An [`Agent`] assembled from per-function closures.
///
/// ```ignore
/// let agent = FunctionAgent::new("x_interactive")
///     .function("post_tweets", |args| async move { Ok(serde_json::json!(true)) });
/// ```
#[derive(Clone)]
pub struct FunctionAgent {
    agent_id: String,
    functions: HashMap<String, CapabilityFn>,
}

impl FunctionAgent {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            functions: HashMap::new(),
        }
    }

    /// Bind a handler to `function_id`, replacing any previous one.
    pub fn function<F, Fut>(mut self, function_id: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, CapabilityError>> + Send + 'static,
    {
        let handler: CapabilityFn = Arc::new(move |args| Box::pin(handler(args)));
        self.functions.insert(function_id.into(), handler);
        self
    }
}

impl std::fmt::Debug for FunctionAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.functions.keys().collect();
        names.sort();
        f.debug_struct("FunctionAgent")
            .field("agent_id", &self.agent_id)
            .field("functions", &names)
            .finish()
    }
}

#[async_trait]
impl Agent for FunctionAgent {
    fn agent_id(&self) -> &str {
        &self.agent_id
    }

    fn function_ids(&self) -> Option<Vec<String>> {
        Some(self.functions.keys().cloned().collect())
    }

    async fn invoke(
        &self,
        function_id: &str,
        arguments: Arguments,
    ) -> Result<Value, CapabilityError> {
        let handler = self.functions.get(function_id).ok_or_else(|| {
            CapabilityError::failed(format!(
                "agent `{}` has no function `{function_id}`",
                self.agent_id
            ))
        })?;
        handler(arguments).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
