//! HTTP-backed capability implementations.
//!
//! Platform agents run as separate services.  A [`RemoteAgent`] forwards
//! each `(function_id, arguments)` call as a JSON `POST` to
//! `{endpoint}/{function_id}` and maps the response back onto the
//! capability contract: 429, 5xx, connection failures and timeouts are
//! transient, any other non-2xx status is a permanent failure.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use agentfy_registry::{Agent, Arguments, CapabilityError, Registry};

use crate::config::AgentSettings;

/// Maximum response body size kept in error messages.
const MAX_ERROR_BODY_CHARS: usize = 512;

/// An [`Agent`] served by a remote HTTP endpoint.
#[derive(Debug, Clone)]
pub struct RemoteAgent {
    agent_id: String,
    /// Always ends with `/` so that joining a function id appends to it.
    endpoint: Url,
    functions: Vec<String>,
    http: reqwest::Client,
}

impl RemoteAgent {
    pub fn new(
        agent_id: impl Into<String>,
        endpoint: &str,
        functions: Vec<String>,
        http: reqwest::Client,
    ) -> Result<Self> {
        let agent_id = agent_id.into();
        let mut endpoint = endpoint.trim().to_owned();
        if !endpoint.ends_with('/') {
            endpoint.push('/');
        }
        let endpoint = Url::parse(&endpoint)
            .with_context(|| format!("invalid endpoint for agent `{agent_id}`: {endpoint}"))?;

        Ok(Self {
            agent_id,
            endpoint,
            functions,
            http,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn function_url(&self, function_id: &str) -> Result<Url, CapabilityError> {
        self.endpoint
            .join(function_id)
            .map_err(|e| CapabilityError::failed(format!("invalid function url: {e}")))
    }
}

#[async_trait]
impl Agent for RemoteAgent {
    fn agent_id(&self) -> &str {
        &self.agent_id
    }

    fn function_ids(&self) -> Option<Vec<String>> {
        Some(self.functions.clone())
    }

    async fn invoke(
        &self,
        function_id: &str,
        arguments: Arguments,
    ) -> Result<Value, CapabilityError> {
        let url = self.function_url(function_id)?;
        tracing::debug!(agent_id = %self.agent_id, url = %url, "calling remote capability");

        let response = self
            .http
            .post(url.clone())
            .json(&arguments)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    CapabilityError::transient(format!("request to {url} failed: {e}"))
                } else {
                    CapabilityError::failed(format!("request to {url} failed: {e}"))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CapabilityError::transient(format!("failed to read response body: {e}")))?;

        if !status.is_success() {
            let excerpt: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
            let reason = format!("{url} returned {status}: {excerpt}");
            return Err(if status.as_u16() == 429 || status.is_server_error() {
                CapabilityError::transient(reason)
            } else {
                CapabilityError::failed(reason)
            });
        }

        parse_result(&body)
    }
}

/// The response body as a value, unwrapping a `{"result": ...}` envelope.
fn parse_result(body: &str) -> Result<Value, CapabilityError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| CapabilityError::failed(format!("response is not valid JSON: {e}")))?;

    Ok(match value {
        Value::Object(mut map) if map.contains_key("result") => {
            map.remove("result").unwrap_or(Value::Null)
        }
        other => other,
    })
}

// ---------------------------------------------------------------------------
// Binding
// ---------------------------------------------------------------------------

/// Build one [`RemoteAgent`] per catalog agent that has an endpoint.
///
/// Returns the agents plus the ids of agents left without one.
pub fn remote_agents(
    catalog: &Registry,
    settings: &AgentSettings,
) -> Result<(Vec<RemoteAgent>, Vec<String>)> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(settings.timeout_secs))
        .user_agent(concat!("agentfy/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;

    let mut functions: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for entry in catalog.entries() {
        functions
            .entry(entry.agent_id.as_str())
            .or_default()
            .push(entry.function_id.clone());
    }

    let mut agents = Vec::new();
    let mut unbound = Vec::new();
    for (agent_id, function_ids) in functions {
        let endpoint = match (settings.endpoints.get(agent_id), &settings.base_url) {
            (Some(endpoint), _) => endpoint.clone(),
            (None, Some(base_url)) => format!("{}/{agent_id}", base_url.trim_end_matches('/')),
            (None, None) => {
                unbound.push(agent_id.to_owned());
                continue;
            }
        };
        agents.push(RemoteAgent::new(agent_id, &endpoint, function_ids, http.clone())?);
    }

    Ok((agents, unbound))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
