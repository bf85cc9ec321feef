//! LLM integration layer.
//!
//! The planner talks to a language model through the [`LanguageModel`]
//! trait so that the model stays a black box: prompt in, text out.
//!
//! - [`types`] -- Messages and chat requests.
//! - [`client`] -- HTTP client for Anthropic and OpenAI-compatible APIs.

pub mod client;
pub mod types;

use async_trait::async_trait;

use crate::error::Result;

pub use client::{LlmClient, LlmClientConfig, LlmProvider};
pub use types::{ChatRequest, Message, Role};

/// A text-completion backend.
///
/// Implementations return the model's text reply or
/// [`AgentError::Provider`](crate::AgentError::Provider) when the model
/// cannot be reached or answers with an unusable envelope.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<String>;
}
