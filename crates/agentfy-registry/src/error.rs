//! Registry error types.
//!
//! Loading problems surface as [`RegistryError`] and are fatal at startup.
//! Runtime lookups that cannot be satisfied surface as [`DispatchError`].

use std::path::PathBuf;

/// Errors raised while loading the capability catalog or building the
/// dispatch table.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    // -- Document errors -----------------------------------------------------
    /// The catalog file could not be read.
    #[error("failed to read catalog `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The catalog document is not valid JSON/TOML or has the wrong shape.
    #[error("failed to parse catalog: {reason}")]
    Parse { reason: String },

    /// The catalog file extension is not one we know how to read.
    #[error("unsupported catalog format `{extension}` (expected .json or .toml)")]
    UnsupportedFormat { extension: String },

    // -- Schema errors -------------------------------------------------------
    /// A capability or parameter lacks a field the registry cannot do without.
    #[error("platform `{platform}` entry #{index}: missing required field `{field}`")]
    MissingField {
        platform: String,
        index: usize,
        field: &'static str,
    },

    /// The same `(agent_id, function_id)` pair appears more than once.
    #[error("duplicate capability `{agent_id}.{function_id}`")]
    DuplicateCapability {
        agent_id: String,
        function_id: String,
    },

    /// A capability declares the same parameter name twice.
    #[error("capability `{agent_id}.{function_id}` declares parameter `{name}` twice")]
    DuplicateParameter {
        agent_id: String,
        function_id: String,
        name: String,
    },

    /// A type string could not be understood, or a default/enum value does not
    /// fit the declared type.
    #[error("capability `{agent_id}.{function_id}`: {reason}")]
    InvalidType {
        agent_id: String,
        function_id: String,
        reason: String,
    },

    // -- Binding errors ------------------------------------------------------
    /// A catalog agent has no implementation bound to it.
    #[error("no implementation bound for agent `{agent_id}`")]
    UnboundAgent { agent_id: String },

    /// A bound agent does not provide a function the catalog declares for it.
    #[error("agent `{agent_id}` does not implement function `{function_id}`")]
    UnboundFunction {
        agent_id: String,
        function_id: String,
    },

    /// Two implementations were bound under the same agent id.
    #[error("agent `{agent_id}` bound more than once")]
    DuplicateAgent { agent_id: String },
}

/// A step's declared capability could not be resolved to a callable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// No catalog entry or bound implementation exists for the agent.
    #[error("agent not found: {agent_id}")]
    AgentNotFound { agent_id: String },

    /// The agent exists but does not expose the requested function.
    #[error("function `{function_id}` not found on agent `{agent_id}`")]
    FunctionNotFound {
        agent_id: String,
        function_id: String,
    },
}

/// Convenience alias used throughout the registry crate.
pub type Result<T> = std::result::Result<T, RegistryError>;
