//! Capability catalog document.
//!
//! The catalog is a declarative document describing, per platform, the
//! capabilities available under the `crawlers`, `analysis` and `interactive`
//! categories.  It is read once, validated into immutable
//! [`CapabilityEntry`] values, and handed to the
//! [`RegistryBuilder`](crate::RegistryBuilder).
//!
//! ```json
//! {
//!   "x": {
//!     "interactive": [{
//!       "agent_id": "x_interactive",
//!       "function_id": "post_tweets",
//!       "description": "Post one or more tweets",
//!       "parameters": [
//!         {"name": "messages", "type": "List[str]", "required": true,
//!          "description": "Tweet texts"}
//!       ],
//!       "returns": {"type": "bool", "description": "Whether all tweets were posted"}
//!     }]
//!   }
//! }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{RegistryError, Result};
use crate::types::ValueType;

// ---------------------------------------------------------------------------
// Validated types
// ---------------------------------------------------------------------------

/// The catalog section a capability is listed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Read-only data collection from a platform.
    Crawler,
    /// Computation over previously collected data.
    Analysis,
    /// Side-effecting actions on a platform (posting, liking, messaging).
    Interactive,
}

impl Category {
    /// The section name used in catalog documents.
    pub fn section(self) -> &'static str {
        match self {
            Self::Crawler => "crawlers",
            Self::Analysis => "analysis",
            Self::Interactive => "interactive",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Crawler => write!(f, "crawler"),
            Self::Analysis => write!(f, "analysis"),
            Self::Interactive => write!(f, "interactive"),
        }
    }
}

/// One declared input of a capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    #[serde(default)]
    pub description: String,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Closed set of allowed values, when the catalog restricts one.
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,
}

impl ParameterSpec {
    /// Check a concrete value against the declared type and enum constraint.
    ///
    /// Returns a human-readable reason on mismatch.
    pub fn check(&self, value: &Value) -> std::result::Result<(), String> {
        if !self.value_type.accepts(value) {
            return Err(format!(
                "parameter `{}` expects {}, got {}",
                self.name,
                self.value_type,
                describe_value(value)
            ));
        }
        if let Some(allowed) = &self.allowed {
            if !allowed.contains(value) {
                return Err(format!(
                    "parameter `{}` must be one of {}, got {value}",
                    self.name,
                    Value::Array(allowed.clone())
                ));
            }
        }
        Ok(())
    }
}

/// The declared result of a capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnSpec {
    #[serde(rename = "type")]
    pub value_type: ValueType,
    #[serde(default)]
    pub description: String,
}

/// A single callable capability, immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityEntry {
    pub platform: String,
    pub category: Category,
    pub agent_id: String,
    pub function_id: String,
    pub description: String,
    /// Parameters in declaration order.
    pub parameters: Vec<ParameterSpec>,
    pub returns: ReturnSpec,
}

impl CapabilityEntry {
    /// Find a declared parameter by name.
    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// `agent_id.function_id`, used in logs and error messages.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.agent_id, self.function_id)
    }
}

// ---------------------------------------------------------------------------
// Raw document
// ---------------------------------------------------------------------------

/// The catalog as written on disk, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct CatalogDocument {
    platforms: BTreeMap<String, RawPlatform>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawPlatform {
    #[serde(default)]
    crawlers: Vec<RawCapability>,
    #[serde(default)]
    analysis: Vec<RawCapability>,
    #[serde(default)]
    interactive: Vec<RawCapability>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawCapability {
    agent_id: Option<String>,
    function_id: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    parameters: Vec<RawParameter>,
    returns: Option<RawReturns>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawParameter {
    name: Option<String>,
    #[serde(rename = "type")]
    value_type: Option<String>,
    #[serde(default)]
    description: String,
    required: Option<bool>,
    default: Option<Value>,
    #[serde(rename = "enum")]
    allowed: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawReturns {
    #[serde(rename = "type")]
    value_type: Option<String>,
    #[serde(default)]
    description: String,
}

impl CatalogDocument {
    /// Parse a JSON catalog.
    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| RegistryError::Parse {
            reason: format!("invalid JSON catalog: {e}"),
        })
    }

    /// Parse a TOML catalog.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| RegistryError::Parse {
            reason: format!("invalid TOML catalog: {e}"),
        })
    }

    /// Read a catalog file, choosing the format by extension.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();

        let text = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let document = match extension.as_str() {
            "json" => Self::from_json_str(&text)?,
            "toml" => Self::from_toml_str(&text)?,
            _ => return Err(RegistryError::UnsupportedFormat { extension }),
        };

        tracing::debug!(
            path = %path.display(),
            platforms = document.platforms.len(),
            "catalog document read"
        );
        Ok(document)
    }

    /// Validate every entry and flatten the document into capability entries,
    /// ordered by platform, then category, then declaration order.
    pub fn into_entries(self) -> Result<Vec<CapabilityEntry>> {
        let mut entries = Vec::new();
        let mut seen: HashSet<(String, String)> = HashSet::new();

        for (platform, sections) in self.platforms {
            let categorized = [
                (Category::Crawler, sections.crawlers),
                (Category::Analysis, sections.analysis),
                (Category::Interactive, sections.interactive),
            ];

            let mut index = 0usize;
            for (category, raws) in categorized {
                for raw in raws {
                    let entry = validate_capability(&platform, category, index, raw)?;
                    if !seen.insert((entry.agent_id.clone(), entry.function_id.clone())) {
                        return Err(RegistryError::DuplicateCapability {
                            agent_id: entry.agent_id,
                            function_id: entry.function_id,
                        });
                    }
                    entries.push(entry);
                    index += 1;
                }
            }
        }

        Ok(entries)
    }
}

fn validate_capability(
    platform: &str,
    category: Category,
    index: usize,
    raw: RawCapability,
) -> Result<CapabilityEntry> {
    let missing = |field: &'static str| RegistryError::MissingField {
        platform: platform.to_owned(),
        index,
        field,
    };

    let agent_id = non_empty(raw.agent_id).ok_or_else(|| missing("agent_id"))?;
    let function_id = non_empty(raw.function_id).ok_or_else(|| missing("function_id"))?;

    let invalid = |reason: String| RegistryError::InvalidType {
        agent_id: agent_id.clone(),
        function_id: function_id.clone(),
        reason,
    };

    let mut parameters = Vec::with_capacity(raw.parameters.len());
    for param in raw.parameters {
        let name = non_empty(param.name).ok_or_else(|| missing("parameters[].name"))?;
        let type_text = non_empty(param.value_type).ok_or_else(|| missing("parameters[].type"))?;
        let value_type: ValueType = type_text
            .parse()
            .map_err(|e| invalid(format!("parameter `{name}`: {e}")))?;

        if parameters.iter().any(|p: &ParameterSpec| p.name == name) {
            return Err(RegistryError::DuplicateParameter {
                agent_id: agent_id.clone(),
                function_id: function_id.clone(),
                name,
            });
        }

        let spec = ParameterSpec {
            name,
            value_type,
            description: param.description,
            required: param.required.unwrap_or(true),
            default: param.default.filter(|v| !v.is_null()),
            allowed: param.allowed,
        };

        if let Some(allowed) = &spec.allowed {
            if let Some(bad) = allowed.iter().find(|v| !spec.value_type.accepts(v)) {
                return Err(invalid(format!(
                    "parameter `{}`: enum value {bad} is not a {}",
                    spec.name, spec.value_type
                )));
            }
        }
        if let Some(default) = &spec.default {
            spec.check(default)
                .map_err(|reason| invalid(format!("invalid default: {reason}")))?;
        }

        parameters.push(spec);
    }

    let raw_returns = raw.returns.ok_or_else(|| missing("returns"))?;
    let type_text = non_empty(raw_returns.value_type).ok_or_else(|| missing("returns.type"))?;
    let returns = ReturnSpec {
        value_type: type_text
            .parse()
            .map_err(|e| invalid(format!("return type: {e}")))?,
        description: raw_returns.description,
    };

    Ok(CapabilityEntry {
        platform: platform.to_owned(),
        category,
        agent_id,
        function_id,
        description: raw.description,
        parameters,
        returns,
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_owned()).filter(|s| !s.is_empty())
}

/// Short type description of a JSON value for error messages.
pub(crate) fn describe_value(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
