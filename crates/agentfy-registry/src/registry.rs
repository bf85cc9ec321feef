//! The capability registry.
//!
//! A [`Registry`] is built once at startup from a validated catalog plus the
//! bound [`Agent`] implementations, and is read-only afterwards.  It is meant
//! to be shared as `Arc<Registry>` by every planner and executor in the
//! process; there is deliberately no mutation API, so adding capabilities
//! means building a new registry.
//!
//! # Example
//!
//! ```ignore
//! let document = CatalogDocument::from_path("config/agents_registry.json")?;
//! let registry = RegistryBuilder::new(document)
//!     .bind(Arc::new(x_interactive))
//!     .build()?;
//! let entry = registry.lookup("x_interactive", "post_tweets").unwrap();
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::{Value, json};

use crate::agent::Agent;
use crate::catalog::{CapabilityEntry, CatalogDocument, Category};
use crate::error::{DispatchError, RegistryError, Result};

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Immutable catalog of capabilities plus their dispatch table.
pub struct Registry {
    /// All entries, ordered by platform, category, declaration order.
    entries: Vec<CapabilityEntry>,
    /// agent_id -> function_id -> index into `entries`.
    index: HashMap<String, HashMap<String, usize>>,
    /// Bound implementations keyed by agent id.
    agents: HashMap<String, Arc<dyn Agent>>,
}

/// A resolved dispatch target.
#[derive(Clone, Copy)]
pub struct Dispatch<'a> {
    pub entry: &'a CapabilityEntry,
    pub agent: &'a Arc<dyn Agent>,
}

impl Registry {
    /// Look up the entry registered for `(agent_id, function_id)`.
    pub fn lookup(&self, agent_id: &str, function_id: &str) -> Option<&CapabilityEntry> {
        self.index
            .get(agent_id)
            .and_then(|functions| functions.get(function_id))
            .map(|&i| &self.entries[i])
    }

    /// All entries for a platform, in catalog order.  Unknown platforms yield
    /// an empty list.
    pub fn list(&self, platform: &str) -> Vec<&CapabilityEntry> {
        self.entries
            .iter()
            .filter(|e| e.platform == platform)
            .collect()
    }

    /// Every entry in the registry.
    pub fn entries(&self) -> &[CapabilityEntry] {
        &self.entries
    }

    /// Platform names that have at least one entry.
    pub fn platforms(&self) -> Vec<&str> {
        let mut platforms: Vec<&str> = self.entries.iter().map(|e| e.platform.as_str()).collect();
        platforms.dedup();
        platforms
    }

    /// Number of registered capabilities.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve a step's capability to its entry and bound implementation.
    pub fn dispatch(
        &self,
        agent_id: &str,
        function_id: &str,
    ) -> std::result::Result<Dispatch<'_>, DispatchError> {
        let functions = self
            .index
            .get(agent_id)
            .ok_or_else(|| DispatchError::AgentNotFound {
                agent_id: agent_id.to_owned(),
            })?;

        let &i = functions
            .get(function_id)
            .ok_or_else(|| DispatchError::FunctionNotFound {
                agent_id: agent_id.to_owned(),
                function_id: function_id.to_owned(),
            })?;

        let agent = self
            .agents
            .get(agent_id)
            .ok_or_else(|| DispatchError::AgentNotFound {
                agent_id: agent_id.to_owned(),
            })?;

        Ok(Dispatch {
            entry: &self.entries[i],
            agent,
        })
    }

    /// The serializable schema handed to the planner as grounding context.
    ///
    /// Grouped as `platform -> category section -> [capability]`.
    pub fn describe(&self) -> Value {
        let mut platforms: BTreeMap<&str, BTreeMap<&'static str, Vec<Value>>> = BTreeMap::new();

        for entry in &self.entries {
            let parameters: Vec<Value> = entry
                .parameters
                .iter()
                .map(|p| {
                    let mut param = json!({
                        "name": p.name,
                        "type": p.value_type.to_string(),
                        "description": p.description,
                        "required": p.required,
                    });
                    if let Some(default) = &p.default {
                        param["default"] = default.clone();
                    }
                    if let Some(allowed) = &p.allowed {
                        param["enum"] = Value::Array(allowed.clone());
                    }
                    param
                })
                .collect();

            platforms
                .entry(entry.platform.as_str())
                .or_default()
                .entry(entry.category.section())
                .or_default()
                .push(json!({
                    "agent_id": entry.agent_id,
                    "function_id": entry.function_id,
                    "description": entry.description,
                    "parameters": parameters,
                    "returns": {
                        "type": entry.returns.value_type.to_string(),
                        "description": entry.returns.description,
                    },
                }));
        }

        json!(platforms)
    }

    /// Entries grouped by category, for display.
    pub fn by_category(&self, category: Category) -> Vec<&CapabilityEntry> {
        self.entries
            .iter()
            .filter(|e| e.category == category)
            .collect()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut agents: Vec<&String> = self.agents.keys().collect();
        agents.sort();
        f.debug_struct("Registry")
            .field("capabilities", &self.entries.len())
            .field("bound_agents", &agents)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Assembles a [`Registry`] from a catalog and agent implementations.
pub struct RegistryBuilder {
    document: CatalogDocument,
    agents: Vec<Arc<dyn Agent>>,
}

impl RegistryBuilder {
    pub fn new(document: CatalogDocument) -> Self {
        Self {
            document,
            agents: Vec::new(),
        }
    }

    /// Bind an implementation for the agent it reports via
    /// [`Agent::agent_id`].
    pub fn bind(mut self, agent: Arc<dyn Agent>) -> Self {
        self.agents.push(agent);
        self
    }

    /// Build a registry in which every catalog agent has an implementation.
    ///
    /// Fails with [`RegistryError::UnboundAgent`] for any agent left unbound,
    /// and [`RegistryError::UnboundFunction`] when an implementation that
    /// lists its functions is missing one the catalog declares.
    pub fn build(self) -> Result<Registry> {
        self.assemble(true)
    }

    /// Build a registry for planning and inspection only.
    ///
    /// Agents without an implementation are allowed; dispatching to them
    /// yields [`DispatchError::AgentNotFound`].
    pub fn build_catalog_only(self) -> Result<Registry> {
        self.assemble(false)
    }

    fn assemble(self, require_bindings: bool) -> Result<Registry> {
        let entries = self.document.into_entries()?;

        let mut index: HashMap<String, HashMap<String, usize>> = HashMap::new();
        for (i, entry) in entries.iter().enumerate() {
            index
                .entry(entry.agent_id.clone())
                .or_default()
                .insert(entry.function_id.clone(), i);
        }

        let mut agents: HashMap<String, Arc<dyn Agent>> = HashMap::new();
        for agent in self.agents {
            let agent_id = agent.agent_id().to_owned();
            if !index.contains_key(&agent_id) {
                tracing::warn!(
                    agent_id = %agent_id,
                    "ignoring implementation for agent absent from catalog"
                );
                continue;
            }
            if agents.contains_key(&agent_id) {
                return Err(RegistryError::DuplicateAgent { agent_id });
            }
            agents.insert(agent_id, agent);
        }

        // Check bindings in catalog order so the first reported gap is stable.
        for entry in &entries {
            match agents.get(&entry.agent_id) {
                None if require_bindings => {
                    return Err(RegistryError::UnboundAgent {
                        agent_id: entry.agent_id.clone(),
                    });
                }
                None => {}
                Some(agent) => {
                    if let Some(provided) = agent.function_ids() {
                        if !provided.iter().any(|f| f == &entry.function_id) {
                            return Err(RegistryError::UnboundFunction {
                                agent_id: entry.agent_id.clone(),
                                function_id: entry.function_id.clone(),
                            });
                        }
                    }
                }
            }
        }

        tracing::info!(
            capabilities = entries.len(),
            agents = index.len(),
            bound = agents.len(),
            "capability registry loaded"
        );

        Ok(Registry {
            entries,
            index,
            agents,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
