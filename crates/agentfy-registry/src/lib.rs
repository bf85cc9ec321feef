//! Capability registry for agentfy.
//!
//! The registry is the leaf dependency of the planner and executor: an
//! immutable, loaded-once catalog mapping `(agent_id, function_id)` to a typed
//! function contract, plus the table of bound implementations used for
//! dispatch.
//!
//! - **[`catalog`]** -- Catalog document parsing (JSON/TOML) and validation
//!   into [`CapabilityEntry`] values.
//! - **[`types`]** -- [`ValueType`], the parsed form of catalog type strings,
//!   with literal and declared-type assignability checks.
//! - **[`agent`]** -- The [`Agent`] trait implemented by platform agents, and
//!   [`FunctionAgent`] for closure-backed tables.
//! - **[`registry`]** -- [`Registry`] lookup/list/describe/dispatch and its
//!   [`RegistryBuilder`].
//! - **[`error`]** -- [`RegistryError`] and [`DispatchError`].

pub mod agent;
pub mod catalog;
pub mod error;
pub mod registry;
pub mod types;

pub use agent::{Agent, Arguments, CapabilityError, CapabilityFn, CapabilityFuture, FunctionAgent};
pub use catalog::{CapabilityEntry, CatalogDocument, Category, ParameterSpec, ReturnSpec};
pub use error::{DispatchError, RegistryError, Result};
pub use registry::{Dispatch, Registry, RegistryBuilder};
pub use types::ValueType;
