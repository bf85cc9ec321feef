//! In-memory workflow store.
//!
//! Holds every live workflow behind its own async mutex so concurrent
//! callers serialize `advance`/`resume`/`cancel` per workflow while distinct
//! workflows proceed independently.  The map itself is a [`DashMap`]; the
//! per-workflow lock is cloned out before any await so no shard lock is held
//! across a capability call.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{AgentError, Result};
use crate::executor::{Advance, Executor, SuppliedInput};
use crate::resolver::MissingInput;
use crate::workflow::{Workflow, WorkflowStatus};

/// Shared handle to one stored workflow.
pub type WorkflowHandle = Arc<Mutex<Workflow>>;

/// Concurrent map of workflows driven by one executor.
#[derive(Debug, Clone)]
pub struct WorkflowStore {
    executor: Arc<Executor>,
    workflows: Arc<DashMap<Uuid, WorkflowHandle>>,
}

impl WorkflowStore {
    pub fn new(executor: Arc<Executor>) -> Self {
        Self {
            executor,
            workflows: Arc::new(DashMap::new()),
        }
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    /// Store a workflow and return its id.
    pub fn insert(&self, workflow: Workflow) -> Uuid {
        let id = workflow.workflow_id;
        self.workflows.insert(id, Arc::new(Mutex::new(workflow)));
        tracing::debug!(workflow_id = %id, "workflow stored");
        id
    }

    pub fn get(&self, id: Uuid) -> Option<WorkflowHandle> {
        self.workflows.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, id: Uuid) -> Option<WorkflowHandle> {
        self.workflows.remove(&id).map(|(_, handle)| handle)
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }

    /// Ids and statuses of stored workflows, oldest first.
    ///
    /// Workflows locked by another caller at this moment are left out.
    pub fn list(&self) -> Vec<(Uuid, WorkflowStatus)> {
        let mut listed: Vec<(Uuid, WorkflowStatus)> = self
            .workflows
            .iter()
            .filter_map(|entry| {
                entry
                    .value()
                    .try_lock()
                    .ok()
                    .map(|workflow| (*entry.key(), workflow.status))
            })
            .collect();
        // v7 ids sort by creation time.
        listed.sort_by_key(|(id, _)| *id);
        listed
    }

    /// Advance one stored workflow by one step.
    pub async fn advance(&self, id: Uuid) -> Result<Advance> {
        let handle = self.handle(id)?;
        let mut workflow = handle.lock().await;
        self.executor.advance(&mut workflow).await
    }

    /// Advance until the workflow is terminal or waiting for input.
    pub async fn run_until_blocked(&self, id: Uuid) -> Result<Advance> {
        let handle = self.handle(id)?;
        let mut workflow = handle.lock().await;
        self.executor.run_until_blocked(&mut workflow).await
    }

    pub async fn resume(&self, id: Uuid, inputs: Vec<SuppliedInput>) -> Result<()> {
        let handle = self.handle(id)?;
        let mut workflow = handle.lock().await;
        self.executor.resume(&mut workflow, inputs)
    }

    pub async fn cancel(&self, id: Uuid) -> Result<()> {
        let handle = self.handle(id)?;
        let mut workflow = handle.lock().await;
        self.executor.cancel(&mut workflow)
    }

    pub async fn pending_inputs(&self, id: Uuid) -> Result<Vec<MissingInput>> {
        let handle = self.handle(id)?;
        let workflow = handle.lock().await;
        Ok(self.executor.pending_inputs(&workflow))
    }

    /// A clone of the workflow's current state.
    pub async fn snapshot(&self, id: Uuid) -> Result<Workflow> {
        let handle = self.handle(id)?;
        let workflow = handle.lock().await;
        Ok(workflow.clone())
    }

    fn handle(&self, id: Uuid) -> Result<WorkflowHandle> {
        self.get(id)
            .ok_or_else(|| AgentError::WorkflowNotFound { workflow_id: id })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
