//! The public core API: register a workflow, start a run, inspect its
//! status, and run a worker loop against it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;
use uuid::Uuid;

use crate::graph::{validate_graph, GraphError, WorkflowDef};
use crate::queue::QueueAdapter;
use crate::step::StepFunctions;
use crate::store::{OrchestratorStore, RunInfo, StepStatus, StoreError};
use crate::worker::{WorkerPool, WorkerPoolConfig, WorkerPoolError};

/// How many of a run's steps have completed, for progress reporting
/// alongside `get_run_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunProgress {
    pub completed_steps: usize,
    pub total_steps: usize,
}

/// §6: `get_run_status` -> `{status, output|error, progress}`. Flattens
/// `RunInfo`'s fields alongside the computed `progress` breakdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStatusView {
    #[serde(flatten)]
    pub run: RunInfo,
    pub progress: RunProgress,
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("invalid workflow graph: {0}")]
    InvalidGraph(#[from] GraphError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Handle bundling a coordination store with a queue adapter, the two
/// things every public operation needs.
pub struct Orchestrator<S: OrchestratorStore> {
    store: Arc<S>,
    queue: QueueAdapter,
}

impl<S: OrchestratorStore> Orchestrator<S> {
    pub fn new(store: Arc<S>, queue: QueueAdapter) -> Self {
        Self { store, queue }
    }

    /// Validates and persists a workflow's static graph, creating its
    /// backing queue. Call once per workflow version at deploy time, not
    /// per run.
    #[instrument(skip(self, workflow))]
    pub async fn register_workflow(&self, workflow: &WorkflowDef) -> Result<(), OrchestratorError> {
        validate_graph(workflow)?;
        self.store.register_workflow(workflow).await?;
        Ok(())
    }

    /// C3: starts a new run of a registered workflow. `run_id`s are
    /// generated client-side (`Uuid::now_v7()`) rather than by Postgres,
    /// so callers can reference the run before the initializing
    /// transaction commits.
    #[instrument(skip(self, input))]
    pub async fn start_run(
        &self,
        workflow_slug: &str,
        input: Value,
    ) -> Result<Uuid, OrchestratorError> {
        let run_id = Uuid::now_v7();
        self.store.initialize_run(run_id, workflow_slug, input).await?;
        Ok(run_id)
    }

    /// Returns a run's status, output/error, and step-completion progress.
    #[instrument(skip(self))]
    pub async fn get_run_status(&self, run_id: Uuid) -> Result<RunStatusView, OrchestratorError> {
        let run = self.store.get_run(run_id).await?;
        let step_states = self.store.list_step_states(run_id).await?;
        let total_steps = step_states.len();
        let completed_steps = step_states
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count();

        Ok(RunStatusView {
            run,
            progress: RunProgress {
                completed_steps,
                total_steps,
            },
        })
    }

    /// Builds (but does not start) a worker pool bound to this
    /// orchestrator's store, dispatching claimed tasks to `step_functions`.
    pub fn worker_pool(&self, step_functions: StepFunctions, config: WorkerPoolConfig) -> WorkerPool {
        let store: Arc<dyn OrchestratorStore> = self.store.clone();
        WorkerPool::new(store, self.queue.clone(), step_functions, config)
    }
}

impl From<WorkerPoolError> for OrchestratorError {
    fn from(err: WorkerPoolError) -> Self {
        match err {
            WorkerPoolError::Store(e) => Self::Store(e),
            other => Self::Store(StoreError::Database(other.to_string())),
        }
    }
}
