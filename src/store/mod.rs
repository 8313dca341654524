//! The coordination-state contract (C1) and its two implementations: a
//! Postgres-backed store that invokes the SQL functions in
//! `migrations/0002_functions.sql`, and an in-memory store that mirrors
//! the same semantics in plain Rust for fast unit testing.

mod memory;
mod postgres;
mod types;

pub use memory::InMemoryOrchestratorStore;
pub use postgres::PostgresOrchestratorStore;
pub use types::{
    ClaimedTaskInfo, CompletionOutcome, FailureOutcome, RunInfo, RunStatus, StepStateInfo,
    StepStatus, StoreError, TaskStatus,
};

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::graph::WorkflowDef;

/// Coordination-state operations used by the public API and the worker
/// loop. Every method here corresponds to one of C3-C7's named SQL
/// functions (or a read used to surface run/step state to callers); no
/// method holds coordination truth in application memory between calls.
#[async_trait]
pub trait OrchestratorStore: Send + Sync + 'static {
    /// Persists a workflow's static graph (idempotent upsert), so that
    /// future `initialize_run` calls can resolve it by slug alone.
    async fn register_workflow(&self, workflow: &WorkflowDef) -> Result<(), StoreError>;

    /// C3: creates a run and seeds its root steps. Returns the run id
    /// passed in (generated by the caller via `Uuid::now_v7()`).
    async fn initialize_run(
        &self,
        run_id: Uuid,
        workflow_slug: &str,
        input: Value,
    ) -> Result<Uuid, StoreError>;

    async fn get_run(&self, run_id: Uuid) -> Result<RunInfo, StoreError>;

    async fn list_step_states(&self, run_id: Uuid) -> Result<Vec<StepStateInfo>, StoreError>;

    /// C5: resolves claimed queue messages into executable tasks with
    /// merged input. Returns only the subset of `message_ids` that were
    /// still `queued` (duplicate/late deliveries are silently skipped).
    async fn start_tasks(
        &self,
        workflow_slug: &str,
        message_ids: &[i64],
        worker_id: &str,
    ) -> Result<Vec<ClaimedTaskInfo>, StoreError>;

    /// C6: records a task's successful output and cascades completion
    /// through dependents, possibly completing the step, the run, or
    /// failing the run on a map type violation.
    async fn complete_task(
        &self,
        run_id: Uuid,
        step_slug: &str,
        task_index: i64,
        output: Value,
    ) -> Result<CompletionOutcome, StoreError>;

    /// C7: records a task failure, scheduling a redelivery via the
    /// queue's visibility timeout if `retryable` and attempts remain,
    /// otherwise failing the task, its step, and the run. `retryable`
    /// carries the step function's own hint (§7: absent a hint, callers
    /// pass `true`); `false` forces a terminal failure even with attempts
    /// remaining.
    async fn fail_task(
        &self,
        run_id: Uuid,
        step_slug: &str,
        task_index: i64,
        error_message: &str,
        retryable: bool,
    ) -> Result<FailureOutcome, StoreError>;
}
