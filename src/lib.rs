//! # dagflow
//!
//! A PostgreSQL-backed workflow orchestration engine for DAGs of step
//! functions, with at-least-once delivery, per-step retries, and parallel
//! fan-out, built on the pgmq queue extension for visibility-timeout-based
//! task dispatch.
//!
//! ## Features
//!
//! - **Relational coordination state**: runs, step states, and tasks all
//!   live in Postgres; there is no event log and no application-memory
//!   cache of coordination truth.
//! - **Transactional queueing**: the coordination functions in
//!   `migrations/0002_functions.sql` call pgmq's SQL functions directly,
//!   so queue sends/archives commit atomically with the state they
//!   accompany.
//! - **Deterministic retries**: exponential backoff via visibility-timeout
//!   manipulation, no jitter by default.
//! - **Map fan-out**: a step's width resolves from its parent's array
//!   output at runtime; a zero-width map step completes without ever
//!   enqueuing a task.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Orchestrator                          │
//! │   register_workflow / start_run / get_run_status            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   OrchestratorStore                         │
//! │  (Postgres: workflows, runs, step_states, step_tasks)        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      WorkerPool                              │
//! │  (long-polls pgmq, runs step functions, reports outcomes)    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod graph;
pub mod queue;
pub mod reliability;
pub mod step;
pub mod store;
pub mod telemetry;
pub mod worker;

/// Prelude for common imports.
pub mod prelude {
    pub use crate::api::{Orchestrator, OrchestratorError, RunProgress, RunStatusView};
    pub use crate::graph::{
        validate_graph, GraphError, StepOptions, StepType, WorkflowDef, WorkflowStepDef,
    };
    pub use crate::queue::QueueAdapter;
    pub use crate::reliability::RetryPolicy;
    pub use crate::step::{step_fn, CancellationHandle, StepContext, StepError, StepFn, StepFunctions, StepOutput};
    pub use crate::store::{
        InMemoryOrchestratorStore, OrchestratorStore, PostgresOrchestratorStore, RunInfo,
        RunStatus, StoreError,
    };
    pub use crate::worker::{BackpressureConfig, WorkerPool, WorkerPoolConfig, WorkerPoolError};
}

pub use api::{Orchestrator, OrchestratorError, RunProgress, RunStatusView};
pub use graph::{validate_graph, GraphError, StepOptions, StepType, WorkflowDef, WorkflowStepDef};
pub use queue::QueueAdapter;
pub use reliability::RetryPolicy;
pub use step::{step_fn, CancellationHandle, StepContext, StepError, StepFn, StepFunctions, StepOutput};
pub use store::{
    InMemoryOrchestratorStore, OrchestratorStore, PostgresOrchestratorStore, RunInfo, RunStatus,
    StoreError,
};
pub use worker::{BackpressureConfig, WorkerPool, WorkerPoolConfig, WorkerPoolError};
