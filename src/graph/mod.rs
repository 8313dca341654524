//! Static workflow graphs: the data the orchestrator reads, never mutates.
//!
//! A graph is authored once (by a DSL, a builder API, or a migration script —
//! all out of scope here) and persisted into `workflow` / `workflow_step` /
//! `workflow_step_dependencies_def`. The core only ever reads it back.

pub mod definition;
pub mod validate;

pub use definition::{StepOptions, StepType, WorkflowDef, WorkflowStepDef};
pub use validate::{validate_graph, GraphError};
