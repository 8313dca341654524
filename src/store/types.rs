//! Data-contract types shared by every `OrchestratorStore` implementation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("run not found: {0}")]
    RunNotFound(Uuid),

    #[error("workflow not registered: {0}")]
    WorkflowNotFound(String),

    #[error("task not found: run={0} step={1} index={2}")]
    TaskNotFound(Uuid, String, i64),

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// A run's lifecycle status (spec glossary: `started` | `completed` | `failed`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Started,
    Completed,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Started => write!(f, "started"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(Self::Started),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(StoreError::Database(format!("unknown run status {other}"))),
        }
    }
}

/// A step state's lifecycle status (spec glossary: `created` | `started` |
/// `completed` | `failed`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Created,
    Started,
    Completed,
    Failed,
}

impl std::str::FromStr for StepStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "started" => Ok(Self::Started),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(StoreError::Database(format!("unknown step status {other}"))),
        }
    }
}

/// A task's lifecycle status (spec glossary: `queued` | `started` |
/// `completed` | `failed`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Started,
    Completed,
    Failed,
}

impl std::str::FromStr for TaskStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "started" => Ok(Self::Started),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(StoreError::Database(format!("unknown task status {other}"))),
        }
    }
}

/// What `get_run_status` (the public core API) returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunInfo {
    pub id: Uuid,
    pub workflow_slug: String,
    pub status: RunStatus,
    pub input: Value,
    pub output: Option<Value>,
    pub error_message: Option<String>,
    pub remaining_steps: i32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct StepStateInfo {
    pub step_slug: String,
    pub status: StepStatus,
    pub remaining_deps: i32,
    pub initial_tasks: Option<i64>,
    pub remaining_tasks: Option<i64>,
    pub error_message: Option<String>,
}

/// A task row once `start_tasks` has resolved it to an executable unit of
/// work, handed to the worker loop together with its merged input.
#[derive(Debug, Clone)]
pub struct ClaimedTaskInfo {
    pub run_id: Uuid,
    pub step_slug: String,
    pub task_index: i64,
    pub input: Value,
    pub message_id: i64,
    pub attempts_count: u32,
    pub max_attempts: u32,
    pub timeout_seconds: i32,
}

/// Outcome returned by `complete_task`/`fail_task`: matches the +1/0/-1
/// contract each SQL function is documented to follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    Applied,
    AlreadyFailed,
    TypeViolation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    RetryScheduled,
    AlreadyFailed,
    TerminalFailure,
}
