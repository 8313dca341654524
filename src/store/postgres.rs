//! PostgreSQL implementation of `OrchestratorStore`.
//!
//! Thin invocation wrappers over the SQL functions in
//! `migrations/0002_functions.sql`; coordination logic itself lives there,
//! not here, so that it commits atomically with the pgmq queue operations
//! those functions call in turn.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::{
    types::{RunStatus, StepStatus},
    ClaimedTaskInfo, CompletionOutcome, FailureOutcome, OrchestratorStore, RunInfo, StepStateInfo,
    StoreError,
};
use crate::graph::WorkflowDef;
use crate::queue::QueueAdapter;

#[derive(Clone)]
pub struct PostgresOrchestratorStore {
    pool: PgPool,
    queue: QueueAdapter,
}

impl PostgresOrchestratorStore {
    pub fn new(pool: PgPool) -> Self {
        let queue = QueueAdapter::new(pool.clone());
        Self { pool, queue }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl OrchestratorStore for PostgresOrchestratorStore {
    #[instrument(skip(self, workflow))]
    async fn register_workflow(&self, workflow: &WorkflowDef) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO workflows (
                workflow_slug, default_max_attempts, default_timeout_seconds,
                default_retry_base_seconds, default_retry_cap_seconds
            )
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (workflow_slug) DO UPDATE SET
                default_max_attempts = EXCLUDED.default_max_attempts,
                default_timeout_seconds = EXCLUDED.default_timeout_seconds,
                default_retry_base_seconds = EXCLUDED.default_retry_base_seconds,
                default_retry_cap_seconds = EXCLUDED.default_retry_cap_seconds
            "#,
        )
        .bind(&workflow.workflow_slug)
        .bind(workflow.default_max_attempts as i32)
        .bind(workflow.default_timeout.as_secs() as i32)
        .bind(workflow.default_retry_base.as_secs() as i32)
        .bind(workflow.default_retry_cap.as_secs() as i32)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        for (index, step) in workflow.steps.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO workflow_steps (
                    workflow_slug, step_slug, step_type, step_index, initial_tasks,
                    max_attempts, timeout_seconds, retry_base_seconds, retry_cap_seconds
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (workflow_slug, step_slug) DO UPDATE SET
                    step_type = EXCLUDED.step_type,
                    step_index = EXCLUDED.step_index,
                    initial_tasks = EXCLUDED.initial_tasks,
                    max_attempts = EXCLUDED.max_attempts,
                    timeout_seconds = EXCLUDED.timeout_seconds,
                    retry_base_seconds = EXCLUDED.retry_base_seconds,
                    retry_cap_seconds = EXCLUDED.retry_cap_seconds
                "#,
            )
            .bind(&workflow.workflow_slug)
            .bind(&step.step_slug)
            .bind(step.step_type.to_string())
            .bind(index as i32)
            .bind(step.options.initial_tasks)
            .bind(step.options.max_attempts.map(|n| n as i32))
            .bind(step.options.timeout.map(|d| d.as_secs() as i32))
            .bind(step.options.retry_base.map(|d| d.as_secs() as i32))
            .bind(step.options.retry_cap.map(|d| d.as_secs() as i32))
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

            for depends_on_step in &step.depends_on {
                sqlx::query(
                    r#"
                    INSERT INTO workflow_step_dependencies (workflow_slug, step_slug, depends_on_step)
                    VALUES ($1, $2, $3)
                    ON CONFLICT DO NOTHING
                    "#,
                )
                .bind(&workflow.workflow_slug)
                .bind(&step.step_slug)
                .bind(depends_on_step)
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;
            }
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        self.queue.create_queue(&workflow.workflow_slug).await?;

        debug!(workflow_slug = %workflow.workflow_slug, "workflow registered");
        Ok(())
    }

    #[instrument(skip(self, input))]
    async fn initialize_run(
        &self,
        run_id: Uuid,
        workflow_slug: &str,
        input: Value,
    ) -> Result<Uuid, StoreError> {
        let row = sqlx::query("SELECT initialize_run($1, $2, $3) AS run_id")
            .bind(run_id)
            .bind(workflow_slug)
            .bind(&input)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                error!("initialize_run failed: {}", e);
                StoreError::Database(e.to_string())
            })?;

        Ok(row.get("run_id"))
    }

    #[instrument(skip(self))]
    async fn get_run(&self, run_id: Uuid) -> Result<RunInfo, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, workflow_slug, status, input, output, error_message,
                   remaining_steps, created_at, started_at, completed_at, failed_at
            FROM runs
            WHERE id = $1
            "#,
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?
        .ok_or(StoreError::RunNotFound(run_id))?;

        let status: String = row.get("status");
        Ok(RunInfo {
            id: row.get("id"),
            workflow_slug: row.get("workflow_slug"),
            status: status.parse::<RunStatus>()?,
            input: row.get("input"),
            output: row.get("output"),
            error_message: row.get("error_message"),
            remaining_steps: row.get("remaining_steps"),
            created_at: row.get("created_at"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
            failed_at: row.get("failed_at"),
        })
    }

    #[instrument(skip(self))]
    async fn list_step_states(&self, run_id: Uuid) -> Result<Vec<StepStateInfo>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT step_slug, status, remaining_deps, initial_tasks, remaining_tasks, error_message
            FROM step_states
            WHERE run_id = $1
            ORDER BY step_slug
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        rows.into_iter()
            .map(|row| {
                let status: String = row.get("status");
                Ok(StepStateInfo {
                    step_slug: row.get("step_slug"),
                    status: status.parse::<StepStatus>()?,
                    remaining_deps: row.get("remaining_deps"),
                    initial_tasks: row.get("initial_tasks"),
                    remaining_tasks: row.get("remaining_tasks"),
                    error_message: row.get("error_message"),
                })
            })
            .collect()
    }

    #[instrument(skip(self, message_ids))]
    async fn start_tasks(
        &self,
        workflow_slug: &str,
        message_ids: &[i64],
        worker_id: &str,
    ) -> Result<Vec<ClaimedTaskInfo>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT st.run_id, st.step_slug, st.task_index, st.input, st.message_id,
                   t.attempts_count, t.max_attempts, COALESCE(ws.timeout_seconds, w.default_timeout_seconds) AS timeout_seconds
            FROM start_tasks($1, $2, $3) st
            JOIN step_tasks t ON t.run_id = st.run_id AND t.step_slug = st.step_slug AND t.task_index = st.task_index
            JOIN workflow_steps ws ON ws.workflow_slug = $1 AND ws.step_slug = st.step_slug
            JOIN workflows w ON w.workflow_slug = $1
            "#,
        )
        .bind(workflow_slug)
        .bind(message_ids)
        .bind(worker_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("start_tasks failed: {}", e);
            StoreError::Database(e.to_string())
        })?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let attempts_count: i32 = row.get("attempts_count");
                let max_attempts: i32 = row.get("max_attempts");
                ClaimedTaskInfo {
                    run_id: row.get("run_id"),
                    step_slug: row.get("step_slug"),
                    task_index: row.get("task_index"),
                    input: row.get("input"),
                    message_id: row.get("message_id"),
                    attempts_count: attempts_count as u32,
                    max_attempts: max_attempts as u32,
                    timeout_seconds: row.get("timeout_seconds"),
                }
            })
            .collect())
    }

    #[instrument(skip(self, output))]
    async fn complete_task(
        &self,
        run_id: Uuid,
        step_slug: &str,
        task_index: i64,
        output: Value,
    ) -> Result<CompletionOutcome, StoreError> {
        let row = sqlx::query("SELECT complete_task($1, $2, $3, $4) AS outcome")
            .bind(run_id)
            .bind(step_slug)
            .bind(task_index)
            .bind(&output)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                error!("complete_task failed: {}", e);
                StoreError::Database(e.to_string())
            })?;

        match row.get::<i32, _>("outcome") {
            1 => Ok(CompletionOutcome::Applied),
            0 => Ok(CompletionOutcome::AlreadyFailed),
            -1 => Ok(CompletionOutcome::TypeViolation),
            other => Err(StoreError::Database(format!(
                "unexpected complete_task outcome {other}"
            ))),
        }
    }

    #[instrument(skip(self))]
    async fn fail_task(
        &self,
        run_id: Uuid,
        step_slug: &str,
        task_index: i64,
        error_message: &str,
        retryable: bool,
    ) -> Result<FailureOutcome, StoreError> {
        let row = sqlx::query("SELECT fail_task($1, $2, $3, $4, $5) AS outcome")
            .bind(run_id)
            .bind(step_slug)
            .bind(task_index)
            .bind(error_message)
            .bind(retryable)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                error!("fail_task failed: {}", e);
                StoreError::Database(e.to_string())
            })?;

        match row.get::<i32, _>("outcome") {
            1 => Ok(FailureOutcome::RetryScheduled),
            0 => Ok(FailureOutcome::AlreadyFailed),
            -1 => Ok(FailureOutcome::TerminalFailure),
            other => Err(StoreError::Database(format!(
                "unexpected fail_task outcome {other}"
            ))),
        }
    }
}
