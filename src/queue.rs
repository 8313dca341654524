//! The pgmq-backed queue adapter (C2).
//!
//! Almost every queue operation the coordination layer needs
//! (`send_batch`, `set_vt`, `archive`) is issued from inside the PL/pgSQL
//! functions in `migrations/0002_functions.sql`, so it commits atomically
//! with the coordination-table mutation it accompanies. The only two
//! operations the Rust layer calls directly are queue creation (once, at
//! workflow registration) and the long-poll read a worker uses to claim
//! deliverable messages.

use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};

use crate::store::StoreError;

/// A message read off a workflow's queue, not yet turned into a task row.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub message_id: i64,
    pub read_count: i32,
}

/// Thin wrapper around the pgmq extension's SQL-callable functions.
///
/// Named for the workflow-slug queue it's created against: one pgmq queue
/// per workflow, matching the 1:1 `workflow_slug <-> queue name` mapping
/// assumed throughout the coordination functions.
#[derive(Clone)]
pub struct QueueAdapter {
    pool: PgPool,
}

impl QueueAdapter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the underlying pgmq queue for a workflow, if it doesn't
    /// already exist. Idempotent; safe to call on every process start.
    #[instrument(skip(self))]
    pub async fn create_queue(&self, workflow_slug: &str) -> Result<(), StoreError> {
        sqlx::query("SELECT pgmq.create($1)")
            .bind(workflow_slug)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("failed to create queue for {}: {}", workflow_slug, e);
                StoreError::Database(e.to_string())
            })?;

        debug!(%workflow_slug, "queue ready");
        Ok(())
    }

    /// Long-polls a workflow's queue for up to `max_messages` deliverable
    /// messages, applying `vt_seconds` as each message's new visibility
    /// timeout. Blocks server-side for up to `poll_timeout_seconds`
    /// waiting for at least one message before returning an empty batch.
    #[instrument(skip(self))]
    pub async fn read_with_poll(
        &self,
        workflow_slug: &str,
        vt_seconds: i32,
        max_messages: i32,
        poll_timeout_seconds: i32,
    ) -> Result<Vec<QueueMessage>, StoreError> {
        let rows = sqlx::query(
            "SELECT msg_id, read_ct FROM pgmq.read_with_poll($1, $2, $3, $4)",
        )
        .bind(workflow_slug)
        .bind(vt_seconds)
        .bind(max_messages)
        .bind(poll_timeout_seconds)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("failed to poll queue {}: {}", workflow_slug, e);
            StoreError::Database(e.to_string())
        })?;

        Ok(rows
            .into_iter()
            .map(|row| QueueMessage {
                message_id: row.get("msg_id"),
                read_count: row.get("read_ct"),
            })
            .collect())
    }
}
