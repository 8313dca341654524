//! Worker pool for step-function execution (C8).
//!
//! Long-polls a workflow's pgmq queue, resolves claimed messages into
//! executable tasks via [`OrchestratorStore::start_tasks`], runs the
//! matching step function under a timeout, and reports the outcome back
//! through `complete_task`/`fail_task`. Redelivery of a task that outlives
//! its own visibility timeout is handled by pgmq itself; this pool never
//! tracks leases or heartbeats of its own.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::backpressure::{BackpressureConfig, BackpressureState};
use crate::queue::QueueAdapter;
use crate::step::{CancellationHandle, StepContext, StepFunctions};
use crate::store::{CompletionOutcome, FailureOutcome, OrchestratorStore, StoreError};

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// Unique worker ID (generated if not provided).
    pub worker_id: String,

    /// The workflow this pool executes steps for. One pool per workflow,
    /// matching the 1:1 workflow-slug to pgmq-queue mapping.
    pub workflow_slug: String,

    /// Maximum concurrent task executions.
    pub max_concurrency: usize,

    /// Backpressure configuration.
    pub backpressure: BackpressureConfig,

    /// Messages claimed per long-poll round.
    pub poll_batch_size: i32,

    /// How long the server-side long poll blocks waiting for at least one
    /// deliverable message before returning an empty batch.
    pub poll_timeout_seconds: i32,

    /// Visibility timeout applied to newly claimed messages. Should
    /// comfortably exceed the slowest step's `timeout_seconds`; a task
    /// that runs longer than this may be redelivered to another worker
    /// while still executing here (handled by the idempotency-key guard
    /// in `complete_task`).
    pub default_vt_seconds: i32,

    /// Graceful shutdown timeout.
    #[serde(with = "duration_millis")]
    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::now_v7()),
            workflow_slug: String::new(),
            max_concurrency: 10,
            backpressure: BackpressureConfig::default(),
            poll_batch_size: 10,
            poll_timeout_seconds: 5,
            default_vt_seconds: 60,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerPoolConfig {
    pub fn new(workflow_slug: impl Into<String>) -> Self {
        Self {
            workflow_slug: workflow_slug.into(),
            ..Default::default()
        }
    }

    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    pub fn with_backpressure(mut self, config: BackpressureConfig) -> Self {
        self.backpressure = config;
        self
    }

    pub fn with_poll_batch_size(mut self, n: i32) -> Self {
        self.poll_batch_size = n.max(1);
        self
    }

    pub fn with_default_vt_seconds(mut self, seconds: i32) -> Self {
        self.default_vt_seconds = seconds.max(1);
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPoolStatus {
    Starting,
    Running,
    Draining,
    Stopped,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerPoolError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("worker pool is already running")]
    AlreadyRunning,

    #[error("graceful shutdown timed out")]
    ShutdownTimeout,

    #[error("no step function registered for step: {0}")]
    StepFunctionNotFound(String),
}

pub struct WorkerPool {
    store: Arc<dyn OrchestratorStore>,
    queue: QueueAdapter,
    step_functions: Arc<StepFunctions>,
    config: WorkerPoolConfig,
    backpressure: Arc<BackpressureState>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    status: std::sync::RwLock<WorkerPoolStatus>,
    active_tasks: Arc<Semaphore>,
    poll_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(
        store: Arc<dyn OrchestratorStore>,
        queue: QueueAdapter,
        step_functions: StepFunctions,
        config: WorkerPoolConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let max_concurrency = config.max_concurrency;
        let backpressure = Arc::new(BackpressureState::new(
            config.backpressure.clone(),
            max_concurrency,
        ));

        Self {
            store,
            queue,
            step_functions: Arc::new(step_functions),
            config,
            backpressure,
            shutdown_tx,
            shutdown_rx,
            status: std::sync::RwLock::new(WorkerPoolStatus::Stopped),
            active_tasks: Arc::new(Semaphore::new(max_concurrency)),
            poll_handle: std::sync::Mutex::new(None),
        }
    }

    #[instrument(skip(self), fields(worker_id = %self.config.worker_id, workflow_slug = %self.config.workflow_slug))]
    pub async fn start(&self) -> Result<(), WorkerPoolError> {
        {
            let status = *self.status.read().unwrap();
            if status == WorkerPoolStatus::Running {
                return Err(WorkerPoolError::AlreadyRunning);
            }
        }

        info!(
            worker_id = %self.config.worker_id,
            workflow_slug = %self.config.workflow_slug,
            max_concurrency = self.config.max_concurrency,
            "starting worker pool"
        );

        *self.status.write().unwrap() = WorkerPoolStatus::Running;
        self.start_poll_loop();

        Ok(())
    }

    #[instrument(skip(self), fields(worker_id = %self.config.worker_id))]
    pub async fn shutdown(&self) -> Result<(), WorkerPoolError> {
        {
            let status = *self.status.read().unwrap();
            if status == WorkerPoolStatus::Stopped {
                return Ok(());
            }
        }

        info!(worker_id = %self.config.worker_id, "initiating graceful shutdown");
        *self.status.write().unwrap() = WorkerPoolStatus::Draining;
        let _ = self.shutdown_tx.send(true);

        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout;
        loop {
            let available = self.active_tasks.available_permits();
            if available == self.config.max_concurrency {
                debug!("all tasks completed");
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    remaining_tasks = self.config.max_concurrency - available,
                    "shutdown timeout reached"
                );
                return Err(WorkerPoolError::ShutdownTimeout);
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        *self.status.write().unwrap() = WorkerPoolStatus::Stopped;
        info!(worker_id = %self.config.worker_id, "worker pool stopped");
        Ok(())
    }

    pub fn status(&self) -> WorkerPoolStatus {
        *self.status.read().unwrap()
    }

    pub fn current_load(&self) -> usize {
        self.backpressure.current_load()
    }

    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }

    fn start_poll_loop(&self) {
        let store = Arc::clone(&self.store);
        let queue = self.queue.clone();
        let step_functions = Arc::clone(&self.step_functions);
        let config = self.config.clone();
        let backpressure = Arc::clone(&self.backpressure);
        let active_tasks = Arc::clone(&self.active_tasks);
        let mut shutdown_rx = self.shutdown_rx.clone();

        let handle = tokio::spawn(async move {
            loop {
                if *shutdown_rx.borrow() {
                    debug!("poll loop: shutdown requested");
                    break;
                }

                if !backpressure.should_accept() {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(200)) => {}
                        _ = shutdown_rx.changed() => break,
                    }
                    continue;
                }

                let batch_size = config
                    .poll_batch_size
                    .min(backpressure.available_slots() as i32)
                    .max(1);

                let messages = match queue
                    .read_with_poll(
                        &config.workflow_slug,
                        config.default_vt_seconds,
                        batch_size,
                        config.poll_timeout_seconds,
                    )
                    .await
                {
                    Ok(messages) => messages,
                    Err(e) => {
                        error!("queue poll failed: {}", e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        continue;
                    }
                };

                if messages.is_empty() {
                    continue;
                }

                let message_ids: Vec<i64> = messages.iter().map(|m| m.message_id).collect();
                let claimed = match store
                    .start_tasks(&config.workflow_slug, &message_ids, &config.worker_id)
                    .await
                {
                    Ok(claimed) => claimed,
                    Err(e) => {
                        error!("start_tasks failed: {}", e);
                        continue;
                    }
                };

                for task in claimed {
                    let Some(step_fn) = step_functions.get(&task.step_slug).cloned() else {
                        warn!(step_slug = %task.step_slug, "no step function registered, leaving task for redelivery");
                        continue;
                    };

                    let permit = match Arc::clone(&active_tasks).try_acquire_owned() {
                        Ok(p) => p,
                        Err(_) => {
                            debug!("no permits available, deferring remaining claimed tasks to redelivery");
                            break;
                        }
                    };

                    backpressure.task_started();
                    let store = Arc::clone(&store);
                    let bp = Arc::clone(&backpressure);
                    let worker_id = config.worker_id.clone();
                    let task_shutdown_rx = shutdown_rx.clone();

                    tokio::spawn(async move {
                        execute_claimed_task(store.as_ref(), step_fn, task, &worker_id, task_shutdown_rx).await;
                        bp.task_completed();
                        drop(permit);
                    });
                }
            }

            debug!("poll loop exited");
        });

        *self.poll_handle.lock().unwrap() = Some(handle);
    }
}

/// Outcome of racing a step function against its timeout and the pool's
/// shutdown signal.
enum RacedOutcome {
    Finished(crate::step::StepOutput),
    TimedOut,
    Abandoned,
}

async fn execute_claimed_task(
    store: &dyn OrchestratorStore,
    step_fn: crate::step::StepFn,
    task: crate::store::ClaimedTaskInfo,
    worker_id: &str,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let ctx = StepContext::new(task.run_id, task.step_slug.clone(), task.task_index, task.attempts_count);
    let cancellation: CancellationHandle = ctx.cancellation_handle();

    let fut = step_fn(task.input.clone(), ctx);
    tokio::pin!(fut);
    let sleep = tokio::time::sleep(Duration::from_secs(task.timeout_seconds.max(1) as u64));
    tokio::pin!(sleep);

    let outcome = tokio::select! {
        result = &mut fut => RacedOutcome::Finished(result),
        _ = &mut sleep => {
            cancellation.cancel();
            RacedOutcome::TimedOut
        }
        _ = shutdown_rx.changed() => {
            cancellation.cancel();
            RacedOutcome::Abandoned
        }
    };

    match outcome {
        RacedOutcome::Finished(Ok(output)) => {
            match store.complete_task(task.run_id, &task.step_slug, task.task_index, output).await {
                Ok(CompletionOutcome::Applied) => {
                    debug!(run_id = %task.run_id, step_slug = %task.step_slug, task_index = task.task_index, worker_id, "task completed");
                }
                Ok(CompletionOutcome::AlreadyFailed) => {
                    debug!(run_id = %task.run_id, "run already failed, completion dropped");
                }
                Ok(CompletionOutcome::TypeViolation) => {
                    warn!(run_id = %task.run_id, step_slug = %task.step_slug, "map type violation, run failed");
                }
                Err(e) => error!(run_id = %task.run_id, "complete_task failed: {}", e),
            }
        }
        RacedOutcome::Finished(Err(step_error)) => {
            report_failure(store, &task, &step_error.message, step_error.retryable).await;
        }
        RacedOutcome::TimedOut => {
            // §7.5: a timeout is a retryable user error.
            report_failure(store, &task, "step execution timed out", true).await;
        }
        RacedOutcome::Abandoned => {
            // Worker shutdown: leave the task row as `started`. Its queue
            // message reappears after VT and is redelivered to another
            // worker, incrementing attempts_count on reclaim.
            debug!(run_id = %task.run_id, step_slug = %task.step_slug, "task abandoned on shutdown, awaiting redelivery");
        }
    }
}

async fn report_failure(
    store: &dyn OrchestratorStore,
    task: &crate::store::ClaimedTaskInfo,
    message: &str,
    retryable: bool,
) {
    match store
        .fail_task(task.run_id, &task.step_slug, task.task_index, message, retryable)
        .await
    {
        Ok(FailureOutcome::RetryScheduled) => {
            debug!(run_id = %task.run_id, step_slug = %task.step_slug, "retry scheduled");
        }
        Ok(FailureOutcome::AlreadyFailed) => {}
        Ok(FailureOutcome::TerminalFailure) => {
            warn!(run_id = %task.run_id, step_slug = %task.step_slug, "task failed terminally, run failed");
        }
        Err(e) => error!(run_id = %task.run_id, "fail_task failed: {}", e),
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = WorkerPoolConfig::default();
        assert!(!config.worker_id.is_empty());
        assert_eq!(config.max_concurrency, 10);
        assert_eq!(config.poll_batch_size, 10);
    }

    #[test]
    fn config_builder() {
        let config = WorkerPoolConfig::new("my_workflow")
            .with_worker_id("test-worker")
            .with_max_concurrency(20)
            .with_poll_batch_size(5);

        assert_eq!(config.worker_id, "test-worker");
        assert_eq!(config.workflow_slug, "my_workflow");
        assert_eq!(config.max_concurrency, 20);
        assert_eq!(config.poll_batch_size, 5);
    }

    #[test]
    fn worker_pool_status_variants_are_distinct() {
        assert_ne!(WorkerPoolStatus::Running, WorkerPoolStatus::Stopped);
        assert_ne!(WorkerPoolStatus::Draining, WorkerPoolStatus::Running);
    }
}
