//! The context object and cooperative-cancellation handle passed to every
//! step function invocation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

/// Bears `{run_id, step_slug, task_index, attempts_count}` as specified by
/// the step-function contract, plus a cancellation signal the worker loop
/// flips on shutdown or per-task timeout.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub run_id: Uuid,
    pub step_slug: String,
    pub task_index: i64,
    pub attempts_count: u32,
    cancelled: Arc<AtomicBool>,
}

impl StepContext {
    pub fn new(run_id: Uuid, step_slug: impl Into<String>, task_index: i64, attempts_count: u32) -> Self {
        Self {
            run_id,
            step_slug: step_slug.into(),
            task_index,
            attempts_count,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Resolves once cancellation has been requested. Step functions that
    /// want to react to shutdown/timeout mid-flight can race this against
    /// their own work with `tokio::select!`.
    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    pub fn is_last_attempt(&self, max_attempts: u32) -> bool {
        self.attempts_count >= max_attempts
    }

    pub fn cancellation_handle(&self) -> CancellationHandle {
        CancellationHandle {
            cancelled: self.cancelled.clone(),
        }
    }
}

/// Held by the worker loop; flipping it signals cancellation to the
/// corresponding [`StepContext`] without the step function needing a
/// reference back to the worker.
#[derive(Debug, Clone)]
pub struct CancellationHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancellationHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancellation_propagates_to_context() {
        let ctx = StepContext::new(Uuid::now_v7(), "step", 0, 1);
        let handle = ctx.cancellation_handle();
        assert!(!ctx.is_cancelled());
        handle.cancel();
        assert!(ctx.is_cancelled());
        tokio::time::timeout(Duration::from_millis(200), ctx.cancelled())
            .await
            .expect("cancelled() should resolve once cancellation is requested");
    }

    #[test]
    fn last_attempt_detection() {
        let ctx = StepContext::new(Uuid::now_v7(), "step", 0, 3);
        assert!(ctx.is_last_attempt(3));
        assert!(!ctx.is_last_attempt(4));
    }
}
