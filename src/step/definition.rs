//! The step-function signature: `step_slug -> callable`, addressed by value
//! rather than by module-level reflection (design note in §9 of the spec).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use super::context::StepContext;

/// A structured error a step function returns on failure: a human-readable
/// message plus an optional retryability hint. Absent a hint, the task is
/// treated as retryable.
#[derive(Debug, Clone)]
pub struct StepError {
    pub message: String,
    pub retryable: bool,
}

impl StepError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn terminal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

impl std::fmt::Display for StepError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for StepError {}

impl From<anyhow::Error> for StepError {
    fn from(err: anyhow::Error) -> Self {
        Self::retryable(err.to_string())
    }
}

pub type StepOutput = Result<Value, StepError>;

/// A step function: merged JSON input in, a JSON value or structured error
/// out. Must return a JSON array if any child step is a `map` step.
pub type StepFn = Arc<
    dyn Fn(Value, StepContext) -> Pin<Box<dyn Future<Output = StepOutput> + Send>> + Send + Sync,
>;

/// The mapping the worker loop is handed: `step_slug -> callable`. Plain
/// data, not a registry with reflection — callers build it however they
/// like (a `HashMap` literal, a macro, a loop over a manifest).
pub type StepFunctions = HashMap<String, StepFn>;

/// Wraps a plain async closure into a [`StepFn`], so callers don't have to
/// hand-write the `Pin<Box<dyn Future<...>>>` boilerplate.
pub fn step_fn<F, Fut>(f: F) -> StepFn
where
    F: Fn(Value, StepContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StepOutput> + Send + 'static,
{
    Arc::new(move |input, ctx| Box::pin(f(input, ctx)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn step_fn_wraps_closure() {
        let f = step_fn(|input, _ctx| async move { Ok(input) });
        let ctx = StepContext::new(Uuid::now_v7(), "s", 0, 1);
        let out = f(serde_json::json!({"x": 1}), ctx).await.unwrap();
        assert_eq!(out, serde_json::json!({"x": 1}));
    }

    #[test]
    fn retryable_vs_terminal() {
        assert!(StepError::retryable("boom").retryable);
        assert!(!StepError::terminal("boom").retryable);
    }
}
