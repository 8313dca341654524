//! Worker pool for step-function execution.
//!
//! This module provides:
//! - [`WorkerPool`] - long-polls a workflow's queue and executes claimed tasks
//! - [`BackpressureConfig`] - load-aware task acceptance configuration
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                       WorkerPool                          │
//! │   read_with_poll -> start_tasks -> step fn -> complete/fail│
//! │         │                                                  │
//! │         ▼                                                  │
//! │  ┌────────────────────────────────────────────────────┐  │
//! │  │              BackpressureState                       │  │
//! │  │  (high/low watermarks, load tracking)                │  │
//! │  └────────────────────────────────────────────────────┘  │
//! │         │                                                  │
//! │         ▼                                                  │
//! │  ┌────────────────────────────────────────────────────┐  │
//! │  │         Task Executor (Semaphore-limited)            │  │
//! │  └────────────────────────────────────────────────────┘  │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! Redelivery of a task whose execution outlives its visibility timeout is
//! handled entirely by the queue extension; no separate heartbeat or
//! stale-task reclamation loop runs against application state.

mod backpressure;
mod pool;

pub use backpressure::{BackpressureConfig, BackpressureError, BackpressureState};
pub use pool::{WorkerPool, WorkerPoolConfig, WorkerPoolError, WorkerPoolStatus};
