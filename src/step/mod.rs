//! The step-function contract: user code the core invokes but never owns.

pub mod context;
pub mod definition;

pub use context::{CancellationHandle, StepContext};
pub use definition::{step_fn, StepError, StepFn, StepFunctions, StepOutput};
