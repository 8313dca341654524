//! Static workflow/step definitions, authored once and read by the core.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Whether a step runs once per run, or fans out into one task per element
/// of its parent's array output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Single,
    Map,
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single => write!(f, "single"),
            Self::Map => write!(f, "map"),
        }
    }
}

impl std::str::FromStr for StepType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single" => Ok(Self::Single),
            "map" => Ok(Self::Map),
            other => Err(format!("unknown step_type: {other}")),
        }
    }
}

/// Per-step overrides of the workflow-level defaults.
///
/// Every field is optional; unset fields fall back to the owning workflow's
/// default at run-initialization time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepOptions {
    /// Static fan-out width override. Only meaningful on `single` steps with
    /// no dependencies — a `single` step with a parent, or any `map` step,
    /// always resolves its width from the data flow, not this field.
    pub initial_tasks: Option<i64>,
    pub max_attempts: Option<u32>,
    pub timeout: Option<Duration>,
    pub retry_base: Option<Duration>,
    pub retry_cap: Option<Duration>,
}

impl StepOptions {
    pub fn with_max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = Some(n);
        self
    }

    pub fn with_timeout(mut self, d: Duration) -> Self {
        self.timeout = Some(d);
        self
    }

    pub fn with_retry_base(mut self, d: Duration) -> Self {
        self.retry_base = Some(d);
        self
    }

    pub fn with_retry_cap(mut self, d: Duration) -> Self {
        self.retry_cap = Some(d);
        self
    }

    pub fn with_initial_tasks(mut self, n: i64) -> Self {
        self.initial_tasks = Some(n);
        self
    }
}

/// One node in the static graph.
#[derive(Debug, Clone)]
pub struct WorkflowStepDef {
    pub step_slug: String,
    pub step_type: StepType,
    /// Parent step slugs this step depends on, in authoring order.
    /// Insertion order becomes `step_dependency` row order; lexicographic
    /// order is recomputed by the dispatcher at runtime, so authoring order
    /// here is cosmetic.
    pub depends_on: Vec<String>,
    pub options: StepOptions,
}

impl WorkflowStepDef {
    pub fn new(step_slug: impl Into<String>, step_type: StepType) -> Self {
        Self {
            step_slug: step_slug.into(),
            step_type,
            depends_on: Vec::new(),
            options: StepOptions::default(),
        }
    }

    pub fn depends_on(mut self, steps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.depends_on = steps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_options(mut self, options: StepOptions) -> Self {
        self.options = options;
        self
    }
}

/// The full static graph for one workflow: its slug, workflow-level
/// defaults, and its steps with their dependency edges.
#[derive(Debug, Clone)]
pub struct WorkflowDef {
    pub workflow_slug: String,
    pub default_max_attempts: u32,
    pub default_timeout: Duration,
    pub default_retry_base: Duration,
    pub default_retry_cap: Duration,
    pub steps: Vec<WorkflowStepDef>,
}

impl WorkflowDef {
    pub fn new(workflow_slug: impl Into<String>) -> Self {
        Self {
            workflow_slug: workflow_slug.into(),
            default_max_attempts: 3,
            default_timeout: Duration::from_secs(30),
            default_retry_base: Duration::from_secs(1),
            default_retry_cap: Duration::from_secs(30),
            steps: Vec::new(),
        }
    }

    pub fn with_default_max_attempts(mut self, n: u32) -> Self {
        self.default_max_attempts = n;
        self
    }

    pub fn with_default_timeout(mut self, d: Duration) -> Self {
        self.default_timeout = d;
        self
    }

    pub fn with_default_retry_base(mut self, d: Duration) -> Self {
        self.default_retry_base = d;
        self
    }

    pub fn with_default_retry_cap(mut self, d: Duration) -> Self {
        self.default_retry_cap = d;
        self
    }

    pub fn with_step(mut self, step: WorkflowStepDef) -> Self {
        self.steps.push(step);
        self
    }

    pub fn step(&self, step_slug: &str) -> Option<&WorkflowStepDef> {
        self.steps.iter().find(|s| s.step_slug == step_slug)
    }

    /// Children of `step_slug` (steps that list it in `depends_on`), sorted
    /// lexicographically by slug to match the dispatcher's deterministic
    /// lock order.
    pub fn children_of(&self, step_slug: &str) -> Vec<&WorkflowStepDef> {
        let mut children: Vec<&WorkflowStepDef> = self
            .steps
            .iter()
            .filter(|s| s.depends_on.iter().any(|d| d == step_slug))
            .collect();
        children.sort_by(|a, b| a.step_slug.cmp(&b.step_slug));
        children
    }

    /// Steps with no dependents: their outputs form the run's final output.
    pub fn leaf_steps(&self) -> Vec<&WorkflowStepDef> {
        let mut leaves: Vec<&WorkflowStepDef> = self
            .steps
            .iter()
            .filter(|s| self.children_of(&s.step_slug).is_empty())
            .collect();
        leaves.sort_by(|a, b| a.step_slug.cmp(&b.step_slug));
        leaves
    }
}
