//! In-memory mirror of the Postgres coordination functions, for fast unit
//! tests that don't need a running Postgres+pgmq instance.
//!
//! Each trait method takes every lock it needs for the duration of the
//! call, the way the SQL functions hold row locks for one transaction.
//! There is no concurrent-access performance concern here: this store
//! exists to let tests exercise the C3-C7 state machine quickly, not to
//! stand in for Postgres under load.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::Value;
use uuid::Uuid;

use super::{
    types::{RunStatus, StepStatus, TaskStatus},
    ClaimedTaskInfo, CompletionOutcome, FailureOutcome, OrchestratorStore, RunInfo, StepStateInfo,
    StoreError,
};
use crate::graph::{StepType, WorkflowDef};

/// Mirrors Postgres's `jsonb_typeof`, so type-violation messages read the
/// same regardless of which `OrchestratorStore` produced them.
fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

struct RunRecord {
    workflow_slug: String,
    status: RunStatus,
    input: Value,
    output: Option<Value>,
    error_message: Option<String>,
    remaining_steps: i32,
    created_at: chrono::DateTime<Utc>,
    started_at: Option<chrono::DateTime<Utc>>,
    completed_at: Option<chrono::DateTime<Utc>>,
    failed_at: Option<chrono::DateTime<Utc>>,
}

struct StepStateRecord {
    status: StepStatus,
    remaining_deps: i32,
    initial_tasks: Option<i64>,
    remaining_tasks: Option<i64>,
    error_message: Option<String>,
}

struct TaskRecord {
    status: TaskStatus,
    output: Option<Value>,
    message_id: Option<i64>,
    attempts_count: u32,
    max_attempts: u32,
    error_message: Option<String>,
}

/// `(run_id, step_slug, task_index)`, mirroring `step_tasks`' primary key.
type TaskKey = (Uuid, String, i64);

pub struct InMemoryOrchestratorStore {
    workflows: RwLock<HashMap<String, WorkflowDef>>,
    runs: RwLock<HashMap<Uuid, RunRecord>>,
    step_states: RwLock<HashMap<(Uuid, String), StepStateRecord>>,
    tasks: RwLock<HashMap<TaskKey, TaskRecord>>,
    /// Live (queued or started) message ids, mirroring what a pgmq queue
    /// holds before `pgmq.archive` is called. Maps to the task it backs.
    queue: RwLock<HashMap<i64, TaskKey>>,
    next_message_id: AtomicI64,
}

impl Default for InMemoryOrchestratorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryOrchestratorStore {
    pub fn new() -> Self {
        Self {
            workflows: RwLock::new(HashMap::new()),
            runs: RwLock::new(HashMap::new()),
            step_states: RwLock::new(HashMap::new()),
            tasks: RwLock::new(HashMap::new()),
            queue: RwLock::new(HashMap::new()),
            next_message_id: AtomicI64::new(1),
        }
    }

    /// Test helper standing in for a `QueueAdapter::read_with_poll` call:
    /// every message id currently live for a workflow's queue.
    pub fn queued_message_ids(&self, workflow_slug: &str) -> Vec<i64> {
        let tasks = self.tasks.read();
        let runs = self.runs.read();
        let mut ids = Vec::new();
        for (message_id, key) in self.queue.read().iter() {
            let is_queued = tasks.get(key).map(|t| t.status) == Some(TaskStatus::Queued);
            let run_matches = runs
                .get(&key.0)
                .map(|r| r.workflow_slug == workflow_slug)
                .unwrap_or(false);
            if is_queued && run_matches {
                ids.push(*message_id);
            }
        }
        ids
    }

    fn dependency_output(&self, run_id: Uuid, step_slug: &str, workflow: &WorkflowDef) -> Value {
        let step = workflow.step(step_slug);
        let is_map = matches!(step.map(|s| s.step_type), Some(StepType::Map));
        let tasks = self.tasks.read();

        if is_map {
            let mut completed: Vec<(i64, Value)> = tasks
                .iter()
                .filter(|((r, s, _), t)| r == &run_id && s == step_slug && t.status == TaskStatus::Completed)
                .map(|((_, _, idx), t)| (*idx, t.output.clone().unwrap_or(Value::Null)))
                .collect();
            completed.sort_by_key(|(idx, _)| *idx);
            Value::Array(completed.into_iter().map(|(_, v)| v).collect())
        } else {
            tasks
                .iter()
                .find(|((r, s, _), t)| r == &run_id && s == step_slug && t.status == TaskStatus::Completed)
                .map(|(_, t)| t.output.clone().unwrap_or(Value::Null))
                .unwrap_or(Value::Null)
        }
    }

    /// Materializes task rows and queue entries for every step whose
    /// dependencies and width have both resolved; completes zero-width
    /// steps that slipped through `cascade_complete_taskless_steps`.
    fn start_ready_steps_locked(&self, run_id: Uuid, workflow: &WorkflowDef) {
        let mut ready: Vec<(String, i64)> = {
            let states = self.step_states.read();
            let mut ready: Vec<(String, i64)> = states
                .iter()
                .filter(|((r, _), s)| {
                    *r == run_id && s.status == StepStatus::Created && s.remaining_deps == 0
                })
                .filter_map(|((_, slug), s)| s.initial_tasks.map(|n| (slug.clone(), n)))
                .filter(|(_, n)| *n > 0)
                .collect();
            ready.sort_by(|a, b| a.0.cmp(&b.0));
            ready
        };

        // Zero-width steps complete with no task materialization at all.
        {
            let mut states = self.step_states.write();
            let zero_width: Vec<String> = states
                .iter()
                .filter(|((r, _), s)| {
                    *r == run_id
                        && s.status == StepStatus::Created
                        && s.remaining_deps == 0
                        && s.initial_tasks == Some(0)
                })
                .map(|((_, slug), _)| slug.clone())
                .collect();
            for slug in zero_width {
                if let Some(state) = states.get_mut(&(run_id, slug)) {
                    state.status = StepStatus::Completed;
                    state.remaining_tasks = Some(0);
                }
            }
        }

        ready.retain(|(slug, _)| {
            self.step_states
                .read()
                .get(&(run_id, slug.clone()))
                .map(|s| s.status == StepStatus::Created)
                .unwrap_or(false)
        });

        for (step_slug, width) in ready {
            let mut tasks = self.tasks.write();
            let mut queue = self.queue.write();
            for task_index in 0..width {
                let message_id = self.next_message_id.fetch_add(1, Ordering::SeqCst);
                let key = (run_id, step_slug.clone(), task_index);
                let max_attempts = workflow
                    .step(&step_slug)
                    .and_then(|s| s.options.max_attempts)
                    .unwrap_or(workflow.default_max_attempts);
                tasks.insert(
                    key.clone(),
                    TaskRecord {
                        status: TaskStatus::Queued,
                        output: None,
                        message_id: Some(message_id),
                        attempts_count: 0,
                        max_attempts,
                        error_message: None,
                    },
                );
                queue.insert(message_id, key);
            }
            drop(tasks);
            drop(queue);

            let mut states = self.step_states.write();
            if let Some(state) = states.get_mut(&(run_id, step_slug.clone())) {
                state.status = StepStatus::Started;
                state.remaining_tasks = Some(width);
            }
        }
    }

    /// Completes every step whose width has resolved to zero, propagating
    /// the same resolution to dependent `map` steps, until none remain.
    fn cascade_complete_taskless_steps_locked(&self, run_id: Uuid, workflow: &WorkflowDef) {
        loop {
            let next = {
                let states = self.step_states.read();
                states
                    .iter()
                    .filter(|((r, _), s)| {
                        *r == run_id
                            && matches!(s.status, StepStatus::Created | StepStatus::Started)
                            && s.remaining_deps == 0
                            && s.initial_tasks == Some(0)
                    })
                    .map(|((_, slug), _)| slug.clone())
                    .min()
            };

            let Some(step_slug) = next else { break };

            {
                let mut states = self.step_states.write();
                if let Some(state) = states.get_mut(&(run_id, step_slug.clone())) {
                    state.status = StepStatus::Completed;
                    state.remaining_tasks = Some(0);
                }
            }
            if let Some(run) = self.runs.write().get_mut(&run_id) {
                run.remaining_steps -= 1;
            }

            if let Some(step) = workflow.step(&step_slug) {
                for child in workflow.children_of(&step.step_slug) {
                    let mut states = self.step_states.write();
                    if let Some(child_state) = states.get_mut(&(run_id, child.step_slug.clone())) {
                        child_state.remaining_deps -= 1;
                        if child.step_type == StepType::Map && child_state.initial_tasks.is_none() {
                            child_state.initial_tasks = Some(0);
                        }
                    }
                }
            }
        }
    }

    fn maybe_complete_run_locked(&self, run_id: Uuid, workflow: &WorkflowDef) {
        let should_complete = {
            let runs = self.runs.read();
            let Some(run) = runs.get(&run_id) else { return };
            if run.status != RunStatus::Started || run.remaining_steps != 0 {
                return;
            }
            let states = self.step_states.read();
            !states
                .iter()
                .any(|((r, _), s)| *r == run_id && s.status == StepStatus::Failed)
        };

        if !should_complete {
            return;
        }

        let mut leaves: Vec<String> = workflow
            .leaf_steps()
            .into_iter()
            .map(|s| s.step_slug.clone())
            .collect();
        leaves.sort();

        let output = Value::Array(
            leaves
                .iter()
                .map(|slug| self.dependency_output(run_id, slug, workflow))
                .collect(),
        );

        if let Some(run) = self.runs.write().get_mut(&run_id) {
            run.status = RunStatus::Completed;
            run.completed_at = Some(Utc::now());
            run.output = Some(output);
        }
    }

    fn archive_live_run_messages_locked(&self, run_id: Uuid) {
        let mut queue = self.queue.write();
        queue.retain(|_, (r, _, _)| *r != run_id);
    }
}

#[async_trait]
impl OrchestratorStore for InMemoryOrchestratorStore {
    async fn register_workflow(&self, workflow: &WorkflowDef) -> Result<(), StoreError> {
        self.workflows
            .write()
            .insert(workflow.workflow_slug.clone(), workflow.clone());
        Ok(())
    }

    async fn initialize_run(
        &self,
        run_id: Uuid,
        workflow_slug: &str,
        input: Value,
    ) -> Result<Uuid, StoreError> {
        let workflow = self
            .workflows
            .read()
            .get(workflow_slug)
            .cloned()
            .ok_or_else(|| StoreError::WorkflowNotFound(workflow_slug.to_string()))?;

        if workflow.steps.is_empty() {
            return Err(StoreError::WorkflowNotFound(workflow_slug.to_string()));
        }

        self.runs.write().insert(
            run_id,
            RunRecord {
                workflow_slug: workflow_slug.to_string(),
                status: RunStatus::Started,
                input,
                output: None,
                error_message: None,
                remaining_steps: workflow.steps.len() as i32,
                created_at: Utc::now(),
                started_at: Some(Utc::now()),
                completed_at: None,
                failed_at: None,
            },
        );

        {
            let mut states = self.step_states.write();
            for step in &workflow.steps {
                let remaining_deps = step.depends_on.len() as i32;
                let initial_tasks = match step.step_type {
                    StepType::Single => Some(1),
                    StepType::Map => None,
                };
                states.insert(
                    (run_id, step.step_slug.clone()),
                    StepStateRecord {
                        status: StepStatus::Created,
                        remaining_deps,
                        initial_tasks,
                        remaining_tasks: None,
                        error_message: None,
                    },
                );
            }
        }

        self.start_ready_steps_locked(run_id, &workflow);
        Ok(run_id)
    }

    async fn get_run(&self, run_id: Uuid) -> Result<RunInfo, StoreError> {
        let runs = self.runs.read();
        let run = runs.get(&run_id).ok_or(StoreError::RunNotFound(run_id))?;
        Ok(RunInfo {
            id: run_id,
            workflow_slug: run.workflow_slug.clone(),
            status: run.status,
            input: run.input.clone(),
            output: run.output.clone(),
            error_message: run.error_message.clone(),
            remaining_steps: run.remaining_steps,
            created_at: run.created_at,
            started_at: run.started_at,
            completed_at: run.completed_at,
            failed_at: run.failed_at,
        })
    }

    async fn list_step_states(&self, run_id: Uuid) -> Result<Vec<StepStateInfo>, StoreError> {
        let mut out: Vec<StepStateInfo> = self
            .step_states
            .read()
            .iter()
            .filter(|((r, _), _)| *r == run_id)
            .map(|((_, slug), s)| StepStateInfo {
                step_slug: slug.clone(),
                status: s.status,
                remaining_deps: s.remaining_deps,
                initial_tasks: s.initial_tasks,
                remaining_tasks: s.remaining_tasks,
                error_message: s.error_message.clone(),
            })
            .collect();
        out.sort_by(|a, b| a.step_slug.cmp(&b.step_slug));
        Ok(out)
    }

    async fn start_tasks(
        &self,
        workflow_slug: &str,
        message_ids: &[i64],
        worker_id: &str,
    ) -> Result<Vec<ClaimedTaskInfo>, StoreError> {
        let workflow = self
            .workflows
            .read()
            .get(workflow_slug)
            .cloned()
            .ok_or_else(|| StoreError::WorkflowNotFound(workflow_slug.to_string()))?;

        let mut claimed = Vec::new();

        for &message_id in message_ids {
            let key = match self.queue.read().get(&message_id).cloned() {
                Some(k) => k,
                None => continue,
            };
            let (run_id, step_slug, task_index) = key.clone();

            let run_matches = self
                .runs
                .read()
                .get(&run_id)
                .map(|r| r.workflow_slug == workflow_slug)
                .unwrap_or(false);
            if !run_matches {
                continue;
            }

            let (attempts_count, max_attempts) = {
                let mut tasks = self.tasks.write();
                let Some(task) = tasks.get_mut(&key) else { continue };
                if task.status != TaskStatus::Queued {
                    continue;
                }
                task.status = TaskStatus::Started;
                task.attempts_count += 1;
                (task.attempts_count, task.max_attempts)
            };

            let mut merged = self
                .runs
                .read()
                .get(&run_id)
                .map(|r| r.input.clone())
                .unwrap_or(Value::Object(Default::default()));

            if let Some(step) = workflow.step(&step_slug) {
                if let Value::Object(map) = &mut merged {
                    for dep in &step.depends_on {
                        map.insert(dep.clone(), self.dependency_output(run_id, dep, &workflow));
                    }
                }
            }

            let timeout_seconds = workflow
                .step(&step_slug)
                .and_then(|s| s.options.timeout)
                .unwrap_or(workflow.default_timeout)
                .as_secs() as i32;

            claimed.push(ClaimedTaskInfo {
                run_id,
                step_slug,
                task_index,
                input: merged,
                message_id,
                attempts_count,
                max_attempts,
                timeout_seconds,
            });

            let _ = worker_id;
        }

        Ok(claimed)
    }

    async fn complete_task(
        &self,
        run_id: Uuid,
        step_slug: &str,
        task_index: i64,
        output: Value,
    ) -> Result<CompletionOutcome, StoreError> {
        let workflow = {
            let runs = self.runs.read();
            let run = runs.get(&run_id).ok_or(StoreError::RunNotFound(run_id))?;
            if run.status == RunStatus::Failed {
                return Ok(CompletionOutcome::AlreadyFailed);
            }
            self.workflows
                .read()
                .get(&run.workflow_slug)
                .cloned()
                .ok_or_else(|| StoreError::WorkflowNotFound(run.workflow_slug.clone()))?
        };

        let output_is_array = output.is_array();
        let violating_child = workflow.children_of(step_slug).into_iter().find(|child| {
            child.step_type == StepType::Map
                && !output_is_array
                && self
                    .step_states
                    .read()
                    .get(&(run_id, child.step_slug.clone()))
                    .map(|s| s.initial_tasks.is_none())
                    .unwrap_or(false)
        });

        if let Some(child) = violating_child {
            let message = format!(
                "[TYPE_VIOLATION] step {step_slug} produced {}, expected array for map child {}",
                json_type_name(&output),
                child.step_slug
            );

            if let Some(run) = self.runs.write().get_mut(&run_id) {
                run.status = RunStatus::Failed;
                run.failed_at = Some(Utc::now());
                run.error_message = Some(message.clone());
            }
            self.archive_live_run_messages_locked(run_id);
            if let Some(task) = self
                .tasks
                .write()
                .get_mut(&(run_id, step_slug.to_string(), task_index))
            {
                task.status = TaskStatus::Failed;
                task.error_message = Some(message.clone());
            }
            if let Some(state) = self.step_states.write().get_mut(&(run_id, step_slug.to_string())) {
                state.status = StepStatus::Failed;
                state.error_message = Some(message);
            }

            return Ok(CompletionOutcome::TypeViolation);
        }

        let key = (run_id, step_slug.to_string(), task_index);
        let message_id = {
            let mut tasks = self.tasks.write();
            let Some(task) = tasks.get_mut(&key) else {
                return Err(StoreError::TaskNotFound(run_id, step_slug.to_string(), task_index));
            };
            if task.status != TaskStatus::Started {
                return Ok(CompletionOutcome::Applied);
            }
            task.status = TaskStatus::Completed;
            task.output = Some(output.clone());
            task.message_id
        };

        if let Some(message_id) = message_id {
            self.queue.write().remove(&message_id);
        }

        let remaining_tasks = {
            let mut states = self.step_states.write();
            let Some(state) = states.get_mut(&(run_id, step_slug.to_string())) else {
                return Err(StoreError::TaskNotFound(run_id, step_slug.to_string(), task_index));
            };
            state.remaining_tasks = state.remaining_tasks.map(|n| n - 1);
            state.remaining_tasks
        };

        if remaining_tasks == Some(0) {
            if let Some(state) = self.step_states.write().get_mut(&(run_id, step_slug.to_string())) {
                state.status = StepStatus::Completed;
            }

            let parent_is_map = workflow
                .step(step_slug)
                .map(|s| s.step_type == StepType::Map)
                .unwrap_or(false);

            for child in workflow.children_of(step_slug) {
                let mut states = self.step_states.write();
                if let Some(child_state) = states.get_mut(&(run_id, child.step_slug.clone())) {
                    child_state.remaining_deps -= 1;
                    if child.step_type == StepType::Map && child_state.initial_tasks.is_none() {
                        let width = if parent_is_map {
                            self.tasks
                                .read()
                                .iter()
                                .filter(|((r, s, _), t)| {
                                    *r == run_id && s == step_slug && t.status == TaskStatus::Completed
                                })
                                .count() as i64
                        } else {
                            output.as_array().map(|a| a.len() as i64).unwrap_or(0)
                        };
                        child_state.initial_tasks = Some(width);
                    }
                }
            }

            if let Some(run) = self.runs.write().get_mut(&run_id) {
                run.remaining_steps -= 1;
            }

            self.cascade_complete_taskless_steps_locked(run_id, &workflow);
            self.start_ready_steps_locked(run_id, &workflow);
            self.maybe_complete_run_locked(run_id, &workflow);
        }

        Ok(CompletionOutcome::Applied)
    }

    async fn fail_task(
        &self,
        run_id: Uuid,
        step_slug: &str,
        task_index: i64,
        error_message: &str,
        retryable: bool,
    ) -> Result<FailureOutcome, StoreError> {
        {
            let runs = self.runs.read();
            let run = runs.get(&run_id).ok_or(StoreError::RunNotFound(run_id))?;
            if run.status == RunStatus::Failed {
                return Ok(FailureOutcome::AlreadyFailed);
            }
        }

        let key = (run_id, step_slug.to_string(), task_index);
        let (attempts_count, max_attempts, message_id) = {
            let tasks = self.tasks.read();
            let task = tasks
                .get(&key)
                .ok_or_else(|| StoreError::TaskNotFound(run_id, step_slug.to_string(), task_index))?;
            (task.attempts_count, task.max_attempts, task.message_id)
        };

        if retryable && attempts_count < max_attempts {
            if let Some(task) = self.tasks.write().get_mut(&key) {
                task.error_message = Some(error_message.to_string());
                // No real visibility-timeout clock in memory: make the
                // message immediately reclaimable again.
                task.status = TaskStatus::Queued;
            }
            let _ = message_id;
            Ok(FailureOutcome::RetryScheduled)
        } else {
            if let Some(task) = self.tasks.write().get_mut(&key) {
                task.status = TaskStatus::Failed;
                task.error_message = Some(error_message.to_string());
            }
            if let Some(state) = self.step_states.write().get_mut(&(run_id, step_slug.to_string())) {
                state.status = StepStatus::Failed;
                state.error_message = Some(error_message.to_string());
            }
            if let Some(run) = self.runs.write().get_mut(&run_id) {
                run.status = RunStatus::Failed;
                run.failed_at = Some(Utc::now());
                run.error_message = Some(error_message.to_string());
            }
            self.archive_live_run_messages_locked(run_id);
            Ok(FailureOutcome::TerminalFailure)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{StepOptions, WorkflowStepDef};

    fn linear_workflow() -> WorkflowDef {
        WorkflowDef::new("linear")
            .with_step(WorkflowStepDef::new("a", StepType::Single))
            .with_step(WorkflowStepDef::new("b", StepType::Single).depends_on(["a"]))
    }

    #[tokio::test]
    async fn linear_run_completes_end_to_end() {
        let store = InMemoryOrchestratorStore::new();
        store.register_workflow(&linear_workflow()).await.unwrap();

        let run_id = Uuid::now_v7();
        store
            .initialize_run(run_id, "linear", serde_json::json!({"n": 1}))
            .await
            .unwrap();

        let ids = store.queued_message_ids("linear");
        assert_eq!(ids.len(), 1);
        let claimed = store.start_tasks("linear", &ids, "w1").await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].step_slug, "a");

        store
            .complete_task(run_id, "a", 0, serde_json::json!({"out": 1}))
            .await
            .unwrap();

        let ids = store.queued_message_ids("linear");
        assert_eq!(ids.len(), 1);
        let claimed = store.start_tasks("linear", &ids, "w1").await.unwrap();
        assert_eq!(claimed[0].step_slug, "b");
        assert_eq!(claimed[0].input["a"], serde_json::json!({"out": 1}));

        store
            .complete_task(run_id, "b", 0, serde_json::json!({"final": true}))
            .await
            .unwrap();

        let run = store.get_run(run_id).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn empty_map_cascades_without_tasks() {
        let workflow = WorkflowDef::new("cascade")
            .with_step(WorkflowStepDef::new("src", StepType::Single))
            .with_step(
                WorkflowStepDef::new("fanout", StepType::Map)
                    .depends_on(["src"])
                    .with_options(StepOptions::default()),
            )
            .with_step(WorkflowStepDef::new("sink", StepType::Single).depends_on(["fanout"]));

        let store = InMemoryOrchestratorStore::new();
        store.register_workflow(&workflow).await.unwrap();

        let run_id = Uuid::now_v7();
        store
            .initialize_run(run_id, "cascade", serde_json::json!({}))
            .await
            .unwrap();

        let ids = store.queued_message_ids("cascade");
        let claimed = store.start_tasks("cascade", &ids, "w1").await.unwrap();
        assert_eq!(claimed[0].step_slug, "src");

        store
            .complete_task(run_id, "src", 0, serde_json::json!([]))
            .await
            .unwrap();

        let states = store.list_step_states(run_id).await.unwrap();
        let fanout = states.iter().find(|s| s.step_slug == "fanout").unwrap();
        assert_eq!(fanout.status, StepStatus::Completed);
        assert_eq!(fanout.initial_tasks, Some(0));

        let sink = states.iter().find(|s| s.step_slug == "sink").unwrap();
        assert_eq!(sink.status, StepStatus::Completed);

        let run = store.get_run(run_id).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn map_type_violation_fails_the_run() {
        let workflow = WorkflowDef::new("violate")
            .with_step(WorkflowStepDef::new("src", StepType::Single))
            .with_step(WorkflowStepDef::new("fanout", StepType::Map).depends_on(["src"]));

        let store = InMemoryOrchestratorStore::new();
        store.register_workflow(&workflow).await.unwrap();

        let run_id = Uuid::now_v7();
        store
            .initialize_run(run_id, "violate", serde_json::json!({}))
            .await
            .unwrap();

        let ids = store.queued_message_ids("violate");
        store.start_tasks("violate", &ids, "w1").await.unwrap();

        let outcome = store
            .complete_task(run_id, "src", 0, serde_json::json!({"not": "an array"}))
            .await
            .unwrap();
        assert_eq!(outcome, CompletionOutcome::TypeViolation);

        let run = store.get_run(run_id).await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        let error_message = run.error_message.unwrap();
        assert!(error_message.contains("[TYPE_VIOLATION]"));
        assert!(error_message.contains("produced object"));
    }

    #[tokio::test]
    async fn fail_task_retries_then_terminates() {
        let workflow = WorkflowDef::new("retry")
            .with_step(WorkflowStepDef::new("a", StepType::Single).with_options(StepOptions::default().with_max_attempts(2)));

        let store = InMemoryOrchestratorStore::new();
        store.register_workflow(&workflow).await.unwrap();

        let run_id = Uuid::now_v7();
        store
            .initialize_run(run_id, "retry", serde_json::json!({}))
            .await
            .unwrap();

        let ids = store.queued_message_ids("retry");
        store.start_tasks("retry", &ids, "w1").await.unwrap();
        let outcome = store.fail_task(run_id, "a", 0, "boom", true).await.unwrap();
        assert_eq!(outcome, FailureOutcome::RetryScheduled);

        let ids = store.queued_message_ids("retry");
        store.start_tasks("retry", &ids, "w1").await.unwrap();
        let outcome = store.fail_task(run_id, "a", 0, "boom again", true).await.unwrap();
        assert_eq!(outcome, FailureOutcome::TerminalFailure);

        let run = store.get_run(run_id).await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn fail_task_non_retryable_terminates_on_first_attempt() {
        let workflow = WorkflowDef::new("terminal").with_step(
            WorkflowStepDef::new("a", StepType::Single)
                .with_options(StepOptions::default().with_max_attempts(5)),
        );

        let store = InMemoryOrchestratorStore::new();
        store.register_workflow(&workflow).await.unwrap();

        let run_id = Uuid::now_v7();
        store
            .initialize_run(run_id, "terminal", serde_json::json!({}))
            .await
            .unwrap();

        let ids = store.queued_message_ids("terminal");
        store.start_tasks("terminal", &ids, "w1").await.unwrap();

        // retryable=false must fail terminally even though attempts remain.
        let outcome = store.fail_task(run_id, "a", 0, "non-retryable", false).await.unwrap();
        assert_eq!(outcome, FailureOutcome::TerminalFailure);

        let run = store.get_run(run_id).await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);
    }
}
