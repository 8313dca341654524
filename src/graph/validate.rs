//! Static validation of a [`WorkflowDef`] before any run is ever created.

use std::collections::HashMap;

use once_cell_regex::slug_regex;

use super::definition::{StepType, WorkflowDef};

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("invalid slug {0:?}: must match ^[A-Za-z_][A-Za-z0-9_]*$ and be <= 47 chars")]
    InvalidSlug(String),

    #[error("duplicate step slug {0:?}")]
    DuplicateStep(String),

    #[error("step {step:?} depends on unknown step {depends_on:?}")]
    UnknownDependency { step: String, depends_on: String },

    #[error("map step {0:?} has {1} dependencies; map steps may have at most one")]
    MapStepTooManyDependencies(String, usize),

    #[error("dependency cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    #[error("step {0:?} is a non-map step with a statically configured initial_tasks of 0; reject at validation time instead of guessing")]
    ZeroTaskNonMapStep(String),
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Visiting,
    Visited,
}

/// Runs the full C9 validation pass: slug shape, duplicate slugs, unknown
/// dependency references, the map-step single-parent rule, cycle detection,
/// and the zero-task-non-map-step rejection.
pub fn validate_graph(graph: &WorkflowDef) -> Result<(), GraphError> {
    if !is_valid_slug(&graph.workflow_slug) {
        return Err(GraphError::InvalidSlug(graph.workflow_slug.clone()));
    }

    let mut seen = HashMap::new();
    for step in &graph.steps {
        if !is_valid_slug(&step.step_slug) {
            return Err(GraphError::InvalidSlug(step.step_slug.clone()));
        }
        if seen.insert(step.step_slug.clone(), ()).is_some() {
            return Err(GraphError::DuplicateStep(step.step_slug.clone()));
        }
    }

    for step in &graph.steps {
        for dep in &step.depends_on {
            if !seen.contains_key(dep) {
                return Err(GraphError::UnknownDependency {
                    step: step.step_slug.clone(),
                    depends_on: dep.clone(),
                });
            }
        }
        if step.step_type == StepType::Map && step.depends_on.len() > 1 {
            return Err(GraphError::MapStepTooManyDependencies(
                step.step_slug.clone(),
                step.depends_on.len(),
            ));
        }
        // Open question resolved: a single step with no map parent whose
        // statically configured width is zero is rejected rather than
        // silently treated as an empty-map cascade.
        if step.step_type == StepType::Single {
            if let Some(0) = step.options.initial_tasks {
                return Err(GraphError::ZeroTaskNonMapStep(step.step_slug.clone()));
            }
        }
    }

    detect_cycle(graph)
}

fn detect_cycle(graph: &WorkflowDef) -> Result<(), GraphError> {
    let mut marks: HashMap<&str, Mark> = graph
        .steps
        .iter()
        .map(|s| (s.step_slug.as_str(), Mark::Unvisited))
        .collect();

    for step in &graph.steps {
        if marks[step.step_slug.as_str()] == Mark::Unvisited {
            let mut path = Vec::new();
            visit(graph, &step.step_slug, &mut marks, &mut path)?;
        }
    }
    Ok(())
}

fn visit<'a>(
    graph: &'a WorkflowDef,
    step_slug: &'a str,
    marks: &mut HashMap<&'a str, Mark>,
    path: &mut Vec<&'a str>,
) -> Result<(), GraphError> {
    marks.insert(step_slug, Mark::Visiting);
    path.push(step_slug);

    let step = graph
        .step(step_slug)
        .expect("step_slug was validated to exist before cycle detection");

    for dep in &step.depends_on {
        match marks.get(dep.as_str()) {
            Some(Mark::Visiting) => {
                let mut cycle: Vec<String> = path.iter().map(|s| s.to_string()).collect();
                cycle.push(dep.clone());
                return Err(GraphError::Cycle(cycle));
            }
            Some(Mark::Visited) => continue,
            _ => visit(graph, dep.as_str(), marks, path)?,
        }
    }

    path.pop();
    marks.insert(step_slug, Mark::Visited);
    Ok(())
}

fn is_valid_slug(slug: &str) -> bool {
    slug.len() <= 47 && slug_regex().is_match(slug)
}

/// A tiny lazily-initialized regex, avoiding a `once_cell`/`lazy_static`
/// dependency for a single pattern.
mod once_cell_regex {
    use std::sync::OnceLock;

    use regex::Regex;

    static SLUG_RE: OnceLock<Regex> = OnceLock::new();

    pub fn slug_regex() -> &'static Regex {
        SLUG_RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::definition::{StepOptions, WorkflowStepDef};

    fn linear() -> WorkflowDef {
        WorkflowDef::new("linear_wf")
            .with_step(WorkflowStepDef::new("a", StepType::Single))
            .with_step(WorkflowStepDef::new("b", StepType::Single).depends_on(["a"]))
            .with_step(WorkflowStepDef::new("c", StepType::Single).depends_on(["b"]))
    }

    #[test]
    fn accepts_linear_graph() {
        assert!(validate_graph(&linear()).is_ok());
    }

    #[test]
    fn rejects_invalid_slug() {
        let graph = WorkflowDef::new("bad slug with spaces");
        assert!(matches!(
            validate_graph(&graph),
            Err(GraphError::InvalidSlug(_))
        ));
    }

    #[test]
    fn rejects_duplicate_step() {
        let graph = WorkflowDef::new("wf")
            .with_step(WorkflowStepDef::new("a", StepType::Single))
            .with_step(WorkflowStepDef::new("a", StepType::Single));
        assert!(matches!(
            validate_graph(&graph),
            Err(GraphError::DuplicateStep(_))
        ));
    }

    #[test]
    fn rejects_unknown_dependency() {
        let graph = WorkflowDef::new("wf")
            .with_step(WorkflowStepDef::new("a", StepType::Single).depends_on(["ghost"]));
        assert!(matches!(
            validate_graph(&graph),
            Err(GraphError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn rejects_map_step_with_two_parents() {
        let graph = WorkflowDef::new("wf")
            .with_step(WorkflowStepDef::new("a", StepType::Single))
            .with_step(WorkflowStepDef::new("b", StepType::Single))
            .with_step(
                WorkflowStepDef::new("m", StepType::Map).depends_on(["a", "b"]),
            );
        assert!(matches!(
            validate_graph(&graph),
            Err(GraphError::MapStepTooManyDependencies(_, 2))
        ));
    }

    #[test]
    fn rejects_cycle() {
        let graph = WorkflowDef::new("wf")
            .with_step(WorkflowStepDef::new("a", StepType::Single).depends_on(["c"]))
            .with_step(WorkflowStepDef::new("b", StepType::Single).depends_on(["a"]))
            .with_step(WorkflowStepDef::new("c", StepType::Single).depends_on(["b"]));
        assert!(matches!(validate_graph(&graph), Err(GraphError::Cycle(_))));
    }

    #[test]
    fn rejects_zero_task_single_step() {
        let graph = WorkflowDef::new("wf").with_step(
            WorkflowStepDef::new("a", StepType::Single)
                .with_options(StepOptions::default().with_initial_tasks(0)),
        );
        assert!(matches!(
            validate_graph(&graph),
            Err(GraphError::ZeroTaskNonMapStep(_))
        ));
    }

    #[test]
    fn accepts_diamond() {
        let graph = WorkflowDef::new("wf")
            .with_step(WorkflowStepDef::new("root", StepType::Single))
            .with_step(WorkflowStepDef::new("left", StepType::Single).depends_on(["root"]))
            .with_step(WorkflowStepDef::new("right", StepType::Single).depends_on(["root"]))
            .with_step(
                WorkflowStepDef::new("merge", StepType::Single).depends_on(["left", "right"]),
            );
        assert!(validate_graph(&graph).is_ok());
        assert_eq!(
            graph.children_of("root").iter().map(|s| s.step_slug.as_str()).collect::<Vec<_>>(),
            vec!["left", "right"]
        );
    }
}
