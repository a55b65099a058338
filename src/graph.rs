//! Dependency graph checks over the full task set.
//!
//! An edge `task -> dep` means "task depends on dep". "A blocks B" is stored
//! as "B depends on A".

use std::collections::{HashMap, HashSet};

use crate::error::{Error, Result};
use crate::model::{DependencyEdge, GraphData, Task, TaskStatus};

fn adjacency(tasks: &[Task]) -> HashMap<&str, Vec<&str>> {
    tasks
        .iter()
        .map(|task| {
            (
                task.id.as_str(),
                task.dependencies.iter().map(String::as_str).collect(),
            )
        })
        .collect()
}

/// Whether adding `task_id -> depends_on_id` closes a cycle.
pub fn would_create_cycle(tasks: &[Task], task_id: &str, depends_on_id: &str) -> bool {
    if task_id == depends_on_id {
        return true;
    }

    let mut graph = adjacency(tasks);
    graph.entry(task_id).or_default().push(depends_on_id);

    let mut visited: HashSet<&str> = HashSet::new();
    let mut stack = vec![depends_on_id];

    while let Some(current) = stack.pop() {
        if current == task_id {
            return true;
        }
        if !visited.insert(current) {
            continue;
        }
        if let Some(next) = graph.get(current) {
            stack.extend(next.iter().copied().filter(|id| !visited.contains(id)));
        }
    }

    false
}

/// Validate a proposed dependency before it is written.
pub fn check_new_dependency(tasks: &[Task], task_id: &str, depends_on_id: &str) -> Result<()> {
    if task_id == depends_on_id {
        return Err(Error::SelfDependency);
    }

    let task = tasks
        .iter()
        .find(|task| task.id == task_id)
        .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))?;

    if task.dependencies.iter().any(|dep| dep == depends_on_id) {
        return Err(Error::DuplicateDependency {
            task_id: task_id.to_string(),
            depends_on_id: depends_on_id.to_string(),
        });
    }

    if would_create_cycle(tasks, task_id, depends_on_id) {
        return Err(Error::DependencyCycle {
            task_id: task_id.to_string(),
            depends_on_id: depends_on_id.to_string(),
        });
    }

    Ok(())
}

/// `(task_id, depends_on_id)` for "`blocker_id` blocks `blocked_id`".
pub fn blocks_edge<'a>(blocker_id: &'a str, blocked_id: &'a str) -> (&'a str, &'a str) {
    (blocked_id, blocker_id)
}

/// True iff every dependency is a known task in `done`.
pub fn is_available(task: &Task, tasks: &[Task]) -> bool {
    let status: HashMap<&str, TaskStatus> = tasks
        .iter()
        .map(|task| (task.id.as_str(), task.status))
        .collect();
    task.dependencies
        .iter()
        .all(|dep| status.get(dep.as_str()) == Some(&TaskStatus::Done))
}

pub fn edge(task_id: &str, depends_on_id: &str) -> DependencyEdge {
    DependencyEdge {
        id: format!("{task_id}-{depends_on_id}"),
        task_id: task_id.to_string(),
        depends_on_id: depends_on_id.to_string(),
    }
}

pub fn graph_data(tasks: Vec<Task>) -> GraphData {
    let edges = tasks
        .iter()
        .flat_map(|task| task.dependencies.iter().map(|dep| edge(&task.id, dep)))
        .collect();
    GraphData {
        nodes: tasks,
        edges,
    }
}

/// Tasks `task_id` waits on.
pub fn blocked_by<'a>(task_id: &str, tasks: &'a [Task]) -> Vec<&'a Task> {
    let Some(task) = tasks.iter().find(|task| task.id == task_id) else {
        return Vec::new();
    };
    tasks
        .iter()
        .filter(|other| task.dependencies.contains(&other.id))
        .collect()
}

/// Tasks waiting on `task_id`.
pub fn blocking<'a>(task_id: &str, tasks: &'a [Task]) -> Vec<&'a Task> {
    tasks
        .iter()
        .filter(|other| other.dependencies.iter().any(|dep| dep == task_id))
        .collect()
}
