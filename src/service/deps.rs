use serde::Serialize;

use super::TaskService;
use crate::error::{Error, Result};
use crate::graph;
use crate::model::{DependencyEdge, GraphData, Task, TaskStatus};

/// Both directions of a task's dependency edges.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRelations {
    pub task_id: String,
    /// Tasks this one depends on
    pub blocked_by: Vec<Task>,
    /// Tasks depending on this one
    pub blocking: Vec<Task>,
}

impl TaskService {
    /// Ids `task_id` depends on.
    pub async fn list_dependencies(&self, task_id: &str) -> Result<Vec<String>> {
        let config = self.config()?;
        Ok(self.load_task(&config.workspace_id, task_id).await?.dependencies)
    }

    pub async fn task_relations(&self, task_id: &str) -> Result<TaskRelations> {
        let config = self.config()?;
        let tasks = self.all_tasks(&config.workspace_id).await?;
        if !tasks.iter().any(|task| task.id == task_id) {
            return Err(Error::TaskNotFound(task_id.to_string()));
        }
        Ok(TaskRelations {
            task_id: task_id.to_string(),
            blocked_by: graph::blocked_by(task_id, &tasks).into_iter().cloned().collect(),
            blocking: graph::blocking(task_id, &tasks).into_iter().cloned().collect(),
        })
    }

    /// Record that `task_id` depends on `depends_on_id`, rejecting
    /// self-loops, duplicates, and cycles.
    pub async fn add_dependency(&self, task_id: &str, depends_on_id: &str) -> Result<DependencyEdge> {
        if task_id == depends_on_id {
            return Err(Error::SelfDependency);
        }

        let key = graph::edge(task_id, depends_on_id).id;
        let this = self.clone();
        let task_id = task_id.to_string();
        let depends_on_id = depends_on_id.to_string();
        self.inner
            .dependencies
            .run(key, async move {
                this.add_dependency_now(&task_id, &depends_on_id).await
            })
            .await
    }

    async fn add_dependency_now(&self, task_id: &str, depends_on_id: &str) -> Result<DependencyEdge> {
        let config = self.config()?;
        let tasks = self.all_tasks(&config.workspace_id).await?;
        graph::check_new_dependency(&tasks, task_id, depends_on_id)?;

        let mut task = tasks
            .into_iter()
            .find(|task| task.id == task_id)
            .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))?;
        task.dependencies.push(depends_on_id.to_string());

        self.write_task(&task).await?;
        self.changed("dependency added");
        Ok(graph::edge(task_id, depends_on_id))
    }

    /// "`blocker_id` blocks `blocked_id`", stored on the blocked task.
    pub async fn add_blocker(&self, blocker_id: &str, blocked_id: &str) -> Result<DependencyEdge> {
        let (task_id, depends_on_id) = graph::blocks_edge(blocker_id, blocked_id);
        self.add_dependency(task_id, depends_on_id).await
    }

    /// Returns whether an edge was removed.
    pub async fn remove_dependency(&self, task_id: &str, depends_on_id: &str) -> Result<bool> {
        let config = self.config()?;
        let mut task = self.load_task(&config.workspace_id, task_id).await?;

        let before = task.dependencies.len();
        task.dependencies.retain(|dep| dep != depends_on_id);
        if task.dependencies.len() == before {
            return Ok(false);
        }

        self.write_task(&task).await?;
        self.changed("dependency removed");
        Ok(true)
    }

    pub async fn dependency_graph(&self) -> Result<GraphData> {
        let config = self.config()?;
        Ok(graph::graph_data(self.all_tasks(&config.workspace_id).await?))
    }

    /// Open tasks whose dependencies are all done.
    pub async fn available_tasks(&self) -> Result<Vec<Task>> {
        let config = self.config()?;
        let tasks = self.all_tasks(&config.workspace_id).await?;
        let mut ready: Vec<Task> = tasks
            .iter()
            .filter(|task| !matches!(task.status, TaskStatus::Done | TaskStatus::Archived))
            .filter(|task| graph::is_available(task, &tasks))
            .cloned()
            .collect();
        ready.sort_by_key(|task| task.list_order);
        Ok(ready)
    }
}
