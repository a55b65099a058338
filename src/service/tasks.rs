use futures_util::future::join_all;
use tracing::{debug, warn};

use super::{TaskService, UNKNOWN_AUTHOR};
use crate::codec::{self, SOURCE_TAG, STATUS_TAG_PREFIX};
use crate::dedup::create_task_key;
use crate::error::{Error, Result};
use crate::model::{
    dedup_preserving_order, CreateTaskInput, ReorderUpdate, Task, TaskComment, TaskFilter,
    TaskStatus, UpdateTaskInput,
};
use crate::remote::{FragmentPatch, NewFragment};

impl TaskService {
    /// Non-archived tasks (unless archived is asked for), sorted by list order.
    pub async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let config = self.config()?;
        let mut tasks = self.all_tasks(&config.workspace_id).await?;

        tasks.retain(|task| {
            filter.status.map_or(true, |status| task.status == status)
                && filter.priority.map_or(true, |priority| task.priority == priority)
                && (filter.status == Some(TaskStatus::Archived)
                    || task.status != TaskStatus::Archived)
                && filter
                    .tag
                    .as_deref()
                    .map_or(true, |tag| task.tags.iter().any(|t| t == tag))
        });
        tasks.sort_by_key(|task| task.list_order);
        Ok(tasks)
    }

    pub async fn get_task(&self, id: &str) -> Result<Task> {
        let config = self.config()?;
        self.load_task(&config.workspace_id, id).await
    }

    /// Create a task. Identical concurrent or back-to-back requests yield one
    /// remote fragment.
    pub async fn create_task(&self, input: CreateTaskInput) -> Result<Task> {
        if input.title.trim().is_empty() {
            return Err(Error::InvalidArgument("title cannot be empty".to_string()));
        }
        if let Some(tags) = input.tags.as_deref() {
            Self::validate_tags(tags)?;
        }

        let key = create_task_key(&input);
        let this = self.clone();
        self.inner
            .creates
            .run(key, async move { this.create_task_now(input).await })
            .await
    }

    async fn create_task_now(&self, input: CreateTaskInput) -> Result<Task> {
        let config = self.config()?;
        let fragment_type_id = config.require_fragment_type()?.to_string();

        let order = self
            .inner
            .store
            .count(&config.workspace_id, &[SOURCE_TAG.to_string()])
            .await? as i64;

        let now = codec::now_iso();
        let mut task = Task {
            id: String::new(),
            title: input.title,
            description: input.description.unwrap_or_default(),
            status: input.status.unwrap_or_default(),
            priority: input.priority.unwrap_or_default(),
            kanban_order: order,
            list_order: order,
            created_at: now.clone(),
            updated_at: now,
            tags: dedup_preserving_order(input.tags.unwrap_or_default()),
            projects: dedup_preserving_order(input.projects.unwrap_or_default()),
            dependencies: Vec::new(),
            comments: Vec::new(),
            start_date: input.start_date.filter(|d| !d.is_empty()),
            end_date: input.end_date.filter(|d| !d.is_empty()),
        };

        let payload = codec::encode(&task);
        let created = self
            .inner
            .store
            .create(&NewFragment {
                workspace_id: config.workspace_id,
                fragment_type_id,
                title: payload.title,
                summary: payload.summary,
                content: payload.content,
                tags: payload.tags,
            })
            .await?;

        task.id = created.fragment_id;
        self.changed("create");
        Ok(task)
    }

    /// Merge `changes` into the stored task and write it back.
    pub async fn update_task(&self, id: &str, changes: UpdateTaskInput) -> Result<Task> {
        if let Some(tags) = changes.tags.as_deref() {
            Self::validate_tags(tags)?;
        }
        if changes.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(Error::InvalidArgument("title cannot be empty".to_string()));
        }

        let config = self.config()?;
        let mut task = self.load_task(&config.workspace_id, id).await?;
        apply_update(&mut task, changes);

        self.write_task(&task).await?;
        self.changed("update");
        task.updated_at = codec::now_iso();
        Ok(task)
    }

    /// Archive a task. Nothing is ever hard-deleted.
    pub async fn delete_task(&self, id: &str) -> Result<()> {
        let config = self.config()?;
        let mut task = self.load_task(&config.workspace_id, id).await?;
        task.status = TaskStatus::Archived;

        let mut payload = codec::encode(&task);
        payload.tags.retain(|tag| !tag.starts_with(STATUS_TAG_PREFIX));
        payload
            .tags
            .push(format!("{STATUS_TAG_PREFIX}{}", TaskStatus::Archived));

        self.inner
            .store
            .update(id, &FragmentPatch::from(payload))
            .await?;
        self.changed("archive");
        Ok(())
    }

    /// Apply position/status changes to many tasks concurrently.
    pub async fn reorder_tasks(&self, updates: Vec<ReorderUpdate>) -> Result<()> {
        let config = self.config()?;
        if updates.is_empty() {
            return Ok(());
        }

        let workspace_id = config.workspace_id.as_str();
        let writes = updates.iter().map(|update| async move {
            let mut task = self.load_task(workspace_id, &update.id).await?;
            if let Some(order) = update.kanban_order {
                task.kanban_order = order;
            }
            if let Some(order) = update.list_order {
                task.list_order = order;
            }
            if let Some(status) = update.status {
                task.status = status;
            }
            self.write_task(&task).await
        });

        let results = join_all(writes).await;
        let landed = results.iter().filter(|result| result.is_ok()).count();
        if let Some(err) = results.into_iter().find_map(|result| result.err()) {
            warn!(error = %err, landed, "reorder partially failed");
            if landed > 0 {
                self.changed("reorder");
            } else {
                self.inner.cache.invalidate();
            }
            return Err(err);
        }

        debug!(count = updates.len(), "reordered tasks");
        self.changed("reorder");
        Ok(())
    }

    /// Append a comment authored by the current identity.
    pub async fn add_comment(&self, task_id: &str, text: &str) -> Result<Task> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::InvalidArgument("comment text cannot be empty".to_string()));
        }

        let key = serde_json::json!({ "task": task_id, "text": text }).to_string();
        let this = self.clone();
        let task_id = task_id.to_string();
        let text = text.to_string();
        self.inner
            .comments
            .run(key, async move { this.add_comment_now(&task_id, text).await })
            .await
    }

    async fn add_comment_now(&self, task_id: &str, text: String) -> Result<Task> {
        let config = self.config()?;
        let mut task = self.load_task(&config.workspace_id, task_id).await?;

        let claims = self.claims().unwrap_or_default();
        let now = codec::now_iso();
        task.comments.push(TaskComment {
            id: uuid::Uuid::new_v4().to_string(),
            text,
            author: claims
                .name
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string()),
            author_email: claims.email.unwrap_or_default(),
            created_at: now.clone(),
        });

        self.write_task(&task).await?;
        self.changed("comment");
        task.updated_at = now;
        Ok(task)
    }
}

fn apply_update(task: &mut Task, changes: UpdateTaskInput) {
    let UpdateTaskInput {
        title,
        description,
        status,
        priority,
        kanban_order,
        list_order,
        tags,
        projects,
        dependencies,
        comments,
        start_date,
        end_date,
    } = changes;

    if let Some(title) = title {
        task.title = title;
    }
    if let Some(description) = description {
        task.description = description;
    }
    if let Some(status) = status {
        task.status = status;
    }
    if let Some(priority) = priority {
        task.priority = priority;
    }
    if let Some(order) = kanban_order {
        task.kanban_order = order;
    }
    if let Some(order) = list_order {
        task.list_order = order;
    }
    if let Some(tags) = tags {
        task.tags = dedup_preserving_order(tags);
    }
    if let Some(projects) = projects {
        task.projects = dedup_preserving_order(projects);
    }
    if let Some(dependencies) = dependencies {
        task.dependencies = dedup_preserving_order(dependencies);
    }
    if let Some(comments) = comments {
        task.comments = comments;
    }
    // An empty string clears a date.
    if let Some(date) = start_date {
        task.start_date = Some(date).filter(|d| !d.is_empty());
    }
    if let Some(date) = end_date {
        task.end_date = Some(date).filter(|d| !d.is_empty());
    }
}
