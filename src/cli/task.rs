//! tp task command implementation

use super::{Context, TaskCommands};
use crate::error::{Error, Result};
use crate::model::{CreateTaskInput, ReorderUpdate, Task, TaskFilter, UpdateTaskInput};
use crate::output::{emit_success, task_line, HumanOutput};

pub(super) async fn run(ctx: &Context, cmd: TaskCommands) -> Result<()> {
    match cmd {
        TaskCommands::List {
            status,
            priority,
            tag,
        } => {
            let filter = TaskFilter {
                status,
                priority,
                tag,
            };
            let tasks = ctx.service.list_tasks(&filter).await?;
            let mut human = HumanOutput::new(format!("tp task list: {} task(s)", tasks.len()));
            for task in &tasks {
                human.push_detail(task_line(task));
            }
            emit_success(ctx.output, "task list", &tasks, Some(&human))
        }
        TaskCommands::Show { id } => {
            let task = ctx.service.get_task(&id).await?;
            emit_success(ctx.output, "task show", &task, Some(&describe(&task)))
        }
        TaskCommands::New {
            title,
            description,
            status,
            priority,
            tags,
            projects,
            start,
            end,
        } => {
            let input = CreateTaskInput {
                title,
                description,
                status,
                priority,
                tags: non_empty(tags),
                projects: non_empty(projects),
                start_date: start,
                end_date: end,
            };
            let task = ctx.service.create_task(input).await?;
            let mut human = HumanOutput::new(format!("tp task new: {}", task.id));
            human.push_summary("title", task.title.as_str());
            human.push_summary("order", task.list_order.to_string());
            human.push_next_step(format!("tp task show {}", task.id));
            emit_success(ctx.output, "task new", &task, Some(&human))
        }
        TaskCommands::Update {
            id,
            title,
            description,
            status,
            priority,
            tags,
            projects,
            start,
            end,
        } => {
            let changes = UpdateTaskInput {
                title,
                description,
                status,
                priority,
                tags: non_empty(tags),
                projects: non_empty(projects),
                start_date: start,
                end_date: end,
                ..UpdateTaskInput::default()
            };
            let task = ctx.service.update_task(&id, changes).await?;
            emit_success(ctx.output, "task update", &task, Some(&describe(&task)))
        }
        TaskCommands::Delete { id } => {
            ctx.service.delete_task(&id).await?;
            let human = HumanOutput::new(format!("tp task delete: {id} archived"));
            emit_success(
                ctx.output,
                "task delete",
                &serde_json::json!({ "id": id, "status": "archived" }),
                Some(&human),
            )
        }
        TaskCommands::Comment { id, text } => {
            let task = ctx.service.add_comment(&id, &text).await?;
            let mut human = HumanOutput::new(format!("tp task comment: {id}"));
            if let Some(comment) = task.comments.last() {
                human.push_summary("author", comment.author.as_str());
                human.push_summary("comment", comment.id.as_str());
            }
            emit_success(ctx.output, "task comment", &task, Some(&human))
        }
        TaskCommands::Reorder { moves, board } => {
            let updates = moves
                .iter()
                .map(|raw| parse_move(raw, board))
                .collect::<Result<Vec<_>>>()?;
            let count = updates.len();
            ctx.service.reorder_tasks(updates).await?;
            let human = HumanOutput::new(format!("tp task reorder: {count} task(s) moved"));
            emit_success(ctx.output, "task reorder", &serde_json::json!({ "moved": count }), Some(&human))
        }
    }
}

fn non_empty(values: Vec<String>) -> Option<Vec<String>> {
    if values.is_empty() {
        None
    } else {
        Some(values)
    }
}

/// Parse `<id>=<order>`.
fn parse_move(raw: &str, board: bool) -> Result<ReorderUpdate> {
    let (id, order) = raw
        .split_once('=')
        .ok_or_else(|| Error::InvalidArgument(format!("expected <id>=<order>, got '{raw}'")))?;
    let order: i64 = order
        .trim()
        .parse()
        .map_err(|_| Error::InvalidArgument(format!("invalid order in '{raw}'")))?;
    let id = id.trim();
    if id.is_empty() {
        return Err(Error::InvalidArgument(format!("missing task id in '{raw}'")));
    }

    let mut update = ReorderUpdate {
        id: id.to_string(),
        ..ReorderUpdate::default()
    };
    if board {
        update.kanban_order = Some(order);
    } else {
        update.list_order = Some(order);
    }
    Ok(update)
}

fn describe(task: &Task) -> HumanOutput {
    let mut human = HumanOutput::new(format!("{}: {}", task.id, task.title));
    human.push_summary("status", task.status.as_str());
    human.push_summary("priority", task.priority.as_str());
    human.push_summary("order", format!("list {} / board {}", task.list_order, task.kanban_order));
    if !task.tags.is_empty() {
        human.push_summary("tags", task.tags.join(", "));
    }
    if !task.projects.is_empty() {
        human.push_summary("projects", task.projects.join(", "));
    }
    if !task.dependencies.is_empty() {
        human.push_summary("depends on", task.dependencies.join(", "));
    }
    if let Some(start) = task.start_date.as_deref() {
        human.push_summary("start", start);
    }
    if let Some(end) = task.end_date.as_deref() {
        human.push_summary("end", end);
    }
    human.push_summary("updated", task.updated_at.as_str());
    if !task.description.is_empty() {
        human.push_detail(task.description.as_str());
    }
    for comment in &task.comments {
        human.push_detail(format!("{} ({}): {}", comment.author, comment.created_at, comment.text));
    }
    human
}
