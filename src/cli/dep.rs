//! tp dep command implementation

use super::{Context, DepCommands};
use crate::error::Result;
use crate::model::DependencyEdge;
use crate::output::{emit_success, task_line, HumanOutput};

pub(super) async fn run(ctx: &Context, cmd: DepCommands) -> Result<()> {
    match cmd {
        DepCommands::List { id } => {
            let relations = ctx.service.task_relations(&id).await?;
            let mut human = HumanOutput::new(format!("tp dep list: {id}"));
            human.push_summary("depends on", relations.blocked_by.len().to_string());
            human.push_summary("blocks", relations.blocking.len().to_string());
            for task in &relations.blocked_by {
                human.push_detail(format!("needs {}", task_line(task)));
            }
            for task in &relations.blocking {
                human.push_detail(format!("blocks {}", task_line(task)));
            }
            emit_success(ctx.output, "dep list", &relations, Some(&human))
        }
        DepCommands::Add { id, depends_on } => {
            let edge = ctx.service.add_dependency(&id, &depends_on).await?;
            emit_edge(ctx, "dep add", &edge)
        }
        DepCommands::Block { blocker, blocked } => {
            let edge = ctx.service.add_blocker(&blocker, &blocked).await?;
            emit_edge(ctx, "dep block", &edge)
        }
        DepCommands::Rm { id, depends_on } => {
            let removed = ctx.service.remove_dependency(&id, &depends_on).await?;
            let human = if removed {
                HumanOutput::new(format!("tp dep rm: {id} no longer depends on {depends_on}"))
            } else {
                HumanOutput::new(format!("tp dep rm: {id} did not depend on {depends_on}"))
            };
            emit_success(
                ctx.output,
                "dep rm",
                &serde_json::json!({ "taskId": id, "dependsOnId": depends_on, "removed": removed }),
                Some(&human),
            )
        }
        DepCommands::Graph => {
            let graph = ctx.service.dependency_graph().await?;
            let mut human = HumanOutput::new(format!(
                "tp dep graph: {} task(s), {} edge(s)",
                graph.nodes.len(),
                graph.edges.len()
            ));
            for edge in &graph.edges {
                human.push_detail(format!("{} -> {}", edge.task_id, edge.depends_on_id));
            }
            emit_success(ctx.output, "dep graph", &graph, Some(&human))
        }
        DepCommands::Ready => {
            let tasks = ctx.service.available_tasks().await?;
            let mut human = HumanOutput::new(format!("tp dep ready: {} task(s)", tasks.len()));
            for task in &tasks {
                human.push_detail(task_line(task));
            }
            emit_success(ctx.output, "dep ready", &tasks, Some(&human))
        }
    }
}

fn emit_edge(ctx: &Context, command: &str, edge: &DependencyEdge) -> Result<()> {
    let mut human = HumanOutput::new(format!(
        "tp {command}: {} depends on {}",
        edge.task_id, edge.depends_on_id
    ));
    human.push_next_step("tp dep graph");
    emit_success(ctx.output, command, edge, Some(&human))
}
