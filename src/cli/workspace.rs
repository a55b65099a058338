//! tp workspace command implementation

use super::{Context, WorkspaceCommands};
use crate::error::{Error, Result};
use crate::output::{emit_success, HumanOutput};

pub(super) async fn run(ctx: &Context, cmd: WorkspaceCommands) -> Result<()> {
    match cmd {
        WorkspaceCommands::List => {
            let workspaces = ctx.service.list_workspaces().await?;
            let mut human = HumanOutput::new(format!("tp workspace list: {} workspace(s)", workspaces.len()));
            for workspace in &workspaces {
                human.push_detail(format!("{} {}", workspace.id, workspace.name));
            }
            human.push_next_step("tp workspace connect <id> <name>");
            emit_success(ctx.output, "workspace list", &workspaces, Some(&human))
        }
        WorkspaceCommands::Types { workspace_id } => {
            let types = ctx.service.fragment_types(&workspace_id).await?;
            let mut human = HumanOutput::new(format!("tp workspace types: {workspace_id}"));
            for kind in &types {
                human.push_detail(format!("{} {}", kind.id, kind.name));
            }
            emit_success(ctx.output, "workspace types", &types, Some(&human))
        }
        WorkspaceCommands::Connect { workspace_id, name } => {
            let config = ctx.service.connect_workspace(&workspace_id, &name).await?;
            let mut human = HumanOutput::new(format!("tp workspace connect: {name}"));
            human.push_summary("workspace", config.workspace_id.as_str());
            match config.task_fragment_type_id.as_deref() {
                Some(id) => human.push_summary("fragment type", id),
                None => human.push_warning("no 'task' or 'knowledge' fragment type; creating tasks will fail"),
            }
            human.push_next_step("tp migrate");
            emit_success(ctx.output, "workspace connect", &config, Some(&human))
        }
        WorkspaceCommands::Show => {
            let config = ctx.service.current_workspace().ok_or(Error::NoWorkspace)?;
            let mut human = HumanOutput::new(format!("tp workspace: {}", config.workspace_name));
            human.push_summary("id", config.workspace_id.as_str());
            human.push_summary(
                "fragment type",
                config.task_fragment_type_id.as_deref().unwrap_or("(none)"),
            );
            emit_success(ctx.output, "workspace show", &config, Some(&human))
        }
        WorkspaceCommands::Clear => {
            ctx.service.disconnect_workspace()?;
            let human = HumanOutput::new("tp workspace clear: disconnected");
            emit_success(ctx.output, "workspace clear", &serde_json::json!({ "cleared": true }), Some(&human))
        }
    }
}
