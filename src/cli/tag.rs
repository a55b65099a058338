//! tp tag command implementation

use super::{Context, TagCommands};
use crate::error::Result;
use crate::output::{emit_success, HumanOutput};

pub(super) async fn run(ctx: &Context, cmd: TagCommands) -> Result<()> {
    match cmd {
        TagCommands::List => {
            let tags = ctx.service.list_tags().await?;
            let mut human = HumanOutput::new(format!("tp tag list: {} tag(s)", tags.len()));
            for tag in &tags {
                human.push_detail(tag.as_str());
            }
            emit_success(ctx.output, "tag list", &tags, Some(&human))
        }
        TagCommands::Assign { id, tag } => {
            let changed = ctx.service.assign_tag(&id, &tag).await?;
            let header = if changed {
                format!("tp tag assign: {tag} added to {id}")
            } else {
                format!("tp tag assign: {id} already tagged {tag}")
            };
            emit_success(
                ctx.output,
                "tag assign",
                &serde_json::json!({ "taskId": id, "tag": tag, "changed": changed }),
                Some(&HumanOutput::new(header)),
            )
        }
        TagCommands::Unassign { id, tag } => {
            let changed = ctx.service.unassign_tag(&id, &tag).await?;
            let header = if changed {
                format!("tp tag unassign: {tag} removed from {id}")
            } else {
                format!("tp tag unassign: {id} was not tagged {tag}")
            };
            emit_success(
                ctx.output,
                "tag unassign",
                &serde_json::json!({ "taskId": id, "tag": tag, "changed": changed }),
                Some(&HumanOutput::new(header)),
            )
        }
        TagCommands::Delete { tag } => {
            let updated = ctx.service.delete_tag(&tag).await?;
            let human = HumanOutput::new(format!("tp tag delete: {tag} removed from {updated} task(s)"));
            emit_success(
                ctx.output,
                "tag delete",
                &serde_json::json!({ "tag": tag, "updated": updated }),
                Some(&human),
            )
        }
    }
}
