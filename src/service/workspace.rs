use tracing::{info, warn};

use super::TaskService;
use crate::codec::{SOURCE_TAG, TASK_TAG};
use crate::error::Result;
use crate::model::Fragment;
use crate::remote::{FragmentPatch, FragmentType, ListQuery, RemoteWorkspace};
use crate::workspace::WorkspaceConfig;

/// Fragment type names tried, in order, when connecting a workspace.
const PREFERRED_FRAGMENT_TYPES: [&str; 2] = ["task", "knowledge"];

fn pick_fragment_type(types: &[FragmentType]) -> Option<&FragmentType> {
    PREFERRED_FRAGMENT_TYPES.iter().find_map(|wanted| {
        types
            .iter()
            .find(|candidate| candidate.name.eq_ignore_ascii_case(wanted))
    })
}

impl TaskService {
    pub async fn list_workspaces(&self) -> Result<Vec<RemoteWorkspace>> {
        self.inner.store.list_workspaces().await
    }

    pub async fn fragment_types(&self, workspace_id: &str) -> Result<Vec<FragmentType>> {
        self.inner.store.fragment_types(workspace_id).await
    }

    pub fn current_workspace(&self) -> Option<WorkspaceConfig> {
        self.inner.workspace.load()
    }

    /// Point the planner at a workspace, choosing its task fragment type.
    pub async fn connect_workspace(&self, workspace_id: &str, workspace_name: &str) -> Result<WorkspaceConfig> {
        let types = self.fragment_types(workspace_id).await?;
        let chosen = pick_fragment_type(&types);
        if chosen.is_none() {
            warn!(workspace_id, "workspace has no task or knowledge fragment type");
        }

        let config = WorkspaceConfig {
            workspace_id: workspace_id.to_string(),
            workspace_name: workspace_name.to_string(),
            task_fragment_type_id: chosen.map(|t| t.id.clone()),
        };
        self.inner.workspace.save(&config)?;
        info!(workspace_id, "workspace connected");
        self.changed("workspace connected");
        Ok(config)
    }

    pub fn disconnect_workspace(&self) -> Result<()> {
        self.inner.workspace.clear()?;
        self.changed("workspace cleared");
        Ok(())
    }

    /// Whether the API answers with the current credentials.
    pub async fn check_connection(&self) -> bool {
        match self.inner.store.list_workspaces().await {
            Ok(_) => true,
            Err(err) => {
                warn!(error = %err, "connection check failed");
                false
            }
        }
    }

    /// Tag pre-existing task fragments with the source tag so the cache
    /// listing finds them. Returns the number of fragments updated.
    pub async fn migrate_source_tag(&self) -> Result<usize> {
        let Some(config) = self.inner.workspace.load() else {
            return Ok(0);
        };

        let query = ListQuery::tagged([TASK_TAG]).with_limit(self.inner.list_limit);
        let fragments = self.inner.store.list(&config.workspace_id, &query).await?;
        let pending: Vec<&Fragment> = fragments
            .iter()
            .filter(|fragment| !fragment.has_tag(SOURCE_TAG))
            .collect();
        if pending.is_empty() {
            return Ok(0);
        }

        info!(count = pending.len(), tag = SOURCE_TAG, "migrating task fragments");
        let mut updated = 0;
        for fragment in pending {
            let mut tags = fragment.tags.clone();
            tags.push(SOURCE_TAG.to_string());
            if let Err(err) = self
                .inner
                .store
                .update(&fragment.id, &FragmentPatch::tags_only(tags))
                .await
            {
                if updated > 0 {
                    self.changed("source tag migration");
                }
                return Err(err);
            }
            updated += 1;
        }

        self.changed("source tag migration");
        Ok(updated)
    }
}
