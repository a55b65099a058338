use std::collections::BTreeSet;

use super::TaskService;
use crate::codec::{self, TASK_TAG};
use crate::error::{Error, Result};
use crate::remote::{FragmentPatch, ListQuery};

impl TaskService {
    /// User tags must not collide with the bookkeeping tags.
    pub fn validate_tag(tag: &str) -> Result<String> {
        let tag = tag.trim();
        if tag.is_empty() {
            return Err(Error::InvalidArgument("tag cannot be empty".to_string()));
        }
        if tag.contains(':') || tag == TASK_TAG {
            return Err(Error::InvalidArgument(format!(
                "'{tag}' is reserved; tags may not contain ':' or equal '{TASK_TAG}'"
            )));
        }
        Ok(tag.to_string())
    }

    pub(crate) fn validate_tags(tags: &[String]) -> Result<()> {
        tags.iter().try_for_each(|tag| Self::validate_tag(tag).map(|_| ()))
    }

    /// Sorted unique user tags; empty when no workspace is connected.
    pub async fn list_tags(&self) -> Result<Vec<String>> {
        let Some(config) = self.inner.workspace.load() else {
            return Ok(Vec::new());
        };
        let tags: BTreeSet<String> = self
            .all_tasks(&config.workspace_id)
            .await?
            .into_iter()
            .flat_map(|task| task.tags)
            .collect();
        Ok(tags.into_iter().collect())
    }

    /// Returns false when the task already had the tag.
    pub async fn assign_tag(&self, task_id: &str, tag: &str) -> Result<bool> {
        let tag = Self::validate_tag(tag)?;
        let config = self.config()?;
        let mut task = self.load_task(&config.workspace_id, task_id).await?;
        if task.tags.contains(&tag) {
            return Ok(false);
        }

        task.tags.push(tag);
        self.write_task(&task).await?;
        self.changed("tag assigned");
        Ok(true)
    }

    /// Returns false when the task did not have the tag.
    pub async fn unassign_tag(&self, task_id: &str, tag: &str) -> Result<bool> {
        let config = self.config()?;
        let mut task = self.load_task(&config.workspace_id, task_id).await?;
        let before = task.tags.len();
        task.tags.retain(|t| t != tag.trim());
        if task.tags.len() == before {
            return Ok(false);
        }

        self.write_task(&task).await?;
        self.changed("tag unassigned");
        Ok(true)
    }

    /// Remove `tag` from every task carrying it. Returns how many changed.
    pub async fn delete_tag(&self, tag: &str) -> Result<usize> {
        let tag = Self::validate_tag(tag)?;
        let config = self.config()?;

        // Server-side tag filters are OR-matched; narrow down locally.
        let query = ListQuery::tagged([TASK_TAG, tag.as_str()]).with_limit(self.inner.list_limit);
        let fragments = self.inner.store.list(&config.workspace_id, &query).await?;

        let mut changed = 0;
        for fragment in fragments.iter().filter(|f| f.has_tag(TASK_TAG)) {
            let mut task = codec::decode(fragment);
            let before = task.tags.len();
            task.tags.retain(|t| *t != tag);
            if task.tags.len() == before {
                continue;
            }
            let patch = FragmentPatch::from(codec::encode(&task));
            if let Err(err) = self.inner.store.update(&fragment.id, &patch).await {
                if changed > 0 {
                    self.changed("tag partially deleted");
                }
                return Err(err);
            }
            changed += 1;
        }

        if changed > 0 {
            self.changed("tag deleted");
        }
        Ok(changed)
    }
}
