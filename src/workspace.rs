//! Connected workspace pointer, persisted locally as `usable-workspace.json`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};
use crate::storage::Storage;

/// The remote workspace tasks are stored in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceConfig {
    pub workspace_id: String,
    pub workspace_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_fragment_type_id: Option<String>,
}

impl WorkspaceConfig {
    /// Fragment type new tasks are created with.
    pub fn require_fragment_type(&self) -> Result<&str> {
        self.task_fragment_type_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or(Error::NoFragmentType)
    }
}

#[derive(Debug, Clone)]
pub struct WorkspaceStore {
    storage: Storage,
    path: PathBuf,
}

impl WorkspaceStore {
    pub fn new(storage: Storage) -> Self {
        let path = storage.workspace_file();
        Self { storage, path }
    }

    /// Current config; an unreadable file counts as not configured.
    pub fn load(&self) -> Option<WorkspaceConfig> {
        match self.storage.read_json(&self.path) {
            Ok(config) => config,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "ignoring unreadable workspace config");
                None
            }
        }
    }

    pub fn require(&self) -> Result<WorkspaceConfig> {
        self.load()
            .filter(|config| !config.workspace_id.is_empty())
            .ok_or(Error::NoWorkspace)
    }

    pub fn save(&self, config: &WorkspaceConfig) -> Result<()> {
        self.storage.write_json(&self.path, config)
    }

    pub fn clear(&self) -> Result<()> {
        self.storage.remove(&self.path)
    }
}
