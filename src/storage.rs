//! Local state directory for tasks-plan
//!
//! Everything the client persists lives in one per-user data directory:
//!
//! ```text
//! <data dir>/
//!   usable-workspace.json       # Connected workspace pointer
//!   usable-workspace.json.lock  # Lock guarding the file above
//!   auth-tokens.json            # Persisted OAuth session
//!   auth-tokens.json.lock
//! ```
//!
//! The default location comes from the platform conventions (`directories`);
//! `--data-dir` / `TP_DATA_DIR` override it.

use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{Error, Result};
use crate::lock::{self, DEFAULT_LOCK_TIMEOUT_MS};

const QUALIFIER: &str = "dev";
const ORGANIZATION: &str = "usable";
const APPLICATION: &str = "tasks-plan";

pub const WORKSPACE_FILE: &str = "usable-workspace.json";
pub const TOKENS_FILE: &str = "auth-tokens.json";
pub const SETTINGS_FILE: &str = "tasks-plan.toml";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from(QUALIFIER, ORGANIZATION, APPLICATION)
}

/// Default settings file location, if the platform has a config dir.
pub fn default_settings_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join(SETTINGS_FILE))
}

/// Storage manager for local client state
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Storage rooted at the platform data directory.
    pub fn platform_default() -> Result<Self> {
        let dirs = project_dirs().ok_or_else(|| {
            Error::InvalidConfig("could not determine a home directory for local state".to_string())
        })?;
        Ok(Self::new(dirs.data_dir()))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn workspace_file(&self) -> PathBuf {
        self.root.join(WORKSPACE_FILE)
    }

    pub fn tokens_file(&self) -> PathBuf {
        self.root.join(TOKENS_FILE)
    }

    pub fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    /// Write JSON atomically under the file's lock.
    pub fn write_json<T: Serialize>(&self, path: &Path, data: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(data)?;
        lock::write_atomic_locked(path, json.as_bytes(), DEFAULT_LOCK_TIMEOUT_MS)
    }

    /// Read JSON; `Ok(None)` when the file does not exist.
    pub fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = lock::read_locked_str(path, DEFAULT_LOCK_TIMEOUT_MS)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    pub fn remove(&self, path: &Path) -> Result<()> {
        lock::remove_locked(path, DEFAULT_LOCK_TIMEOUT_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        name: String,
    }

    #[test]
    fn json_round_trip_and_remove() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = Storage::new(dir.path());
        let path = storage.workspace_file();

        assert!(storage.read_json::<Sample>(&path).expect("read").is_none());

        let sample = Sample {
            name: "Team".to_string(),
        };
        storage.write_json(&path, &sample).expect("write");
        assert_eq!(storage.read_json::<Sample>(&path).expect("read"), Some(sample));

        storage.remove(&path).expect("remove");
        assert!(!path.exists());
    }

    #[test]
    fn file_names_are_stable() {
        let storage = Storage::new("/tmp/tp-state");
        assert!(storage.workspace_file().ends_with(WORKSPACE_FILE));
        assert!(storage.tokens_file().ends_with(TOKENS_FILE));
    }
}
