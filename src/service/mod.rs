//! Task operations over the remote fragment store.
//!
//! [`TaskService`] is what a UI or the CLI calls. Reads go through the
//! [`TaskCache`]; every successful write invalidates it and fires one
//! [`ChangeBroadcast`] notification. Concurrent updates to the same task are
//! last-write-wins: the remote store has no version check.

mod deps;
mod tags;
mod tasks;
mod workspace;

use std::sync::Arc;

use tracing::info;

pub use deps::TaskRelations;

use crate::auth::{Claims, TokenProvider};
use crate::broadcast::ChangeBroadcast;
use crate::cache::TaskCache;
use crate::codec;
use crate::config::Settings;
use crate::dedup::Deduplicator;
use crate::error::Result;
use crate::model::{DependencyEdge, Task};
use crate::remote::{FragmentPatch, FragmentStore};
use crate::workspace::{WorkspaceConfig, WorkspaceStore};

/// Author recorded on comments when no identity is available.
pub const UNKNOWN_AUTHOR: &str = "Unknown";

struct ServiceInner {
    store: Arc<dyn FragmentStore>,
    cache: TaskCache,
    broadcast: ChangeBroadcast,
    workspace: WorkspaceStore,
    identity: Option<Arc<dyn TokenProvider>>,
    list_limit: u32,
    creates: Deduplicator<Task>,
    comments: Deduplicator<Task>,
    dependencies: Deduplicator<DependencyEdge>,
}

/// Cheap to clone; clones share cache, broadcast and dedup state.
#[derive(Clone)]
pub struct TaskService {
    inner: Arc<ServiceInner>,
}

impl TaskService {
    pub fn new(store: Arc<dyn FragmentStore>, workspace: WorkspaceStore) -> Self {
        Self::with_settings(store, workspace, &Settings::default(), None)
    }

    pub fn with_settings(
        store: Arc<dyn FragmentStore>,
        workspace: WorkspaceStore,
        settings: &Settings,
        identity: Option<Arc<dyn TokenProvider>>,
    ) -> Self {
        let cache = TaskCache::new(Arc::clone(&store))
            .with_ttl(settings.cache_ttl())
            .with_list_limit(settings.cache.list_limit);
        Self::from_parts(store, cache, workspace, settings, identity)
    }

    /// Build around an existing cache (e.g. one with a custom clock).
    pub fn from_parts(
        store: Arc<dyn FragmentStore>,
        cache: TaskCache,
        workspace: WorkspaceStore,
        settings: &Settings,
        identity: Option<Arc<dyn TokenProvider>>,
    ) -> Self {
        let grace = settings.dedup_grace();
        Self {
            inner: Arc::new(ServiceInner {
                store,
                cache,
                broadcast: ChangeBroadcast::new(),
                workspace,
                identity,
                list_limit: settings.cache.list_limit,
                creates: Deduplicator::new(grace),
                comments: Deduplicator::new(grace),
                dependencies: Deduplicator::new(grace),
            }),
        }
    }

    pub fn broadcast(&self) -> &ChangeBroadcast {
        &self.inner.broadcast
    }

    pub fn cache(&self) -> &TaskCache {
        &self.inner.cache
    }

    fn config(&self) -> Result<WorkspaceConfig> {
        self.inner.workspace.require()
    }

    fn claims(&self) -> Option<Claims> {
        self.inner.identity.as_ref().and_then(|provider| provider.claims())
    }

    async fn all_tasks(&self, workspace_id: &str) -> Result<Vec<Task>> {
        let fragments = self.inner.cache.get_all(workspace_id).await?;
        Ok(fragments.iter().map(codec::decode).collect())
    }

    async fn load_task(&self, workspace_id: &str, id: &str) -> Result<Task> {
        let fragment = self.inner.cache.get_one(workspace_id, id).await?;
        Ok(codec::decode(&fragment))
    }

    async fn write_task(&self, task: &Task) -> Result<()> {
        let patch = FragmentPatch::from(codec::encode(task));
        self.inner.store.update(&task.id, &patch).await
    }

    /// Invalidate and notify after a successful write.
    fn changed(&self, what: &str) {
        info!(what, "tasks changed");
        self.inner.cache.invalidate();
        self.inner.broadcast.notify();
    }
}
