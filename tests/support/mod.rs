#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use parking_lot::Mutex;
use tasks_plan::auth::{StaticToken, TokenProvider};
use tasks_plan::config::Settings;
use tasks_plan::error::{Error, Result};
use tasks_plan::model::Fragment;
use tasks_plan::remote::{
    CreatedFragment, FragmentPatch, FragmentStore, FragmentType, ListQuery, NewFragment,
    RemoteWorkspace,
};
use tasks_plan::service::TaskService;
use tasks_plan::storage::Storage;
use tasks_plan::workspace::{WorkspaceConfig, WorkspaceStore};
use tempfile::TempDir;

pub const WORKSPACE_ID: &str = "ws-1";
pub const TASK_TYPE_ID: &str = "ft-task";

#[derive(Default)]
pub struct CallCounts {
    pub list: AtomicUsize,
    pub get: AtomicUsize,
    pub create: AtomicUsize,
    pub update: AtomicUsize,
    pub count: AtomicUsize,
}

impl CallCounts {
    pub fn creates(&self) -> usize {
        self.create.load(Ordering::SeqCst)
    }

    pub fn lists(&self) -> usize {
        self.list.load(Ordering::SeqCst)
    }

    pub fn updates(&self) -> usize {
        self.update.load(Ordering::SeqCst)
    }
}

/// In-memory fragment store with call counters and failure injection.
#[derive(Default)]
pub struct FakeStore {
    fragments: Mutex<Vec<Fragment>>,
    next_id: AtomicUsize,
    create_delay: Mutex<Option<Duration>>,
    failing_updates: Mutex<HashSet<String>>,
    workspaces: Mutex<Vec<RemoteWorkspace>>,
    fragment_types: Mutex<Vec<FragmentType>>,
    pub calls: CallCounts,
}

impl FakeStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, fragment: Fragment) {
        self.fragments.lock().push(fragment);
    }

    pub fn fragment(&self, id: &str) -> Option<Fragment> {
        self.fragments.lock().iter().find(|f| f.id == id).cloned()
    }

    pub fn all(&self) -> Vec<Fragment> {
        self.fragments.lock().clone()
    }

    pub fn set_create_delay(&self, delay: Duration) {
        *self.create_delay.lock() = Some(delay);
    }

    pub fn fail_updates_for(&self, id: &str) {
        self.failing_updates.lock().insert(id.to_string());
    }

    pub fn set_workspaces(&self, workspaces: Vec<RemoteWorkspace>) {
        *self.workspaces.lock() = workspaces;
    }

    pub fn set_fragment_types(&self, types: Vec<FragmentType>) {
        *self.fragment_types.lock() = types;
    }

    fn matches(fragment: &Fragment, workspace_id: &str, tags: &[String]) -> bool {
        fragment.workspace_id.as_deref() == Some(workspace_id)
            && (tags.is_empty() || tags.iter().any(|tag| fragment.has_tag(tag)))
    }
}

#[async_trait]
impl FragmentStore for FakeStore {
    async fn list(&self, workspace_id: &str, query: &ListQuery) -> Result<Vec<Fragment>> {
        self.calls.list.fetch_add(1, Ordering::SeqCst);
        let limit = query.effective_limit() as usize;
        Ok(self
            .fragments
            .lock()
            .iter()
            .filter(|f| Self::matches(f, workspace_id, &query.tags))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get(&self, fragment_id: &str) -> Result<Fragment> {
        self.calls.get.fetch_add(1, Ordering::SeqCst);
        self.fragment(fragment_id)
            .ok_or_else(|| Error::TaskNotFound(fragment_id.to_string()))
    }

    async fn create(&self, fragment: &NewFragment) -> Result<CreatedFragment> {
        self.calls.create.fetch_add(1, Ordering::SeqCst);
        let delay = *self.create_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let id = format!("frag-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.insert(Fragment {
            id: id.clone(),
            title: fragment.title.clone(),
            content: fragment.content.clone(),
            summary: Some(fragment.summary.clone()),
            tags: fragment.tags.clone(),
            workspace_id: Some(fragment.workspace_id.clone()),
            fragment_type_id: Some(fragment.fragment_type_id.clone()),
            ..Fragment::default()
        });
        Ok(CreatedFragment {
            success: true,
            fragment_id: id,
            status: "created".to_string(),
            message: String::new(),
        })
    }

    async fn update(&self, fragment_id: &str, patch: &FragmentPatch) -> Result<()> {
        self.calls.update.fetch_add(1, Ordering::SeqCst);
        if self.failing_updates.lock().contains(fragment_id) {
            return Err(Error::Api {
                status: 500,
                body: "update rejected".to_string(),
            });
        }

        let mut fragments = self.fragments.lock();
        let fragment = fragments
            .iter_mut()
            .find(|f| f.id == fragment_id)
            .ok_or_else(|| Error::TaskNotFound(fragment_id.to_string()))?;
        if let Some(title) = patch.title.clone() {
            fragment.title = title;
        }
        if let Some(summary) = patch.summary.clone() {
            fragment.summary = Some(summary);
        }
        if let Some(content) = patch.content.clone() {
            fragment.content = content;
        }
        if let Some(tags) = patch.tags.clone() {
            fragment.tags = tags;
        }
        Ok(())
    }

    async fn count(&self, workspace_id: &str, tags: &[String]) -> Result<u64> {
        self.calls.count.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .fragments
            .lock()
            .iter()
            .filter(|f| Self::matches(f, workspace_id, tags))
            .count() as u64)
    }

    async fn list_workspaces(&self) -> Result<Vec<RemoteWorkspace>> {
        Ok(self.workspaces.lock().clone())
    }

    async fn fragment_types(&self, workspace_id: &str) -> Result<Vec<FragmentType>> {
        Ok(self
            .fragment_types
            .lock()
            .iter()
            .filter(|t| t.workspace_id == workspace_id)
            .cloned()
            .collect())
    }
}

/// Unsigned JWT carrying the given claims payload.
pub fn jwt(payload: &str) -> String {
    format!(
        "{}.{}.sig",
        URL_SAFE_NO_PAD.encode(r#"{"alg":"none"}"#),
        URL_SAFE_NO_PAD.encode(payload)
    )
}

/// A service wired to a [`FakeStore`] and a temp data directory.
pub struct Harness {
    _dir: TempDir,
    pub store: Arc<FakeStore>,
    pub workspace: WorkspaceStore,
    pub service: TaskService,
}

impl Harness {
    /// Not connected to any workspace.
    pub fn new() -> Self {
        Self::with_identity(None)
    }

    /// Connected to [`WORKSPACE_ID`] with a task fragment type.
    pub fn connected() -> Self {
        let harness = Self::new();
        harness.connect();
        harness
    }

    /// Connected, with comments authored by `name`.
    pub fn connected_as(name: &str) -> Self {
        let token = jwt(&serde_json::json!({ "name": name, "email": "ada@example.com" }).to_string());
        let identity: Arc<dyn TokenProvider> = Arc::new(StaticToken::new(token));
        let harness = Self::with_identity(Some(identity));
        harness.connect();
        harness
    }

    fn with_identity(identity: Option<Arc<dyn TokenProvider>>) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FakeStore::new();
        let workspace = WorkspaceStore::new(Storage::new(dir.path()));
        let service = TaskService::with_settings(
            Arc::clone(&store) as Arc<dyn FragmentStore>,
            workspace.clone(),
            &Settings::default(),
            identity,
        );
        Self {
            _dir: dir,
            store,
            workspace,
            service,
        }
    }

    pub fn connect(&self) {
        self.workspace
            .save(&WorkspaceConfig {
                workspace_id: WORKSPACE_ID.to_string(),
                workspace_name: "Main".to_string(),
                task_fragment_type_id: Some(TASK_TYPE_ID.to_string()),
            })
            .expect("save workspace");
    }
}
