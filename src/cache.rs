//! Single-slot read cache over the task fragments of one workspace.
//!
//! The snapshot is replaced wholesale on a miss and dropped on every write.
//! Freshness is `now - fetched_at < ttl` against an injectable [`Clock`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use crate::codec::SOURCE_TAG;
use crate::config::{DEFAULT_CACHE_TTL, DEFAULT_LIST_LIMIT};
use crate::error::Result;
use crate::model::Fragment;
use crate::remote::{FragmentStore, ListQuery};

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Monotonic clock that follows tokio's (pausable) time.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }
}

struct Snapshot {
    workspace_id: String,
    fragments: Vec<Fragment>,
    fetched_at: Instant,
}

#[derive(Default)]
struct Slot {
    snapshot: Option<Snapshot>,
    /// Bumped on invalidate so an in-flight fetch cannot resurrect old data.
    generation: u64,
}

pub struct TaskCache {
    store: Arc<dyn FragmentStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    list_limit: u32,
    slot: Mutex<Slot>,
}

impl TaskCache {
    pub fn new(store: Arc<dyn FragmentStore>) -> Self {
        Self {
            store,
            clock: Arc::new(TokioClock),
            ttl: DEFAULT_CACHE_TTL,
            list_limit: DEFAULT_LIST_LIMIT,
            slot: Mutex::new(Slot::default()),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_list_limit(mut self, limit: u32) -> Self {
        self.list_limit = limit;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn is_fresh(&self, snapshot: &Snapshot, workspace_id: &str) -> bool {
        snapshot.workspace_id == workspace_id
            && self.clock.now().saturating_duration_since(snapshot.fetched_at) < self.ttl
    }

    /// Every task fragment of the workspace.
    pub async fn get_all(&self, workspace_id: &str) -> Result<Vec<Fragment>> {
        let generation = {
            let slot = self.slot.lock();
            if let Some(snapshot) = slot.snapshot.as_ref() {
                if self.is_fresh(snapshot, workspace_id) {
                    debug!(workspace_id, "task cache hit");
                    return Ok(snapshot.fragments.clone());
                }
            }
            slot.generation
        };

        debug!(workspace_id, "task cache miss");
        let query = ListQuery::tagged([SOURCE_TAG]).with_limit(self.list_limit);
        let fragments = self.store.list(workspace_id, &query).await?;

        let mut slot = self.slot.lock();
        if slot.generation == generation {
            slot.snapshot = Some(Snapshot {
                workspace_id: workspace_id.to_string(),
                fragments: fragments.clone(),
                fetched_at: self.clock.now(),
            });
        }
        Ok(fragments)
    }

    /// One fragment, from the snapshot when fresh.
    pub async fn get_one(&self, workspace_id: &str, id: &str) -> Result<Fragment> {
        {
            let slot = self.slot.lock();
            if let Some(snapshot) = slot.snapshot.as_ref() {
                if self.is_fresh(snapshot, workspace_id) {
                    if let Some(found) = snapshot.fragments.iter().find(|f| f.id == id) {
                        return Ok(found.clone());
                    }
                }
            }
        }

        let fragment = self.store.get(id).await?;

        let mut slot = self.slot.lock();
        let fresh = slot
            .snapshot
            .as_ref()
            .map(|snapshot| self.is_fresh(snapshot, workspace_id))
            .unwrap_or(false);
        if fresh {
            if let Some(snapshot) = slot.snapshot.as_mut() {
                match snapshot.fragments.iter_mut().find(|f| f.id == id) {
                    Some(existing) => *existing = fragment.clone(),
                    None => snapshot.fragments.push(fragment.clone()),
                }
            }
        }
        Ok(fragment)
    }

    pub fn invalidate(&self) {
        let mut slot = self.slot.lock();
        slot.snapshot = None;
        slot.generation = slot.generation.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ManualClock {
        base: Instant,
        offset: Mutex<Duration>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self {
                base: Instant::now(),
                offset: Mutex::new(Duration::ZERO),
            }
        }

        fn advance(&self, by: Duration) {
            *self.offset.lock() += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            self.base + *self.offset.lock()
        }
    }

    fn fragment(id: &str) -> Fragment {
        Fragment {
            id: id.to_string(),
            title: id.to_uppercase(),
            ..Default::default()
        }
    }

    fn cache_with(store: &Arc<CountingStore>, clock: &Arc<ManualClock>) -> TaskCache {
        let store: Arc<dyn FragmentStore> = store.clone();
        TaskCache::new(store)
            .with_ttl(Duration::from_secs(120))
            .with_clock(clock.clone())
    }

    #[test]
    fn freshness_boundary_is_exclusive() {
        let clock = Arc::new(ManualClock::new());
        let cache = cache_with(&Arc::new(CountingStore::default()), &clock);
        let snapshot = Snapshot {
            workspace_id: "ws".to_string(),
            fragments: Vec::new(),
            fetched_at: clock.now(),
        };

        clock.advance(Duration::from_secs(119));
        assert!(cache.is_fresh(&snapshot, "ws"));
        assert!(!cache.is_fresh(&snapshot, "other"));
        clock.advance(Duration::from_secs(1));
        assert!(!cache.is_fresh(&snapshot, "ws"));
    }

    #[tokio::test]
    async fn get_all_relists_after_ttl() {
        let store = Arc::new(CountingStore::with(vec![fragment("t1")]));
        let clock = Arc::new(ManualClock::new());
        let cache = cache_with(&store, &clock);

        assert_eq!(cache.get_all("ws").await.expect("first").len(), 1);
        clock.advance(Duration::from_secs(119));
        cache.get_all("ws").await.expect("hit");
        assert_eq!(store.lists(), 1);

        clock.advance(Duration::from_secs(1));
        cache.get_all("ws").await.expect("expired");
        assert_eq!(store.lists(), 2);
    }

    #[tokio::test]
    async fn workspace_switch_discards_snapshot() {
        let store = Arc::new(CountingStore::with(vec![fragment("t1")]));
        let clock = Arc::new(ManualClock::new());
        let cache = cache_with(&store, &clock);

        cache.get_all("ws-a").await.expect("a");
        cache.get_all("ws-b").await.expect("b");
        assert_eq!(store.lists(), 2);
        cache.get_all("ws-b").await.expect("b again");
        assert_eq!(store.lists(), 2);
        cache.get_all("ws-a").await.expect("a again");
        assert_eq!(store.lists(), 3);
    }

    #[tokio::test]
    async fn get_one_miss_joins_snapshot_without_renewing_it() {
        let store = Arc::new(CountingStore::with(vec![fragment("t1")]));
        let clock = Arc::new(ManualClock::new());
        let cache = cache_with(&store, &clock);

        cache.get_all("ws").await.expect("list");
        assert_eq!(cache.get_one("ws", "t1").await.expect("hit").id, "t1");
        assert_eq!(store.gets(), 0);

        store.push(fragment("t2"));
        clock.advance(Duration::from_secs(100));
        assert_eq!(cache.get_one("ws", "t2").await.expect("miss").id, "t2");
        assert_eq!(store.gets(), 1);

        cache.get_one("ws", "t2").await.expect("spliced");
        assert_eq!(store.gets(), 1);
        let ids: Vec<String> = cache
            .get_all("ws")
            .await
            .expect("snapshot")
            .into_iter()
            .map(|f| f.id)
            .collect();
        assert_eq!(ids, vec!["t1".to_string(), "t2".to_string()]);
        assert_eq!(store.lists(), 1);

        clock.advance(Duration::from_secs(20));
        cache.get_all("ws").await.expect("expired");
        assert_eq!(store.lists(), 2);
    }

    #[tokio::test]
    async fn get_one_after_invalidate_goes_remote() {
        let store = Arc::new(CountingStore::with(vec![fragment("t1")]));
        let clock = Arc::new(ManualClock::new());
        let cache = cache_with(&store, &clock);

        cache.get_all("ws").await.expect("list");
        cache.get_one("ws", "t1").await.expect("hit");
        assert_eq!(store.gets(), 0);

        cache.invalidate();
        cache.get_one("ws", "t1").await.expect("remote");
        assert_eq!(store.gets(), 1);
        cache.get_one("ws", "t1").await.expect("still remote");
        assert_eq!(store.gets(), 2);
    }

    #[derive(Default)]
    struct CountingStore {
        fragments: Mutex<Vec<Fragment>>,
        lists: AtomicUsize,
        gets: AtomicUsize,
    }

    impl CountingStore {
        fn with(fragments: Vec<Fragment>) -> Self {
            Self {
                fragments: Mutex::new(fragments),
                ..Self::default()
            }
        }

        fn push(&self, fragment: Fragment) {
            self.fragments.lock().push(fragment);
        }

        fn lists(&self) -> usize {
            self.lists.load(Ordering::SeqCst)
        }

        fn gets(&self) -> usize {
            self.gets.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl FragmentStore for CountingStore {
        async fn list(&self, _: &str, _: &ListQuery) -> Result<Vec<Fragment>> {
            self.lists.fetch_add(1, Ordering::SeqCst);
            Ok(self.fragments.lock().clone())
        }
        async fn get(&self, id: &str) -> Result<Fragment> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            self.fragments
                .lock()
                .iter()
                .find(|f| f.id == id)
                .cloned()
                .ok_or_else(|| crate::error::Error::TaskNotFound(id.to_string()))
        }
        async fn create(&self, _: &crate::remote::NewFragment) -> Result<crate::remote::CreatedFragment> {
            Ok(Default::default())
        }
        async fn update(&self, _: &str, _: &crate::remote::FragmentPatch) -> Result<()> {
            Ok(())
        }
        async fn count(&self, _: &str, _: &[String]) -> Result<u64> {
            Ok(0)
        }
        async fn list_workspaces(&self) -> Result<Vec<crate::remote::RemoteWorkspace>> {
            Ok(Vec::new())
        }
        async fn fragment_types(&self, _: &str) -> Result<Vec<crate::remote::FragmentType>> {
            Ok(Vec::new())
        }
    }
}
