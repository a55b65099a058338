//! In-flight operation deduplication.
//!
//! Identical requests issued while one is outstanding, or shortly after it
//! succeeded, share the first request's result instead of repeating the
//! remote write. The entry is installed before the first suspension point,
//! so two callers racing on the same key can never both start the work.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::config::DEFAULT_DEDUP_GRACE;
use crate::error::{Error, Result};
use crate::model::{CreateTaskInput, TaskPriority, TaskStatus};

type SharedOp<T> = Shared<BoxFuture<'static, std::result::Result<T, Arc<Error>>>>;

struct Entry<T: Clone> {
    generation: u64,
    op: SharedOp<T>,
}

struct Inner<T: Clone> {
    entries: Mutex<HashMap<String, Entry<T>>>,
    next_generation: AtomicU64,
    grace: Duration,
}

impl<T: Clone> Inner<T> {
    fn evict(&self, key: &str, generation: u64) {
        let mut entries = self.entries.lock();
        if entries.get(key).map(|entry| entry.generation) == Some(generation) {
            entries.remove(key);
        }
    }
}

pub struct Deduplicator<T: Clone> {
    inner: Arc<Inner<T>>,
}

impl<T> Default for Deduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_GRACE)
    }
}

impl<T> Deduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(grace: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
                grace,
            }),
        }
    }

    /// Run `op` unless an identical one is in flight or recently succeeded.
    ///
    /// Failures are evicted at once so a retry performs the work again.
    pub async fn run<F>(&self, key: String, op: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let shared = {
            let mut entries = self.inner.entries.lock();
            match entries.get(&key) {
                Some(entry) => {
                    debug!(key = %key, "joining in-flight operation");
                    entry.op.clone()
                }
                None => {
                    let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
                    let shared = self.wrap(key.clone(), generation, op);
                    entries.insert(
                        key,
                        Entry {
                            generation,
                            op: shared.clone(),
                        },
                    );
                    shared
                }
            }
        };

        shared.await.map_err(Error::from_shared)
    }

    fn wrap<F>(&self, key: String, generation: u64, op: F) -> SharedOp<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        async move {
            let result = op.await.map_err(Arc::new);
            if result.is_ok() {
                let grace = inner.grace;
                tokio::spawn(async move {
                    tokio::time::sleep(grace).await;
                    inner.evict(&key, generation);
                });
            } else {
                inner.evict(&key, generation);
            }
            result
        }
        .boxed()
        .shared()
    }

    /// Whether `key` currently has a live entry.
    pub fn contains(&self, key: &str) -> bool {
        self.inner.entries.lock().contains_key(key)
    }
}

#[derive(Serialize)]
struct CreateKey<'a> {
    t: &'a str,
    s: TaskStatus,
    p: TaskPriority,
    tags: &'a [String],
    proj: &'a [String],
}

/// Deterministic key for a create request.
pub fn create_task_key(input: &CreateTaskInput) -> String {
    let key = CreateKey {
        t: &input.title,
        s: input.status.unwrap_or_default(),
        p: input.priority.unwrap_or_default(),
        tags: input.tags.as_deref().unwrap_or(&[]),
        proj: input.projects.as_deref().unwrap_or(&[]),
    };
    serde_json::to_string(&key).unwrap_or_else(|_| input.title.clone())
}
