//! "Tasks changed" notification fan-out.
//!
//! Carries no payload; listeners re-read through the cache.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

type Listener = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub struct ChangeBroadcast {
    listeners: Mutex<BTreeMap<SubscriptionId, Listener>>,
    next_id: AtomicU64,
    generation: AtomicU64,
}

impl ChangeBroadcast {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().insert(id, Arc::new(listener));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.listeners.lock().remove(&id).is_some()
    }

    pub fn notify(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        // Listeners run outside the lock so they may (un)subscribe.
        let listeners: Vec<Listener> = self.listeners.lock().values().cloned().collect();
        for listener in listeners {
            listener();
        }
    }

    /// Number of notifications sent so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}
