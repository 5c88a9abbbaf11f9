//! Subscriber bookkeeping shared by store backends.
//!
//! A registry owns the set of live watchers; backends call [`notify`] after
//! committing a mutation. Handlers are never invoked while the registry lock
//! is held, so a handler may re-enter the store (including registering a new
//! subscription) without deadlocking.
//!
//! [`notify`]: WatcherRegistry::notify

use super::{ErrorHandler, Snapshot, SnapshotHandler, StoreError, StoreResult};
use crate::paths;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

struct Watcher {
    id: u64,
    path: String,
    on_snapshot: Arc<Mutex<SnapshotHandler>>,
    on_error: Arc<Mutex<ErrorHandler>>,
}

/// Registry of live subscriptions for one store instance.
#[derive(Default)]
pub(crate) struct WatcherRegistry {
    watchers: Arc<Mutex<Vec<Watcher>>>,
    next_id: AtomicU64,
}

impl WatcherRegistry {
    /// Register a watcher and return its guard plus the snapshot handler,
    /// so the backend can deliver the initial snapshot outside the lock.
    pub fn register(
        &self,
        path: &str,
        on_snapshot: SnapshotHandler,
        on_error: ErrorHandler,
    ) -> (WatchGuard, Arc<Mutex<SnapshotHandler>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let on_snapshot = Arc::new(Mutex::new(on_snapshot));
        let watcher = Watcher {
            id,
            path: path.to_string(),
            on_snapshot: Arc::clone(&on_snapshot),
            on_error: Arc::new(Mutex::new(on_error)),
        };
        self.watchers.lock().unwrap().push(watcher);
        let guard = WatchGuard {
            registry: Arc::downgrade(&self.watchers),
            id,
        };
        (guard, on_snapshot)
    }

    /// Fan a mutation out to every watcher whose subtree intersects one of
    /// the written paths. `lookup` recomputes the full snapshot for a watched
    /// path; a lookup failure is routed to that watcher's error handler.
    pub fn notify(
        &self,
        written: &[String],
        lookup: impl Fn(&str) -> StoreResult<Snapshot>,
    ) -> usize {
        let affected: Vec<(String, Arc<Mutex<SnapshotHandler>>, Arc<Mutex<ErrorHandler>>)> = {
            let watchers = self.watchers.lock().unwrap();
            watchers
                .iter()
                .filter(|w| written.iter().any(|p| paths::affects(&w.path, p)))
                .map(|w| {
                    (
                        w.path.clone(),
                        Arc::clone(&w.on_snapshot),
                        Arc::clone(&w.on_error),
                    )
                })
                .collect()
        };

        let count = affected.len();
        for (path, on_snapshot, on_error) in affected {
            match lookup(&path) {
                Ok(snapshot) => {
                    let mut handler = on_snapshot.lock().unwrap();
                    (*handler)(snapshot);
                }
                Err(err) => {
                    let mut handler = on_error.lock().unwrap();
                    (*handler)(err);
                }
            }
        }
        count
    }

    /// Deliver a backend failure to every watcher covering `path`.
    pub fn fail(&self, path: &str, message: &str) {
        let affected: Vec<Arc<Mutex<ErrorHandler>>> = {
            let watchers = self.watchers.lock().unwrap();
            watchers
                .iter()
                .filter(|w| paths::affects(&w.path, path))
                .map(|w| Arc::clone(&w.on_error))
                .collect()
        };
        for on_error in affected {
            let mut handler = on_error.lock().unwrap();
            (*handler)(StoreError::Unavailable(message.to_string()));
        }
    }
}

/// Active subscription handle. Dropping it unsubscribes.
#[must_use = "the subscription ends as soon as the guard is dropped"]
pub struct WatchGuard {
    registry: Weak<Mutex<Vec<Watcher>>>,
    id: u64,
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        if let Some(watchers) = self.registry.upgrade() {
            watchers.lock().unwrap().retain(|w| w.id != self.id);
        }
    }
}
