//! Synchronization engine.
//!
//! Bridges the store's push-based snapshot feed into view state the
//! presentation layer can render. Two subscriptions exist at most: one on
//! the whole `tabs/` tree for the signed-in user's directory, and one on the
//! active tab's `tasks/` subtree. Every snapshot fully replaces the cached
//! view (filter and sort are re-derived from the raw value, never patched
//! incrementally), then the active-tab reselection policy runs so the UI is
//! never left pointing at a tab that is no longer visible.
//!
//! Views are published through `ArcSwap` and a `watch` channel ticks a
//! revision counter on every change, so consumers either read the current
//! view lock-free or await the next tick. Subscriptions are torn down by
//! dropping their guards — when the active tab changes, when the engine is
//! stopped, and when it is dropped — which is what keeps watchers from
//! leaking or duplicating.

use crate::collection;
use crate::directory;
use crate::error::OpResult;
use crate::paths;
use crate::session::SessionStore;
use crate::store::{Snapshot, Store, StoreError, WatchGuard};
use crate::types::{Tab, Task, UserRef};
use arc_swap::ArcSwap;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Published state of the tab directory.
#[derive(Debug, Clone, Default)]
pub struct DirectoryView {
    /// Visible tabs in display order.
    pub tabs: Vec<Tab>,
    /// The tab the UI should be showing, if any.
    pub active: Option<Tab>,
    /// Recoverable load error; cleared by the next good snapshot.
    pub error: Option<String>,
}

/// Published state of the active tab's task list.
#[derive(Debug, Clone, Default)]
pub struct TaskView {
    /// The tab these tasks belong to.
    pub tab_id: Option<String>,
    /// Active tasks in display order.
    pub tasks: Vec<Task>,
    /// Recoverable load error; cleared by the next good snapshot.
    pub error: Option<String>,
}

/// Active-tab reselection policy, run after every directory snapshot:
/// keep the current tab if it is still visible, else fall back to the
/// remembered last selection, else to the first visible tab, else none.
pub fn reselect<'a>(
    visible: &'a [Tab],
    current: Option<&str>,
    remembered: Option<&str>,
) -> Option<&'a Tab> {
    current
        .and_then(|id| visible.iter().find(|t| t.id == id))
        .or_else(|| remembered.and_then(|id| visible.iter().find(|t| t.id == id)))
        .or_else(|| visible.first())
}

struct EngineInner {
    user: UserRef,
    store: Arc<dyn Store>,
    session: Arc<dyn SessionStore>,
    directory: ArcSwap<DirectoryView>,
    tasks: ArcSwap<TaskView>,
    task_watch: Mutex<Option<(String, WatchGuard)>>,
    revision: watch::Sender<u64>,
}

impl EngineInner {
    fn bump(&self) {
        self.revision.send_modify(|r| *r += 1);
    }

    fn apply_directory_snapshot(self: &Arc<Self>, snapshot: Snapshot) {
        let visible = directory::visible_tabs(&snapshot, &self.user.id);
        let current = self.directory.load();
        let current_id = current.active.as_ref().map(|t| t.id.clone());
        let remembered = self.session.load_last_tab();
        let active = reselect(&visible, current_id.as_deref(), remembered.as_deref()).cloned();

        self.sync_task_watch(active.as_ref().map(|t| t.id.as_str()));
        self.directory.store(Arc::new(DirectoryView {
            tabs: visible,
            active,
            error: None,
        }));
        self.bump();
    }

    fn apply_directory_error(&self, err: StoreError) {
        warn!(error = %err, "tab directory subscription error");
        let view = self.directory.load();
        self.directory.store(Arc::new(DirectoryView {
            tabs: view.tabs.clone(),
            active: view.active.clone(),
            error: Some(err.to_string()),
        }));
        self.bump();
    }

    fn apply_tasks_snapshot(&self, tab_id: &str, snapshot: Snapshot) {
        {
            // Ignore stragglers from a watcher that has already been
            // replaced by a newer active tab.
            let slot = self.task_watch.lock().unwrap();
            if let Some((current, _)) = slot.as_ref()
                && current.as_str() != tab_id
            {
                return;
            }
        }
        self.tasks.store(Arc::new(TaskView {
            tab_id: Some(tab_id.to_string()),
            tasks: collection::active_tasks(&snapshot),
            error: None,
        }));
        self.bump();
    }

    fn apply_tasks_error(&self, tab_id: &str, err: StoreError) {
        warn!(tab = %tab_id, error = %err, "task subscription error");
        let view = self.tasks.load();
        self.tasks.store(Arc::new(TaskView {
            tab_id: view.tab_id.clone(),
            tasks: view.tasks.clone(),
            error: Some(err.to_string()),
        }));
        self.bump();
    }

    /// Point the task subscription at `target`, tearing down the previous
    /// watcher first. No-op when the target is already watched.
    fn sync_task_watch(self: &Arc<Self>, target: Option<&str>) {
        {
            let mut slot = self.task_watch.lock().unwrap();
            if slot.as_ref().map(|(id, _)| id.as_str()) == target {
                return;
            }
            // Drop the old guard before subscribing anew so watchers never
            // stack up.
            *slot = None;
        }

        let Some(tab_id) = target else {
            self.tasks.store(Arc::new(TaskView::default()));
            self.bump();
            return;
        };

        debug!(tab = %tab_id, "switching task subscription");
        let on_snapshot = {
            let inner = Arc::clone(self);
            let tab_id = tab_id.to_string();
            Box::new(move |snapshot| inner.apply_tasks_snapshot(&tab_id, snapshot))
        };
        let on_error = {
            let inner = Arc::clone(self);
            let tab_id = tab_id.to_string();
            Box::new(move |err| inner.apply_tasks_error(&tab_id, err))
        };
        match self
            .store
            .subscribe(&paths::tab_tasks(tab_id), on_snapshot, on_error)
        {
            Ok(guard) => {
                *self.task_watch.lock().unwrap() = Some((tab_id.to_string(), guard));
            }
            Err(err) => {
                warn!(tab = %tab_id, error = %err, "failed to subscribe to tasks");
                self.tasks.store(Arc::new(TaskView {
                    tab_id: Some(tab_id.to_string()),
                    tasks: Vec::new(),
                    error: Some(err.to_string()),
                }));
                self.bump();
            }
        }
    }
}

/// The synchronization engine for one signed-in user.
pub struct SyncEngine {
    inner: Arc<EngineInner>,
    directory_watch: Mutex<Option<WatchGuard>>,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn Store>, session: Arc<dyn SessionStore>, user: UserRef) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(EngineInner {
                user,
                store,
                session,
                directory: ArcSwap::from_pointee(DirectoryView::default()),
                tasks: ArcSwap::from_pointee(TaskView::default()),
                task_watch: Mutex::new(None),
                revision,
            }),
            directory_watch: Mutex::new(None),
        }
    }

    /// Subscribe to the tab directory. The current snapshot is reconciled
    /// before this returns; restarting an already-started engine replaces
    /// the subscription.
    pub fn start(&self) -> OpResult<()> {
        let on_snapshot = {
            let inner = Arc::clone(&self.inner);
            Box::new(move |snapshot| inner.apply_directory_snapshot(snapshot))
        };
        let on_error = {
            let inner = Arc::clone(&self.inner);
            Box::new(move |err| inner.apply_directory_error(err))
        };
        let guard = self.inner.store.subscribe(paths::TABS, on_snapshot, on_error)?;
        *self.directory_watch.lock().unwrap() = Some(guard);
        Ok(())
    }

    /// Tear down both subscriptions. Views keep their last state.
    pub fn stop(&self) {
        *self.directory_watch.lock().unwrap() = None;
        *self.inner.task_watch.lock().unwrap() = None;
    }

    /// Current directory view.
    pub fn directory(&self) -> Arc<DirectoryView> {
        self.inner.directory.load_full()
    }

    /// Current task view for the active tab.
    pub fn tasks(&self) -> Arc<TaskView> {
        self.inner.tasks.load_full()
    }

    /// A receiver that observes the revision counter; it ticks on every
    /// published view change.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    /// Explicit tab selection by the user. Persists the choice for the next
    /// session and repoints the task subscription. Returns `false` when the
    /// requested tab is not in the visible set.
    pub fn select_tab(&self, tab_id: Option<&str>) -> bool {
        let inner = &self.inner;
        let view = inner.directory.load_full();
        let active = match tab_id {
            Some(id) => match view.tabs.iter().find(|t| t.id == id) {
                Some(tab) => Some(tab.clone()),
                None => return false,
            },
            None => None,
        };

        inner.session.save_last_tab(tab_id);
        inner.sync_task_watch(active.as_ref().map(|t| t.id.as_str()));
        inner.directory.store(Arc::new(DirectoryView {
            tabs: view.tabs.clone(),
            active,
            error: view.error.clone(),
        }));
        inner.bump();
        true
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Deletion, Member, UserRef};
    use std::collections::BTreeMap;

    fn tab(id: &str) -> Tab {
        let owner = UserRef::new("u1", "u1@x.com");
        let mut members = BTreeMap::new();
        members.insert("u1".to_string(), Member::owner("u1@x.com"));
        Tab {
            id: id.to_string(),
            name: id.to_string(),
            icon: None,
            owner,
            members,
            created_at: 0,
            last_updated_by: None,
            last_updated_at: None,
            deletion: Deletion::Active,
        }
    }

    #[test]
    fn reselect_keeps_the_current_tab_when_still_visible() {
        let visible = vec![tab("a"), tab("b")];
        let picked = reselect(&visible, Some("b"), Some("a")).unwrap();
        assert_eq!(picked.id, "b");
    }

    #[test]
    fn reselect_falls_back_to_the_remembered_tab() {
        let visible = vec![tab("a"), tab("b")];
        let picked = reselect(&visible, Some("gone"), Some("b")).unwrap();
        assert_eq!(picked.id, "b");
    }

    #[test]
    fn reselect_falls_back_to_the_first_visible_tab() {
        let visible = vec![tab("a"), tab("b")];
        let picked = reselect(&visible, Some("gone"), Some("also-gone")).unwrap();
        assert_eq!(picked.id, "a");
        let picked = reselect(&visible, None, None).unwrap();
        assert_eq!(picked.id, "a");
    }

    #[test]
    fn reselect_yields_none_when_nothing_is_visible() {
        assert!(reselect(&[], Some("x"), Some("y")).is_none());
    }
}
