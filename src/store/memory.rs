//! In-memory tree store.
//!
//! The reference [`Store`] backend: a JSON tree behind a mutex with
//! synchronous subscription fanout. Mutations are visible to every watcher
//! before the call returns, which makes tests deterministic; it also serves
//! embedded use where persistence is not needed.

use super::watchers::{WatchGuard, WatcherRegistry};
use super::{
    ErrorHandler, Snapshot, SnapshotHandler, Store, StoreResult, UpdateMap, check_read_path,
    check_write_path, sanitize, tree_set,
};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryStore {
    tree: Mutex<Map<String, Value>>,
    watchers: WatcherRegistry,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot_at(&self, path: &str) -> Snapshot {
        let tree = self.tree.lock().unwrap();
        if path.is_empty() {
            if tree.is_empty() {
                return None;
            }
            return Some(Value::Object(tree.clone()));
        }
        let mut node: &Value = &Value::Null;
        let mut current: Option<&Map<String, Value>> = Some(&tree);
        for segment in path.split('/') {
            let map = current?;
            node = map.get(segment)?;
            current = node.as_object();
        }
        Some(node.clone())
    }

    fn apply(&self, path: &str, value: Option<Value>) {
        let mut tree = self.tree.lock().unwrap();
        let segments: Vec<&str> = path.split('/').collect();
        tree_set(&mut tree, &segments, value);
    }

    /// Simulate a backend failure on every subscription covering `path`.
    ///
    /// Delivered through the watchers' error handlers; the subscriptions
    /// stay registered and keep receiving snapshots afterwards.
    pub fn emit_error(&self, path: &str, message: &str) {
        self.watchers.fail(path, message);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, path: &str) -> StoreResult<Snapshot> {
        check_read_path(path)?;
        Ok(self.snapshot_at(path))
    }

    async fn write(&self, path: &str, value: Value) -> StoreResult<()> {
        check_write_path(path)?;
        self.apply(path, sanitize(value));
        self.watchers
            .notify(&[path.to_string()], |p| Ok(self.snapshot_at(p)));
        Ok(())
    }

    async fn patch(&self, updates: UpdateMap) -> StoreResult<()> {
        for path in updates.keys() {
            check_write_path(path)?;
        }
        let written: Vec<String> = updates.keys().cloned().collect();
        for (path, value) in updates {
            self.apply(&path, sanitize(value));
        }
        self.watchers.notify(&written, |p| Ok(self.snapshot_at(p)));
        Ok(())
    }

    async fn push(&self, path: &str) -> StoreResult<String> {
        check_write_path(path)?;
        Ok(Uuid::now_v7().simple().to_string())
    }

    fn subscribe(
        &self,
        path: &str,
        on_snapshot: SnapshotHandler,
        on_error: ErrorHandler,
    ) -> StoreResult<WatchGuard> {
        check_read_path(path)?;
        let (guard, handler) = self.watchers.register(path, on_snapshot, on_error);
        let initial = self.snapshot_at(path);
        (*handler.lock().unwrap())(initial);
        Ok(guard)
    }
}
