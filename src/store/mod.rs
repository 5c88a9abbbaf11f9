//! Remote store adapter contract.
//!
//! The hosted backend is a path-addressed tree of JSON values offering
//! read-once fetch, continuous snapshot subscriptions, whole-node writes,
//! atomic multi-path updates, and child-key generation. This module defines
//! that contract as the [`Store`] trait plus the value semantics both
//! bundled backends honor:
//!
//! - `null` and empty containers do not exist in the tree; writing them
//!   deletes the node and empty parents are pruned,
//! - a multi-path update replaces each addressed node independently but
//!   applies all of them atomically,
//! - subscribers receive the current snapshot immediately on registration
//!   and a full snapshot after every change under their path (at-least-once,
//!   no incremental diffs).

pub mod memory;
pub mod sqlite;
mod watchers;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use watchers::WatchGuard;

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Full value at a subscribed or fetched path; `None` when the path has no
/// data.
pub type Snapshot = Option<Value>;

/// Callback invoked with each snapshot of a watched path.
pub type SnapshotHandler = Box<dyn FnMut(Snapshot) + Send>;

/// Callback invoked when a subscription hits a backend failure. The
/// subscription itself stays registered.
pub type ErrorHandler = Box<dyn FnMut(StoreError) + Send>;

/// Atomic multi-path update: each path is replaced with its value,
/// `Value::Null` deletes.
pub type UpdateMap = BTreeMap<String, Value>;

/// Errors surfaced by store backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid path: {0:?}")]
    InvalidPath(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("value codec failure: {0}")]
    Codec(#[from] serde_json::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Path-addressed tree store.
///
/// Implementations are shared via `Arc<dyn Store>`; all methods take `&self`.
#[async_trait]
pub trait Store: Send + Sync {
    /// Read the value at `path` once. The empty path addresses the root.
    async fn get(&self, path: &str) -> StoreResult<Snapshot>;

    /// Replace the node at `path`. `Value::Null` (or an empty container)
    /// deletes it.
    async fn write(&self, path: &str, value: Value) -> StoreResult<()>;

    /// Apply a multi-path update atomically.
    async fn patch(&self, updates: UpdateMap) -> StoreResult<()>;

    /// Reserve a fresh child key under `path`. Keys are time-ordered.
    async fn push(&self, path: &str) -> StoreResult<String>;

    /// Watch `path` for changes. The current snapshot is delivered before
    /// this returns; dropping the returned guard unsubscribes.
    fn subscribe(
        &self,
        path: &str,
        on_snapshot: SnapshotHandler,
        on_error: ErrorHandler,
    ) -> StoreResult<WatchGuard>;
}

/// Collapse a value to its stored form.
///
/// Returns `None` for values that do not exist in the tree: `null`, empty
/// objects, empty arrays, and objects whose children all collapse away.
pub(crate) fn sanitize(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Object(map) => {
            let cleaned: Map<String, Value> = map
                .into_iter()
                .filter_map(|(k, v)| sanitize(v).map(|v| (k, v)))
                .collect();
            if cleaned.is_empty() {
                None
            } else {
                Some(Value::Object(cleaned))
            }
        }
        Value::Array(items) if items.is_empty() => None,
        other => Some(other),
    }
}

/// Set or remove a node inside a map tree. Intermediate scalars are replaced
/// by objects on the way down; parents emptied by a removal are pruned on
/// the way back up.
pub(crate) fn tree_set(node: &mut Map<String, Value>, segments: &[&str], value: Option<Value>) {
    let key = segments[0];
    if segments.len() == 1 {
        match value {
            Some(v) => {
                node.insert(key.to_string(), v);
            }
            None => {
                node.remove(key);
            }
        }
        return;
    }

    if value.is_none() && !node.contains_key(key) {
        return;
    }
    let child = node
        .entry(key.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !child.is_object() {
        *child = Value::Object(Map::new());
    }
    let child_map = child.as_object_mut().expect("child forced to object");
    tree_set(child_map, &segments[1..], value);
    if child_map.is_empty() {
        node.remove(key);
    }
}

/// Validate a path for a read/subscribe operation (root allowed).
pub(crate) fn check_read_path(path: &str) -> StoreResult<()> {
    if crate::paths::is_valid_path(path) {
        Ok(())
    } else {
        Err(StoreError::InvalidPath(path.to_string()))
    }
}

/// Validate a path for a mutation (root not allowed).
pub(crate) fn check_write_path(path: &str) -> StoreResult<()> {
    if !path.is_empty() && crate::paths::is_valid_path(path) {
        Ok(())
    } else {
        Err(StoreError::InvalidPath(path.to_string()))
    }
}
