//! SQLite-backed tree store.
//!
//! Persists the tree as one row per scalar leaf (`nodes(path, value)`);
//! interior nodes are implied by path prefixes, so deleting a subtree never
//! leaves empty parents behind. Multi-path patches run in a single
//! transaction, which is what makes [`Store::patch`] atomic. Subscription
//! fanout is process-local, same as the in-memory backend.

use super::watchers::{WatchGuard, WatcherRegistry};
use super::{
    ErrorHandler, Snapshot, SnapshotHandler, Store, StoreError, StoreResult, UpdateMap,
    check_read_path, check_write_path, sanitize, tree_set,
};
use async_trait::async_trait;
use rusqlite::{Connection, Transaction, params};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations");
}

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    watchers: WatcherRegistry,
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

impl From<refinery::Error> for StoreError {
    fn from(err: refinery::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

impl SqliteStore {
    /// Open or create the store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA busy_timeout=5000;",
        )?;
        Self::from_connection(conn)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> StoreResult<Self> {
        embedded::migrations::runner().run(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            watchers: WatcherRegistry::default(),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T>,
    {
        let conn = self.conn.lock().unwrap();
        f(&conn)
    }

    fn with_txn<F>(&self, f: F) -> StoreResult<()>
    where
        F: FnOnce(&Transaction) -> StoreResult<()>,
    {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        f(&tx)?;
        tx.commit()?;
        Ok(())
    }

    fn read_subtree(conn: &Connection, path: &str) -> StoreResult<Snapshot> {
        let rows: Vec<(String, String)> = if path.is_empty() {
            let mut stmt = conn.prepare("SELECT path, value FROM nodes ORDER BY path")?;
            let mapped = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            mapped.collect::<rusqlite::Result<_>>()?
        } else {
            if let Some(leaf) = Self::read_leaf(conn, path)? {
                return Ok(Some(leaf));
            }
            // '0' is the successor of '/' in ASCII, so [path+'/', path+'0')
            // spans exactly the subtree without the LIKE wildcard pitfalls.
            let lo = format!("{path}/");
            let hi = format!("{path}0");
            let mut stmt = conn.prepare(
                "SELECT path, value FROM nodes WHERE path >= ?1 AND path < ?2 ORDER BY path",
            )?;
            let mapped = stmt.query_map(params![lo, hi], |row| {
                let full: String = row.get(0)?;
                Ok((full[lo.len()..].to_string(), row.get(1)?))
            })?;
            mapped.collect::<rusqlite::Result<_>>()?
        };

        if rows.is_empty() {
            return Ok(None);
        }
        let mut root = Map::new();
        for (rel, text) in rows {
            let value: Value = serde_json::from_str(&text)?;
            let segments: Vec<&str> = rel.split('/').collect();
            tree_set(&mut root, &segments, Some(value));
        }
        Ok(Some(Value::Object(root)))
    }

    fn read_leaf(conn: &Connection, path: &str) -> StoreResult<Option<Value>> {
        let mut stmt = conn.prepare("SELECT value FROM nodes WHERE path = ?1")?;
        let mut rows = stmt.query(params![path])?;
        match rows.next()? {
            Some(row) => {
                let text: String = row.get(0)?;
                Ok(Some(serde_json::from_str(&text)?))
            }
            None => Ok(None),
        }
    }

    /// Replace the node at `path` inside an open transaction.
    fn apply_one(tx: &Transaction, path: &str, value: Option<Value>) -> StoreResult<()> {
        // Clear the node itself, its subtree, and any ancestor leaf the new
        // value would implicitly turn into an interior node.
        tx.execute("DELETE FROM nodes WHERE path = ?1", params![path])?;
        let lo = format!("{path}/");
        let hi = format!("{path}0");
        tx.execute(
            "DELETE FROM nodes WHERE path >= ?1 AND path < ?2",
            params![lo, hi],
        )?;
        let mut ancestor = String::new();
        for segment in path.split('/') {
            if !ancestor.is_empty() {
                tx.execute("DELETE FROM nodes WHERE path = ?1", params![ancestor])?;
            }
            if !ancestor.is_empty() {
                ancestor.push('/');
            }
            ancestor.push_str(segment);
        }

        if let Some(value) = value {
            Self::insert_leaves(tx, path, &value)?;
        }
        Ok(())
    }

    fn insert_leaves(tx: &Transaction, path: &str, value: &Value) -> StoreResult<()> {
        match value {
            Value::Object(map) => {
                for (key, child) in map {
                    Self::insert_leaves(tx, &format!("{path}/{key}"), child)?;
                }
                Ok(())
            }
            leaf => {
                tx.execute(
                    "INSERT OR REPLACE INTO nodes (path, value) VALUES (?1, ?2)",
                    params![path, leaf.to_string()],
                )?;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn get(&self, path: &str) -> StoreResult<Snapshot> {
        check_read_path(path)?;
        self.with_conn(|conn| Self::read_subtree(conn, path))
    }

    async fn write(&self, path: &str, value: Value) -> StoreResult<()> {
        check_write_path(path)?;
        let value = sanitize(value);
        self.with_txn(|tx| Self::apply_one(tx, path, value))?;
        self.watchers.notify(&[path.to_string()], |p| {
            self.with_conn(|conn| Self::read_subtree(conn, p))
        });
        Ok(())
    }

    async fn patch(&self, updates: UpdateMap) -> StoreResult<()> {
        for path in updates.keys() {
            check_write_path(path)?;
        }
        let written: Vec<String> = updates.keys().cloned().collect();
        self.with_txn(|tx| {
            for (path, value) in updates {
                Self::apply_one(tx, &path, sanitize(value))?;
            }
            Ok(())
        })?;
        self.watchers.notify(&written, |p| {
            self.with_conn(|conn| Self::read_subtree(conn, p))
        });
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
        let initial = self.with_conn(|conn| Self::read_subtree(conn, path))?;
        (*handler.lock().unwrap())(initial);
        Ok(guard)
    }
}
