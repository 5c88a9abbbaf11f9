//! Contract tests for the store backends.
//!
//! Both backends must expose identical semantics, so each check runs against
//! the in-memory store and the SQLite store through `Arc<dyn Store>`.

use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use tabsync::store::{MemoryStore, Snapshot, SqliteStore, Store, UpdateMap};

fn memory() -> Arc<dyn Store> {
    Arc::new(MemoryStore::new())
}

fn sqlite() -> Arc<dyn Store> {
    Arc::new(SqliteStore::open_in_memory().expect("failed to open in-memory sqlite store"))
}

async fn check_missing_path_reads_none(store: Arc<dyn Store>) {
    assert_eq!(store.get("tabs/absent").await.unwrap(), None);
    assert_eq!(store.get("").await.unwrap(), None);
}

async fn check_write_and_read_back(store: Arc<dyn Store>) {
    store
        .write("tabs/t1", json!({ "name": "Home", "createdAt": 4 }))
        .await
        .unwrap();

    assert_eq!(store.get("tabs/t1/name").await.unwrap(), Some(json!("Home")));
    let root = store.get("").await.unwrap().unwrap();
    assert_eq!(root["tabs"]["t1"]["createdAt"], json!(4));
}

async fn check_null_and_empty_values_do_not_exist(store: Arc<dyn Store>) {
    store.write("tabs/t1", json!({ "name": "Home" })).await.unwrap();
    store.write("tabs/t1", Value::Null).await.unwrap();
    assert_eq!(store.get("tabs/t1").await.unwrap(), None);

    store
        .write("tabs/t2", json!({ "icon": null, "empty": {} }))
        .await
        .unwrap();
    assert_eq!(store.get("tabs/t2").await.unwrap(), None);
}

async fn check_patch_is_applied_across_paths(store: Arc<dyn Store>) {
    store
        .write("tabs/t1/tasks/a", json!({ "text": "one", "order": 0 }))
        .await
        .unwrap();
    store
        .write("tabs/t1/tasks/b", json!({ "text": "two", "order": 1 }))
        .await
        .unwrap();

    let mut updates = UpdateMap::new();
    updates.insert("tabs/t1/tasks/a/order".to_string(), json!(1));
    updates.insert("tabs/t1/tasks/b/order".to_string(), json!(0));
    updates.insert("tabs/t1/tasks/b/status".to_string(), json!("completed"));
    store.patch(updates).await.unwrap();

    let tasks = store.get("tabs/t1/tasks").await.unwrap().unwrap();
    assert_eq!(tasks["a"]["order"], json!(1));
    assert_eq!(tasks["b"]["order"], json!(0));
    assert_eq!(tasks["b"]["status"], json!("completed"));
}

async fn check_invalid_paths_are_rejected_before_any_effect(store: Arc<dyn Store>) {
    let mut updates = UpdateMap::new();
    updates.insert("tabs/t1/name".to_string(), json!("ok"));
    updates.insert("tabs/bad.key".to_string(), json!("nope"));
    assert!(store.patch(updates).await.is_err());

    // The valid half of the rejected patch must not have been applied.
    assert_eq!(store.get("tabs/t1/name").await.unwrap(), None);
}

async fn check_push_keys_are_unique(store: Arc<dyn Store>) {
    let a = store.push("tabs").await.unwrap();
    let b = store.push("tabs").await.unwrap();
    assert_ne!(a, b);
    assert!(!a.contains('/'));
}

async fn check_subscribe_delivers_initial_and_updates(store: Arc<dyn Store>) {
    store.write("tabs/t1/name", json!("before")).await.unwrap();

    let seen: Arc<Mutex<Vec<Snapshot>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let guard = store
        .subscribe(
            "tabs/t1",
            Box::new(move |snapshot| sink.lock().unwrap().push(snapshot)),
            Box::new(|_| {}),
        )
        .unwrap();

    assert_eq!(seen.lock().unwrap().len(), 1, "initial snapshot expected");

    store.write("tabs/t1/name", json!("after")).await.unwrap();
    {
        let snapshots = seen.lock().unwrap();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[1].as_ref().unwrap()["name"], json!("after"));
    }

    // Unrelated paths do not fan out here.
    store.write("users/u1/email", json!("u1@x.com")).await.unwrap();
    assert_eq!(seen.lock().unwrap().len(), 2);

    // Deleting the node delivers a null snapshot.
    store.write("tabs/t1", Value::Null).await.unwrap();
    assert_eq!(seen.lock().unwrap().last().unwrap(), &None);

    drop(guard);
    store.write("tabs/t1/name", json!("again")).await.unwrap();
    assert_eq!(seen.lock().unwrap().len(), 3, "dropped guard must not fire");
}

macro_rules! contract_tests {
    ($backend:ident) => {
        mod $backend {
            use super::*;

            #[tokio::test]
            async fn missing_path_reads_none() {
                check_missing_path_reads_none($backend()).await;
            }

            #[tokio::test]
            async fn write_and_read_back() {
                check_write_and_read_back($backend()).await;
            }

            #[tokio::test]
            async fn null_and_empty_values_do_not_exist() {
                check_null_and_empty_values_do_not_exist($backend()).await;
            }

            #[tokio::test]
            async fn patch_is_applied_across_paths() {
                check_patch_is_applied_across_paths($backend()).await;
            }

            #[tokio::test]
            async fn invalid_paths_are_rejected_before_any_effect() {
                check_invalid_paths_are_rejected_before_any_effect($backend()).await;
            }

            #[tokio::test]
            async fn push_keys_are_unique() {
                check_push_keys_are_unique($backend()).await;
            }

            #[tokio::test]
            async fn subscribe_delivers_initial_and_updates() {
                check_subscribe_delivers_initial_and_updates($backend()).await;
            }
        }
    };
}

contract_tests!(memory);
contract_tests!(sqlite);
