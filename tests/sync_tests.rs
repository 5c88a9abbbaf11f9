//! Integration tests for the synchronization engine.
//!
//! The in-memory store fans snapshots out synchronously, so every store
//! mutation below is fully reconciled by the time the call returns.

use serde_json::{Value, json};
use std::sync::Arc;
use tabsync::collection::TaskCollection;
use tabsync::session::{MemorySession, SessionStore};
use tabsync::store::{MemoryStore, Store};
use tabsync::sync::SyncEngine;
use tabsync::types::UserRef;

fn user(id: &str) -> UserRef {
    UserRef::new(id, format!("{id}@example.com"))
}

async fn seed_tab(store: &MemoryStore, id: &str, owner_id: &str, created: i64, members: &[&str]) {
    let mut member_map = serde_json::Map::new();
    member_map.insert(
        owner_id.to_string(),
        json!({ "role": "owner", "email": format!("{owner_id}@example.com") }),
    );
    for uid in members {
        member_map.insert(
            uid.to_string(),
            json!({ "role": "editor", "email": format!("{uid}@example.com") }),
        );
    }
    store
        .write(
            &format!("tabs/{id}"),
            json!({
                "name": id,
                "owner": { "id": owner_id, "email": format!("{owner_id}@example.com") },
                "createdAt": created,
                "members": member_map
            }),
        )
        .await
        .unwrap();
}

fn engine_for(
    store: &Arc<MemoryStore>,
    session: Arc<MemorySession>,
    user_id: &str,
) -> SyncEngine {
    let as_store: Arc<dyn Store> = Arc::clone(store) as Arc<dyn Store>;
    SyncEngine::new(as_store, session, user(user_id))
}

#[tokio::test]
async fn startup_selects_the_first_visible_tab() {
    let store = Arc::new(MemoryStore::new());
    seed_tab(&store, "old", "u1", 1, &[]).await;
    seed_tab(&store, "new", "u1", 2, &[]).await;

    let engine = engine_for(&store, Arc::new(MemorySession::new()), "u1");
    engine.start().unwrap();

    let view = engine.directory();
    assert_eq!(view.tabs.len(), 2);
    // Sorted newest-first, and the first visible tab becomes active.
    assert_eq!(view.tabs[0].id, "new");
    assert_eq!(view.active.as_ref().unwrap().id, "new");
    assert!(view.error.is_none());
}

#[tokio::test]
async fn startup_restores_the_remembered_tab() {
    let store = Arc::new(MemoryStore::new());
    seed_tab(&store, "old", "u1", 1, &[]).await;
    seed_tab(&store, "new", "u1", 2, &[]).await;

    let session = Arc::new(MemorySession::with_last_tab("old"));
    let engine = engine_for(&store, session, "u1");
    engine.start().unwrap();

    assert_eq!(engine.directory().active.as_ref().unwrap().id, "old");
}

#[tokio::test]
async fn an_empty_store_yields_an_empty_directory_without_errors() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_for(&store, Arc::new(MemorySession::new()), "u1");
    engine.start().unwrap();

    let view = engine.directory();
    assert!(view.tabs.is_empty());
    assert!(view.active.is_none());
    assert!(view.error.is_none());
}

#[tokio::test]
async fn remote_updates_refresh_the_active_tab_in_place() {
    let store = Arc::new(MemoryStore::new());
    seed_tab(&store, "t1", "u1", 1, &[]).await;

    let engine = engine_for(&store, Arc::new(MemorySession::new()), "u1");
    engine.start().unwrap();
    assert_eq!(engine.directory().active.as_ref().unwrap().name, "t1");

    store.write("tabs/t1/name", json!("Renamed")).await.unwrap();

    let view = engine.directory();
    assert_eq!(view.active.as_ref().unwrap().id, "t1");
    assert_eq!(view.active.as_ref().unwrap().name, "Renamed");
}

#[tokio::test]
async fn losing_membership_falls_back_per_the_reselection_policy() {
    let store = Arc::new(MemoryStore::new());
    seed_tab(&store, "shared", "u9", 9, &["u2"]).await;
    seed_tab(&store, "own", "u2", 1, &[]).await;

    let session = Arc::new(MemorySession::new());
    let engine = engine_for(&store, Arc::clone(&session), "u2");
    engine.start().unwrap();

    assert!(engine.select_tab(Some("shared")));
    assert_eq!(session.load_last_tab().as_deref(), Some("shared"));

    // Another client removes u2 from the shared tab; the next snapshot must
    // never leave the engine pinned to the now-invisible tab.
    store
        .write("tabs/shared/members/u2", Value::Null)
        .await
        .unwrap();

    let view = engine.directory();
    let ids: Vec<_> = view.tabs.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec!["own"]);
    assert_eq!(view.active.as_ref().unwrap().id, "own");
}

#[tokio::test]
async fn deleting_the_active_tab_reselects() {
    let store = Arc::new(MemoryStore::new());
    seed_tab(&store, "a", "u1", 2, &[]).await;
    seed_tab(&store, "b", "u1", 1, &[]).await;

    let engine = engine_for(&store, Arc::new(MemorySession::new()), "u1");
    engine.start().unwrap();
    assert_eq!(engine.directory().active.as_ref().unwrap().id, "a");

    store.write("tabs/a/deleted", json!(true)).await.unwrap();

    let view = engine.directory();
    assert_eq!(view.active.as_ref().unwrap().id, "b");
}

#[tokio::test]
async fn task_view_follows_the_active_tab() {
    let store = Arc::new(MemoryStore::new());
    seed_tab(&store, "a", "u1", 2, &[]).await;
    seed_tab(&store, "b", "u1", 1, &[]).await;

    let as_store: Arc<dyn Store> = Arc::clone(&store) as Arc<dyn Store>;
    let collection = TaskCollection::new(as_store);
    let me = user("u1");
    collection.create_task("a", "in a", None, None, &me).await.unwrap();
    collection.create_task("b", "in b", None, None, &me).await.unwrap();

    let engine = engine_for(&store, Arc::new(MemorySession::new()), "u1");
    engine.start().unwrap();

    let tasks = engine.tasks();
    assert_eq!(tasks.tab_id.as_deref(), Some("a"));
    assert_eq!(tasks.tasks[0].text, "in a");

    assert!(engine.select_tab(Some("b")));
    let tasks = engine.tasks();
    assert_eq!(tasks.tab_id.as_deref(), Some("b"));
    assert_eq!(tasks.tasks[0].text, "in b");

    // Live edits to the watched tab show up...
    collection.create_task("b", "more b", None, None, &me).await.unwrap();
    assert_eq!(engine.tasks().tasks.len(), 2);

    // ...while edits to the abandoned tab do not touch the view.
    collection.create_task("a", "more a", None, None, &me).await.unwrap();
    let tasks = engine.tasks();
    assert_eq!(tasks.tab_id.as_deref(), Some("b"));
    assert_eq!(tasks.tasks.len(), 2);
}

#[tokio::test]
async fn deleted_tasks_drop_out_of_the_view() {
    let store = Arc::new(MemoryStore::new());
    seed_tab(&store, "a", "u1", 1, &[]).await;

    let as_store: Arc<dyn Store> = Arc::clone(&store) as Arc<dyn Store>;
    let collection = TaskCollection::new(as_store);
    let me = user("u1");
    let task = collection.create_task("a", "bye", None, None, &me).await.unwrap();

    let engine = engine_for(&store, Arc::new(MemorySession::new()), "u1");
    engine.start().unwrap();
    assert_eq!(engine.tasks().tasks.len(), 1);

    collection.delete_task("a", &task.id, &me).await.unwrap();
    assert!(engine.tasks().tasks.is_empty());
}

#[tokio::test]
async fn selecting_none_clears_the_task_view_and_the_session() {
    let store = Arc::new(MemoryStore::new());
    seed_tab(&store, "a", "u1", 1, &[]).await;

    let session = Arc::new(MemorySession::with_last_tab("a"));
    let engine = engine_for(&store, Arc::clone(&session), "u1");
    engine.start().unwrap();
    assert!(engine.directory().active.is_some());

    assert!(engine.select_tab(None));
    assert!(engine.directory().active.is_none());
    assert!(engine.tasks().tab_id.is_none());
    assert_eq!(session.load_last_tab(), None);
}

#[tokio::test]
async fn selecting_an_invisible_tab_is_refused() {
    let store = Arc::new(MemoryStore::new());
    seed_tab(&store, "a", "u1", 1, &[]).await;

    let engine = engine_for(&store, Arc::new(MemorySession::new()), "u1");
    engine.start().unwrap();

    assert!(!engine.select_tab(Some("stranger")));
    assert_eq!(engine.directory().active.as_ref().unwrap().id, "a");
}

#[tokio::test]
async fn subscription_errors_are_recoverable_state() {
    let store = Arc::new(MemoryStore::new());
    seed_tab(&store, "a", "u1", 1, &[]).await;

    let engine = engine_for(&store, Arc::new(MemorySession::new()), "u1");
    engine.start().unwrap();
    assert!(engine.directory().error.is_none());

    store.emit_error("tabs", "backend unavailable");
    let view = engine.directory();
    assert!(view.error.as_deref().unwrap().contains("backend unavailable"));
    // The previously loaded tabs are still being shown.
    assert_eq!(view.tabs.len(), 1);

    // The next good snapshot clears the error.
    seed_tab(&store, "b", "u1", 2, &[]).await;
    let view = engine.directory();
    assert!(view.error.is_none());
    assert_eq!(view.tabs.len(), 2);
}

#[tokio::test]
async fn stopping_the_engine_stops_reconciliation() {
    let store = Arc::new(MemoryStore::new());
    seed_tab(&store, "a", "u1", 1, &[]).await;

    let engine = engine_for(&store, Arc::new(MemorySession::new()), "u1");
    engine.start().unwrap();
    assert_eq!(engine.directory().tabs.len(), 1);

    engine.stop();
    seed_tab(&store, "b", "u1", 2, &[]).await;
    assert_eq!(engine.directory().tabs.len(), 1, "no updates after stop");
}

#[tokio::test]
async fn the_revision_counter_ticks_on_every_change() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_for(&store, Arc::new(MemorySession::new()), "u1");
    let mut changes = engine.changes();
    engine.start().unwrap();

    let after_start = *changes.borrow_and_update();
    seed_tab(&store, "a", "u1", 1, &[]).await;
    let after_write = *changes.borrow_and_update();
    assert!(after_write > after_start);
}
