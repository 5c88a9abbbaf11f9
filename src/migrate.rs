//! Normalization of historical data layouts.
//!
//! The stored data went through several shapes before settling on the shared
//! `tabs/` tree with a single `members` map:
//!
//! - `owner` written as a bare user id instead of an `{id, email}` object,
//! - a stored `collaborators` map duplicating (or standing in for) `members`,
//! - `deletedBy` written as a bare email string,
//! - `createdAt` written as a formatted datetime string,
//! - `updatedAt` instead of `lastUpdatedAt`,
//! - whole tabs nested under per-user trees (`users/{uid}/tabs/...`).
//!
//! Every snapshot decode routes through this module, so the rest of the
//! crate only ever sees the canonical shape. [`migrate_user_trees`] moves
//! per-user trees into the shared layout and is exposed as a CLI command.

use crate::error::OpResult;
use crate::paths;
use crate::store::{Snapshot, Store, UpdateMap};
use crate::types::{Tab, Task, TaskStatus};
use serde_json::{Map, Value, json};
use tracing::warn;

/// Decode every tab of a `tabs/` tree snapshot, skipping nodes that stay
/// undecodable after normalization.
pub fn decode_tabs(snapshot: &Snapshot) -> Vec<Tab> {
    decode_map(snapshot, decode_tab)
}

/// Decode every task of a `tabs/{id}/tasks/` snapshot.
pub fn decode_tasks(snapshot: &Snapshot) -> Vec<Task> {
    decode_map(snapshot, decode_task)
}

fn decode_map<T>(snapshot: &Snapshot, decode: impl Fn(&str, Value) -> Option<T>) -> Vec<T> {
    let Some(Value::Object(entries)) = snapshot else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|(id, value)| decode(id, value.clone()))
        .collect()
}

/// Normalize and decode one tab node.
pub fn decode_tab(id: &str, mut value: Value) -> Option<Tab> {
    normalize_tab_value(&mut value);
    match serde_json::from_value::<Tab>(value) {
        Ok(mut tab) => {
            tab.id = id.to_string();
            Some(tab)
        }
        Err(err) => {
            warn!(tab = %id, error = %err, "skipping undecodable tab node");
            None
        }
    }
}

/// Normalize and decode one task node.
pub fn decode_task(id: &str, mut value: Value) -> Option<Task> {
    normalize_task_value(&mut value);
    match serde_json::from_value::<Task>(value) {
        Ok(mut task) => {
            task.id = id.to_string();
            Some(task)
        }
        Err(err) => {
            warn!(task = %id, error = %err, "skipping undecodable task node");
            None
        }
    }
}

/// Rewrite a raw tab node into the canonical shape, in place.
pub fn normalize_tab_value(value: &mut Value) {
    let Some(node) = value.as_object_mut() else {
        return;
    };

    // owner written as a bare uid: recover the email from the membership
    // maps when possible.
    if let Some(owner_id) = node.get("owner").and_then(Value::as_str).map(String::from) {
        let email = ["members", "collaborators"]
            .iter()
            .filter_map(|k| node.get(*k))
            .filter_map(|m| m.get(&owner_id))
            .filter_map(|entry| entry.get("email"))
            .filter_map(Value::as_str)
            .next()
            .unwrap_or_default()
            .to_string();
        node.insert(
            "owner".to_string(),
            json!({ "id": owner_id, "email": email }),
        );
    }

    // Fold any stored collaborators map into members; members entries win.
    if let Some(Value::Object(collaborators)) = node.remove("collaborators") {
        let members = ensure_object(node, "members");
        for (uid, entry) in collaborators {
            members.entry(uid).or_insert(entry);
        }
    }

    // The owner is always a member with role owner.
    if let Some(owner) = node.get("owner").cloned() {
        let (owner_id, owner_email) = (
            owner.get("id").and_then(Value::as_str).unwrap_or_default(),
            owner
                .get("email")
                .and_then(Value::as_str)
                .unwrap_or_default(),
        );
        if !owner_id.is_empty() {
            let members = ensure_object(node, "members");
            members.insert(
                owner_id.to_string(),
                json!({ "role": "owner", "email": owner_email }),
            );
        }
    }

    if node.get("icon").and_then(Value::as_str) == Some("") {
        node.remove("icon");
    }
    if let Some(updated_at) = node.remove("updatedAt") {
        node.entry("lastUpdatedAt".to_string()).or_insert(updated_at);
    }
    normalize_timestamp(node, "createdAt");
    normalize_deleted_by(node);
}

/// Rewrite a raw task node into the canonical shape, in place.
pub fn normalize_task_value(value: &mut Value) {
    let Some(node) = value.as_object_mut() else {
        return;
    };

    for key in ["startDate", "endDate"] {
        let invalid = match node.get(key) {
            Some(Value::String(s)) => s.parse::<chrono::NaiveDate>().is_err(),
            Some(_) => true,
            None => false,
        };
        if invalid {
            node.remove(key);
        }
    }

    // Unknown or blank statuses fall back to the default.
    let bad_status = match node.get("status") {
        Some(Value::String(s)) => TaskStatus::parse(s).is_none(),
        Some(_) => true,
        None => false,
    };
    if bad_status {
        node.remove("status");
    }

    if let Some(order) = node.get("order").and_then(Value::as_f64)
        && node.get("order").and_then(Value::as_i64).is_none()
    {
        node.insert("order".to_string(), json!(order.round() as i64));
    }

    normalize_timestamp(node, "createdAt");
    normalize_timestamp(node, "lastUpdatedAt");
    normalize_deleted_by(node);

    if !node.contains_key("lastUpdatedAt")
        && let Some(created) = node.get("createdAt").cloned()
    {
        node.insert("lastUpdatedAt".to_string(), created);
    }
    if !node.contains_key("lastUpdatedBy")
        && let Some(creator) = node.get("createdBy").cloned()
    {
        node.insert("lastUpdatedBy".to_string(), creator);
    }
}

fn ensure_object<'a>(node: &'a mut Map<String, Value>, key: &str) -> &'a mut Map<String, Value> {
    let entry = node
        .entry(key.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
        *entry = Value::Object(Map::new());
    }
    entry.as_object_mut().expect("entry forced to object")
}

/// Older clients wrote `deletedBy` as a bare email string.
fn normalize_deleted_by(node: &mut Map<String, Value>) {
    if let Some(email) = node.get("deletedBy").and_then(Value::as_str).map(String::from) {
        node.insert(
            "deletedBy".to_string(),
            json!({ "id": "", "email": email }),
        );
    }
}

/// Older clients wrote formatted datetimes instead of epoch milliseconds.
fn normalize_timestamp(node: &mut Map<String, Value>, key: &str) {
    let Some(text) = node.get(key).and_then(Value::as_str).map(String::from) else {
        return;
    };
    node.insert(key.to_string(), json!(parse_legacy_timestamp(&text)));
}

fn parse_legacy_timestamp(text: &str) -> i64 {
    if let Ok(ms) = text.parse::<i64>() {
        return ms;
    }
    // "January 5, 2024 at 02:30 PM"
    for format in ["%B %e, %Y at %I:%M %p", "%B %e, %Y, %I:%M %p"] {
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(text, format) {
            return dt.and_utc().timestamp_millis();
        }
    }
    0
}

/// Move tabs stored under per-user trees (`users/{uid}/tabs/{tabId}`) into
/// the shared `tabs/` tree, normalizing as they go, and clear the legacy
/// subtrees — all in one atomic patch. Tab ids already present in the shared
/// tree are left alone (the per-user copy is simply dropped).
///
/// Returns the number of tabs moved.
pub async fn migrate_user_trees(store: &dyn Store) -> OpResult<usize> {
    let users = store.get(paths::USERS).await?;
    let Some(Value::Object(users)) = users else {
        return Ok(0);
    };

    let shared = store.get(paths::TABS).await?;
    let existing: Vec<String> = match &shared {
        Some(Value::Object(tabs)) => tabs.keys().cloned().collect(),
        _ => Vec::new(),
    };

    let mut updates = UpdateMap::new();
    let mut moved = 0usize;
    for (uid, user_node) in &users {
        let Some(Value::Object(tabs)) = user_node.get("tabs") else {
            continue;
        };
        for (tab_id, tab_value) in tabs {
            let target = paths::tab(tab_id);
            if existing.contains(tab_id) || updates.contains_key(&target) {
                continue;
            }
            let mut value = tab_value.clone();
            if let Some(node) = value.as_object_mut() {
                // The tree's owner is the user it was filed under.
                if !node.contains_key("owner") {
                    let email = user_node
                        .get("email")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    node.insert("owner".to_string(), json!({ "id": uid, "email": email }));
                }
                let tasks = node.remove("tasks");
                normalize_tab_value(&mut value);
                if let Some(Value::Object(tasks)) = tasks {
                    let normalized: Map<String, Value> = tasks
                        .into_iter()
                        .map(|(task_id, mut task_value)| {
                            normalize_task_value(&mut task_value);
                            (task_id, task_value)
                        })
                        .collect();
                    if let Some(node) = value.as_object_mut() {
                        node.insert("tasks".to_string(), Value::Object(normalized));
                    }
                }
            }
            updates.insert(target, value);
            moved += 1;
        }
        updates.insert(format!("{}/tabs", paths::user(uid)), Value::Null);
    }

    if updates.is_empty() {
        return Ok(0);
    }
    store.patch(updates).await?;
    Ok(moved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    #[test]
    fn owner_as_string_is_rebuilt_from_members() {
        let value = json!({
            "name": "Home",
            "owner": "u1",
            "members": { "u1": { "role": "owner", "email": "u1@x.com" } },
            "createdAt": 7
        });
        let tab = decode_tab("t1", value).unwrap();
        assert_eq!(tab.owner.id, "u1");
        assert_eq!(tab.owner.email, "u1@x.com");
    }

    #[test]
    fn collaborators_map_is_folded_into_members() {
        let value = json!({
            "name": "Home",
            "owner": { "id": "u1", "email": "u1@x.com" },
            "collaborators": { "u2": { "role": "editor", "email": "u2@x.com" } },
            "createdAt": 7
        });
        let tab = decode_tab("t1", value).unwrap();
        assert_eq!(tab.members.len(), 2);
        assert_eq!(tab.role_of("u1"), Some(Role::Owner));
        assert_eq!(tab.role_of("u2"), Some(Role::Editor));
    }

    #[test]
    fn owner_membership_is_synthesized_when_missing() {
        let value = json!({
            "name": "Home",
            "owner": { "id": "u1", "email": "u1@x.com" },
            "members": { "u2": { "role": "editor", "email": "u2@x.com" } },
            "createdAt": 7
        });
        let tab = decode_tab("t1", value).unwrap();
        assert_eq!(tab.role_of("u1"), Some(Role::Owner));
    }

    #[test]
    fn string_deleted_by_becomes_a_user_ref() {
        let value = json!({
            "text": "buy milk",
            "createdAt": 1,
            "deleted": true,
            "deletedBy": "u2@x.com",
            "deletedAt": 2
        });
        let task = decode_task("k1", value).unwrap();
        match &task.deletion {
            crate::types::Deletion::Deleted { by, at } => {
                assert_eq!(by.email, "u2@x.com");
                assert_eq!(*at, 2);
            }
            other => panic!("expected deleted, got {other:?}"),
        }
    }

    #[test]
    fn blank_dates_and_unknown_status_fall_away() {
        let value = json!({
            "text": "buy milk",
            "startDate": "",
            "endDate": "2024-02-01",
            "status": "someday",
            "createdAt": 1
        });
        let task = decode_task("k1", value).unwrap();
        assert_eq!(task.start_date, None);
        assert!(task.end_date.is_some());
        assert_eq!(task.status, TaskStatus::NotStarted);
    }

    #[test]
    fn legacy_formatted_created_at_parses_to_epoch_ms() {
        assert_eq!(parse_legacy_timestamp("1700000000000"), 1_700_000_000_000);
        let ms = parse_legacy_timestamp("January 5, 2024 at 02:30 PM");
        assert!(ms > 1_704_000_000_000, "got {ms}");
        assert_eq!(parse_legacy_timestamp("not a date"), 0);
    }

    #[test]
    fn missing_update_stamps_fall_back_to_creation() {
        let value = json!({
            "text": "buy milk",
            "createdAt": 42,
            "createdBy": { "id": "u1", "email": "u1@x.com" }
        });
        let task = decode_task("k1", value).unwrap();
        assert_eq!(task.last_updated_at, 42);
        assert_eq!(task.last_updated_by.id, "u1");
    }

    #[tokio::test]
    async fn user_trees_move_into_the_shared_layout() {
        use crate::store::MemoryStore;

        let store = MemoryStore::new();
        store
            .write(
                "users/u1",
                json!({
                    "email": "u1@x.com",
                    "tabs": {
                        "t9": {
                            "name": "Old",
                            "createdAt": 3,
                            "collaborators": { "u2": { "role": "editor", "email": "u2@x.com" } },
                            "tasks": { "k1": { "text": "carry over", "createdAt": 4 } }
                        }
                    }
                }),
            )
            .await
            .unwrap();

        let moved = migrate_user_trees(&store).await.unwrap();
        assert_eq!(moved, 1);

        let tabs = store.get(paths::TABS).await.unwrap();
        let decoded = decode_tabs(&tabs);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].owner.id, "u1");
        assert!(decoded[0].is_member("u2"));

        let tasks = store.get(&paths::tab_tasks("t9")).await.unwrap();
        assert_eq!(decode_tasks(&tasks).len(), 1);

        // Legacy subtree is gone.
        assert_eq!(store.get("users/u1/tabs").await.unwrap(), None);
        assert!(store.get("users/u1/email").await.unwrap().is_some());
    }
}
