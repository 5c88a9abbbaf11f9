//! Task operations within one tab.
//!
//! Maintains the ordered, soft-delete-filtered view of a tab's tasks and the
//! mutations behind the task UI: create, edit, status changes, assignment,
//! drag-and-drop reordering, and soft deletion. Reordering rewrites every
//! task's `order` in a single atomic patch so a failure can never leave a
//! half-applied sequence.

use crate::error::{OpError, OpResult};
use crate::migrate;
use crate::paths;
use crate::store::{Snapshot, Store, UpdateMap};
use crate::types::{Deletion, Task, TaskStats, TaskStatus, UserRef, cmp_tasks, now_ms};
use chrono::NaiveDate;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::info;

/// Filter and order a raw `tabs/{id}/tasks/` snapshot: active tasks only,
/// `order` ascending, newest-created first on ties. Pure; also used by the
/// synchronization engine on every snapshot.
pub fn active_tasks(snapshot: &Snapshot) -> Vec<Task> {
    let mut tasks: Vec<Task> = migrate::decode_tasks(snapshot)
        .into_iter()
        .filter(Task::is_active)
        .collect();
    tasks.sort_by(cmp_tasks);
    tasks
}

/// Partial task update. `None` leaves a field unchanged; for the dates the
/// inner `None` clears the stored value.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub text: Option<String>,
    pub start_date: Option<Option<NaiveDate>>,
    pub end_date: Option<Option<NaiveDate>>,
    pub status: Option<TaskStatus>,
}

/// One tab's task collection, viewed and mutated on behalf of users.
#[derive(Clone)]
pub struct TaskCollection {
    store: Arc<dyn Store>,
}

impl TaskCollection {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Non-deleted tasks of a tab in display order.
    pub async fn list_active_tasks(&self, tab_id: &str) -> OpResult<Vec<Task>> {
        let snapshot = self.store.get(&paths::tab_tasks(tab_id)).await?;
        Ok(active_tasks(&snapshot))
    }

    /// Create a task at the end of the tab's list.
    pub async fn create_task(
        &self,
        tab_id: &str,
        text: &str,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
        acting: &UserRef,
    ) -> OpResult<Task> {
        let text = text.trim();
        if text.is_empty() {
            return Err(OpError::missing_field("text"));
        }
        check_date_range(start_date, end_date)?;

        let position = self.list_active_tasks(tab_id).await?.len() as i64;
        let id = self.store.push(&paths::tab_tasks(tab_id)).await?;
        let now = now_ms();
        let task = Task {
            id: id.clone(),
            text: text.to_string(),
            start_date,
            end_date,
            status: TaskStatus::default(),
            assignee: None,
            order: position,
            created_at: now,
            created_by: acting.clone(),
            last_updated_at: now,
            last_updated_by: acting.clone(),
            deletion: Deletion::Active,
        };
        let value = serde_json::to_value(&task).map_err(OpError::store)?;
        self.store.write(&paths::task(tab_id, &id), value).await?;
        info!(tab = %tab_id, task = %id, "created task");
        Ok(task)
    }

    /// Patch a task's text, dates, or status. Always stamps
    /// `lastUpdatedBy`/`lastUpdatedAt`.
    pub async fn update_task(
        &self,
        tab_id: &str,
        task_id: &str,
        patch: TaskPatch,
        acting: &UserRef,
    ) -> OpResult<()> {
        let current = self
            .fetch_task(tab_id, task_id)
            .await?
            .ok_or_else(|| OpError::task_not_found(task_id))?;

        let text = match &patch.text {
            Some(text) => {
                let text = text.trim();
                if text.is_empty() {
                    return Err(OpError::missing_field("text"));
                }
                Some(text.to_string())
            }
            None => None,
        };
        let start = patch.start_date.unwrap_or(current.start_date);
        let end = patch.end_date.unwrap_or(current.end_date);
        check_date_range(start, end)?;

        let mut updates = UpdateMap::new();
        if let Some(text) = text {
            updates.insert(paths::task_field(tab_id, task_id, "text"), json!(text));
        }
        if let Some(date) = patch.start_date {
            updates.insert(
                paths::task_field(tab_id, task_id, "startDate"),
                date_value(date),
            );
        }
        if let Some(date) = patch.end_date {
            updates.insert(
                paths::task_field(tab_id, task_id, "endDate"),
                date_value(date),
            );
        }
        if let Some(status) = patch.status {
            updates.insert(
                paths::task_field(tab_id, task_id, "status"),
                json!(status.as_str()),
            );
        }
        stamp_task(&mut updates, tab_id, task_id, acting);
        self.store.patch(updates).await?;
        Ok(())
    }

    /// Change a task's status. A first-class operation in the UI; at this
    /// layer it is an update like any other.
    pub async fn set_status(
        &self,
        tab_id: &str,
        task_id: &str,
        status: TaskStatus,
        acting: &UserRef,
    ) -> OpResult<()> {
        let mut updates = UpdateMap::new();
        updates.insert(
            paths::task_field(tab_id, task_id, "status"),
            json!(status.as_str()),
        );
        stamp_task(&mut updates, tab_id, task_id, acting);
        self.store.patch(updates).await?;
        Ok(())
    }

    /// Assign a task to a member, or clear the assignment with `None`.
    ///
    /// The caller passes a current member of the tab; this is not re-checked
    /// at write time, so assigning a user who was removed after the picker
    /// was opened is accepted stale-data behavior.
    pub async fn set_assignee(
        &self,
        tab_id: &str,
        task_id: &str,
        member: Option<&UserRef>,
        acting: &UserRef,
    ) -> OpResult<()> {
        let value = match member {
            Some(user) => serde_json::to_value(user).map_err(OpError::store)?,
            None => Value::Null,
        };
        let mut updates = UpdateMap::new();
        updates.insert(paths::task_field(tab_id, task_id, "assignee"), value);
        stamp_task(&mut updates, tab_id, task_id, acting);
        self.store.patch(updates).await?;
        Ok(())
    }

    /// Rewrite every task's `order` to its index in `ordered_ids`, in one
    /// atomic patch. On failure the previous consistent ordering is still in
    /// place and the caller reverts any optimistic local reordering.
    pub async fn reorder_tasks(
        &self,
        tab_id: &str,
        ordered_ids: &[String],
        acting: &UserRef,
    ) -> OpResult<()> {
        let mut updates = UpdateMap::new();
        for (index, task_id) in ordered_ids.iter().enumerate() {
            updates.insert(
                paths::task_field(tab_id, task_id, "order"),
                json!(index as i64),
            );
            stamp_task(&mut updates, tab_id, task_id, acting);
        }
        if updates.is_empty() {
            return Ok(());
        }
        self.store.patch(updates).await?;
        info!(tab = %tab_id, count = ordered_ids.len(), "reordered tasks");
        Ok(())
    }

    /// Soft-delete a task by merging the deletion fields onto the stored
    /// node. Deleting an already-deleted task is a no-op (the original
    /// deletion stamp is kept), and a task that has vanished entirely is
    /// silently accepted.
    pub async fn delete_task(&self, tab_id: &str, task_id: &str, acting: &UserRef) -> OpResult<()> {
        match self.fetch_task(tab_id, task_id).await? {
            None => return Ok(()),
            Some(task) if !task.is_active() => return Ok(()),
            Some(_) => {}
        }

        let mut updates = UpdateMap::new();
        updates.insert(paths::task_field(tab_id, task_id, "deleted"), json!(true));
        updates.insert(
            paths::task_field(tab_id, task_id, "deletedBy"),
            serde_json::to_value(acting).map_err(OpError::store)?,
        );
        updates.insert(
            paths::task_field(tab_id, task_id, "deletedAt"),
            json!(now_ms()),
        );
        self.store.patch(updates).await?;
        info!(tab = %tab_id, task = %task_id, "deleted task");
        Ok(())
    }

    /// Aggregate counts over the tab's active tasks.
    pub async fn stats(&self, tab_id: &str) -> OpResult<TaskStats> {
        Ok(TaskStats::of(&self.list_active_tasks(tab_id).await?))
    }

    async fn fetch_task(&self, tab_id: &str, task_id: &str) -> OpResult<Option<Task>> {
        let snapshot = self.store.get(&paths::task(tab_id, task_id)).await?;
        Ok(snapshot.and_then(|value| migrate::decode_task(task_id, value)))
    }
}

fn check_date_range(start: Option<NaiveDate>, end: Option<NaiveDate>) -> OpResult<()> {
    if let (Some(start), Some(end)) = (start, end)
        && end < start
    {
        return Err(OpError::date_range_inverted());
    }
    Ok(())
}

fn date_value(date: Option<NaiveDate>) -> Value {
    match date {
        Some(date) => json!(date.to_string()),
        None => Value::Null,
    }
}

fn stamp_task(updates: &mut UpdateMap, tab_id: &str, task_id: &str, acting: &UserRef) {
    updates.insert(
        paths::task_field(tab_id, task_id, "lastUpdatedBy"),
        json!({ "id": acting.id, "email": acting.email }),
    );
    updates.insert(
        paths::task_field(tab_id, task_id, "lastUpdatedAt"),
        json!(now_ms()),
    );
}
