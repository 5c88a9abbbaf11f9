//! Core types for the tab/task synchronization model.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Get the current timestamp in milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Identity reference as stored on owner/creator/assignee fields.
///
/// The id is opaque and issued by the identity provider; the email is
/// denormalized alongside it so views never need a second lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: String,
    pub email: String,
}

impl UserRef {
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
        }
    }
}

/// Membership role within a tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Editor,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Editor => "editor",
        }
    }
}

/// One entry of a tab's membership map, keyed by user id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub role: Role,
    pub email: String,
}

impl Member {
    pub fn owner(email: impl Into<String>) -> Self {
        Self {
            role: Role::Owner,
            email: email.into(),
        }
    }

    pub fn editor(email: impl Into<String>) -> Self {
        Self {
            role: Role::Editor,
            email: email.into(),
        }
    }
}

/// Soft-delete state.
///
/// A deleted record always carries who deleted it and when; the flat
/// `deleted`/`deletedBy`/`deletedAt` wire fields exist only at the
/// serialization boundary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "DeletionWire", into = "DeletionWire")]
pub enum Deletion {
    #[default]
    Active,
    Deleted {
        by: UserRef,
        at: i64,
    },
}

impl Deletion {
    pub fn deleted(by: UserRef, at: i64) -> Self {
        Deletion::Deleted { by, at }
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self, Deletion::Deleted { .. })
    }
}

/// Flat wire representation of [`Deletion`], flattened into the parent node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct DeletionWire {
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    deleted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    deleted_by: Option<UserRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    deleted_at: Option<i64>,
}

impl From<DeletionWire> for Deletion {
    fn from(wire: DeletionWire) -> Self {
        if wire.deleted {
            Deletion::Deleted {
                by: wire.deleted_by.unwrap_or_default(),
                at: wire.deleted_at.unwrap_or_default(),
            }
        } else {
            Deletion::Active
        }
    }
}

impl From<Deletion> for DeletionWire {
    fn from(deletion: Deletion) -> Self {
        match deletion {
            Deletion::Active => DeletionWire::default(),
            Deletion::Deleted { by, at } => DeletionWire {
                deleted: true,
                deleted_by: Some(by),
                deleted_at: Some(at),
            },
        }
    }
}

/// A named task category shared by one or more users.
///
/// The id is the node's key under `tabs/` and is not stored inside the node.
/// Membership lives in a single `members` map; the non-owner view is derived
/// via [`Tab::collaborators`], never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tab {
    #[serde(skip)]
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    pub owner: UserRef,
    #[serde(default)]
    pub members: BTreeMap<String, Member>,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated_by: Option<UserRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated_at: Option<i64>,
    #[serde(flatten)]
    pub deletion: Deletion,
}

impl Tab {
    pub fn is_member(&self, user_id: &str) -> bool {
        self.members.contains_key(user_id)
    }

    pub fn is_owner(&self, user_id: &str) -> bool {
        self.owner.id == user_id
    }

    pub fn role_of(&self, user_id: &str) -> Option<Role> {
        self.members.get(user_id).map(|m| m.role)
    }

    /// Members minus the owner. Derived, never stored.
    pub fn collaborators(&self) -> impl Iterator<Item = (&String, &Member)> {
        self.members.iter().filter(|(id, _)| **id != self.owner.id)
    }

    pub fn is_active(&self) -> bool {
        !self.deletion.is_deleted()
    }
}

/// Ordering of the tab directory for a given user: owned tabs first, then
/// newest creation first.
pub fn cmp_tabs_for(user_id: &str) -> impl Fn(&Tab, &Tab) -> Ordering + '_ {
    move |a, b| {
        let a_owned = a.is_owner(user_id);
        let b_owned = b.is_owner(user_id);
        b_owned
            .cmp(&a_owned)
            .then_with(|| b.created_at.cmp(&a.created_at))
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    #[default]
    NotStarted,
    InProgress,
    Waiting,
    OnHold,
    NeedsReview,
    Completed,
    Canceled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 7] = [
        TaskStatus::NotStarted,
        TaskStatus::InProgress,
        TaskStatus::Waiting,
        TaskStatus::OnHold,
        TaskStatus::NeedsReview,
        TaskStatus::Completed,
        TaskStatus::Canceled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::NotStarted => "not-started",
            TaskStatus::InProgress => "in-progress",
            TaskStatus::Waiting => "waiting",
            TaskStatus::OnHold => "on-hold",
            TaskStatus::NeedsReview => "needs-review",
            TaskStatus::Completed => "completed",
            TaskStatus::Canceled => "canceled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|st| st.as_str() == s)
    }
}

/// A single task inside a tab.
///
/// The id is the node's key under `tabs/{tab}/tasks/` and is not stored
/// inside the node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(skip)]
    pub id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<UserRef>,
    /// Manual position within the tab. Not required to be contiguous.
    #[serde(default)]
    pub order: i64,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub created_by: UserRef,
    #[serde(default)]
    pub last_updated_at: i64,
    #[serde(default)]
    pub last_updated_by: UserRef,
    #[serde(flatten)]
    pub deletion: Deletion,
}

impl Task {
    pub fn is_active(&self) -> bool {
        !self.deletion.is_deleted()
    }
}

/// Display ordering of tasks: `order` ascending, ties broken by newest
/// creation first.
pub fn cmp_tasks(a: &Task, b: &Task) -> Ordering {
    a.order
        .cmp(&b.order)
        .then_with(|| b.created_at.cmp(&a.created_at))
}

/// Aggregate counts over a tab's active tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    pub total: usize,
    pub completed: usize,
    pub in_progress: usize,
    pub not_started: usize,
    /// Percentage of active tasks that are completed, rounded.
    pub completion_rate_pct: u32,
}

impl TaskStats {
    pub fn of(tasks: &[Task]) -> Self {
        let total = tasks.len();
        let count = |status: TaskStatus| tasks.iter().filter(|t| t.status == status).count();
        let completed = count(TaskStatus::Completed);
        let completion_rate_pct = if total > 0 {
            (completed as f64 / total as f64 * 100.0).round() as u32
        } else {
            0
        };
        Self {
            total,
            completed,
            in_progress: count(TaskStatus::InProgress),
            not_started: count(TaskStatus::NotStarted),
            completion_rate_pct,
        }
    }
}
