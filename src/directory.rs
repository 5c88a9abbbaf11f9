//! Tab directory operations.
//!
//! Everything a user can do to the set of tabs: list the ones visible to
//! them, create, rename, soft-delete, and manage membership. Validation
//! happens before any store write, so a failed operation leaves no partial
//! state behind; the mutations themselves become visible through the next
//! snapshot on the `tabs/` subscription.

use crate::error::{OpError, OpResult};
use crate::migrate;
use crate::paths;
use crate::store::{Snapshot, Store, UpdateMap};
use crate::types::{Deletion, Member, Tab, UserRef, cmp_tabs_for, now_ms};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Filter and order a raw `tabs/` snapshot for one user: member of, not
/// deleted, owned tabs first, then newest first. Pure; also used by the
/// synchronization engine on every snapshot.
pub fn visible_tabs(snapshot: &Snapshot, user_id: &str) -> Vec<Tab> {
    let mut tabs: Vec<Tab> = migrate::decode_tabs(snapshot)
        .into_iter()
        .filter(|tab| tab.is_member(user_id) && tab.is_active())
        .collect();
    tabs.sort_by(cmp_tabs_for(user_id));
    tabs
}

/// The set of tabs, viewed and mutated on behalf of users.
#[derive(Clone)]
pub struct TabDirectory {
    store: Arc<dyn Store>,
}

impl TabDirectory {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Tabs where `user_id` is a member and that are not deleted, owned
    /// first, then newest first.
    pub async fn list_visible_tabs(&self, user_id: &str) -> OpResult<Vec<Tab>> {
        let snapshot = self.store.get(paths::TABS).await?;
        Ok(visible_tabs(&snapshot, user_id))
    }

    /// Create a tab owned by `owner`, optionally inviting one collaborator
    /// by email.
    ///
    /// The collaborator is resolved before anything is written: an unknown
    /// email fails the whole operation and no tab is created.
    pub async fn create_tab(
        &self,
        name: &str,
        icon: Option<&str>,
        owner: &UserRef,
        collaborator_email: Option<&str>,
    ) -> OpResult<Tab> {
        let name = name.trim();
        if name.is_empty() {
            return Err(OpError::missing_field("name"));
        }

        let collaborator = match collaborator_email.map(str::trim).filter(|e| !e.is_empty()) {
            Some(email) => Some(
                self.find_user_by_email(email)
                    .await?
                    .ok_or_else(|| OpError::user_not_found(email))?,
            ),
            None => None,
        };

        let mut members = BTreeMap::new();
        members.insert(owner.id.clone(), Member::owner(&owner.email));
        if let Some(user) = &collaborator {
            members.insert(user.id.clone(), Member::editor(&user.email));
        }

        let id = self.store.push(paths::TABS).await?;
        let tab = Tab {
            id: id.clone(),
            name: name.to_string(),
            icon: icon.map(str::trim).filter(|i| !i.is_empty()).map(String::from),
            owner: owner.clone(),
            members,
            created_at: now_ms(),
            last_updated_by: None,
            last_updated_at: None,
            deletion: Deletion::Active,
        };
        let value = serde_json::to_value(&tab).map_err(OpError::store)?;
        self.store.write(&paths::tab(&id), value).await?;
        info!(tab = %id, owner = %owner.id, "created tab");
        Ok(tab)
    }

    /// Partially update a tab's name and/or icon. `Some("")` for the icon
    /// clears it; a rename to an empty name is rejected.
    pub async fn rename_tab(
        &self,
        tab_id: &str,
        name: Option<&str>,
        icon: Option<&str>,
        acting: &UserRef,
    ) -> OpResult<()> {
        let tab = self.fetch_tab(tab_id).await?;
        let new_name = name.unwrap_or(&tab.name).trim().to_string();
        if new_name.is_empty() {
            return Err(OpError::invalid_value("name", "tab name cannot be empty"));
        }

        let mut updates = UpdateMap::new();
        updates.insert(paths::tab_field(tab_id, "name"), json!(new_name));
        if let Some(icon) = icon {
            let icon = icon.trim();
            let value = if icon.is_empty() {
                Value::Null
            } else {
                json!(icon)
            };
            updates.insert(paths::tab_field(tab_id, "icon"), value);
        }
        stamp_tab(&mut updates, tab_id, acting);
        self.store.patch(updates).await?;
        Ok(())
    }

    /// Invite a user (by email) as an editor of a tab.
    pub async fn add_collaborator(
        &self,
        tab_id: &str,
        email: &str,
        acting: &UserRef,
    ) -> OpResult<()> {
        let email = email.trim();
        if email.is_empty() {
            return Err(OpError::missing_field("email"));
        }
        if email == acting.email {
            return Err(OpError::self_invite());
        }

        let tab = self.fetch_tab(tab_id).await?;
        let user = self
            .find_user_by_email(email)
            .await?
            .ok_or_else(|| OpError::user_not_found(email))?;
        if tab.is_member(&user.id) {
            return Err(OpError::already_member(email));
        }

        let member = serde_json::to_value(Member::editor(email)).map_err(OpError::store)?;
        self.store
            .write(&paths::tab_member(tab_id, &user.id), member)
            .await?;
        info!(tab = %tab_id, user = %user.id, "added collaborator");
        Ok(())
    }

    /// Remove a non-owner member from a tab.
    pub async fn remove_collaborator(&self, tab_id: &str, user_id: &str) -> OpResult<()> {
        let tab = self.fetch_tab(tab_id).await?;
        if tab.is_owner(user_id) {
            return Err(OpError::cannot_remove_owner());
        }
        self.store
            .write(&paths::tab_member(tab_id, user_id), Value::Null)
            .await?;
        info!(tab = %tab_id, user = %user_id, "removed collaborator");
        Ok(())
    }

    /// A non-owner member removes themselves from a tab.
    pub async fn leave_tab(&self, tab_id: &str, user_id: &str) -> OpResult<()> {
        let tab = self.fetch_tab(tab_id).await?;
        if tab.is_owner(user_id) {
            return Err(OpError::owner_cannot_leave());
        }
        self.store
            .write(&paths::tab_member(tab_id, user_id), Value::Null)
            .await?;
        info!(tab = %tab_id, user = %user_id, "left tab");
        Ok(())
    }

    /// Soft-delete a tab. Membership and tasks are left untouched; the tab
    /// simply disappears from every listing.
    pub async fn delete_tab(&self, tab_id: &str, acting: &UserRef) -> OpResult<()> {
        self.fetch_tab(tab_id).await?;
        let mut updates = UpdateMap::new();
        updates.insert(paths::tab_field(tab_id, "deleted"), json!(true));
        updates.insert(
            paths::tab_field(tab_id, "deletedBy"),
            serde_json::to_value(acting).map_err(OpError::store)?,
        );
        updates.insert(paths::tab_field(tab_id, "deletedAt"), json!(now_ms()));
        self.store.patch(updates).await?;
        info!(tab = %tab_id, by = %acting.id, "deleted tab");
        Ok(())
    }

    /// Resolve an email against the identity profiles under `users/`.
    pub async fn find_user_by_email(&self, email: &str) -> OpResult<Option<UserRef>> {
        let users = self.store.get(paths::USERS).await?;
        let Some(Value::Object(users)) = users else {
            return Ok(None);
        };
        Ok(users.iter().find_map(|(id, profile)| {
            (profile.get("email").and_then(Value::as_str) == Some(email))
                .then(|| UserRef::new(id, email))
        }))
    }

    async fn fetch_tab(&self, tab_id: &str) -> OpResult<Tab> {
        let snapshot = self.store.get(&paths::tab(tab_id)).await?;
        snapshot
            .and_then(|value| migrate::decode_tab(tab_id, value))
            .ok_or_else(|| OpError::tab_not_found(tab_id))
    }
}

fn stamp_tab(updates: &mut UpdateMap, tab_id: &str, acting: &UserRef) {
    updates.insert(
        paths::tab_field(tab_id, "lastUpdatedBy"),
        json!({ "id": acting.id, "email": acting.email }),
    );
    updates.insert(paths::tab_field(tab_id, "lastUpdatedAt"), json!(now_ms()));
}
