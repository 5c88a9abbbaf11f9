//! Tree-path layout of the remote store.
//!
//! All data this crate owns lives under two top-level trees:
//!
//! - `tabs/{tabId}` — one node per tab, with `members/` and `tasks/` children
//! - `users/{userId}` — identity-provider profiles (email lookup only)
//!
//! Paths are `/`-separated strings; keys follow the hosted store's rules
//! (no `. $ # [ ] /` or control characters). Pure string manipulation,
//! no I/O.

/// Characters a node key must not contain.
const FORBIDDEN: &[char] = &['.', '$', '#', '[', ']', '/'];

/// Check whether a single key is legal as a path segment.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty() && !key.chars().any(|c| FORBIDDEN.contains(&c) || c.is_control())
}

/// Check whether a full path consists solely of legal segments.
/// The empty path addresses the tree root and is valid for reads.
pub fn is_valid_path(path: &str) -> bool {
    path.is_empty() || path.split('/').all(is_valid_key)
}

/// Does a change at `written` affect a subscription rooted at `watched`?
///
/// True when either path is a prefix of the other on a segment boundary.
pub fn affects(watched: &str, written: &str) -> bool {
    fn is_prefix(prefix: &str, path: &str) -> bool {
        prefix.is_empty()
            || path == prefix
            || (path.starts_with(prefix) && path.as_bytes().get(prefix.len()) == Some(&b'/'))
    }
    is_prefix(watched, written) || is_prefix(written, watched)
}

pub const TABS: &str = "tabs";
pub const USERS: &str = "users";

pub fn tab(tab_id: &str) -> String {
    format!("tabs/{tab_id}")
}

pub fn tab_field(tab_id: &str, field: &str) -> String {
    format!("tabs/{tab_id}/{field}")
}

pub fn tab_member(tab_id: &str, user_id: &str) -> String {
    format!("tabs/{tab_id}/members/{user_id}")
}

pub fn tab_tasks(tab_id: &str) -> String {
    format!("tabs/{tab_id}/tasks")
}

pub fn task(tab_id: &str, task_id: &str) -> String {
    format!("tabs/{tab_id}/tasks/{task_id}")
}

pub fn task_field(tab_id: &str, task_id: &str, field: &str) -> String {
    format!("tabs/{tab_id}/tasks/{task_id}/{field}")
}

pub fn user(user_id: &str) -> String {
    format!("users/{user_id}")
}
