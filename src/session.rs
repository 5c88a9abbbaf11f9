//! Client-session continuity state.
//!
//! A single remembered value — the last selected tab id — read at startup
//! and written on every explicit tab selection. It feeds the engine's
//! active-tab reselection and is deliberately not part of the data model.
//! Persistence failures only cost continuity, so they are logged and
//! swallowed.

use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::debug;

pub trait SessionStore: Send + Sync {
    fn load_last_tab(&self) -> Option<String>;
    fn save_last_tab(&self, tab_id: Option<&str>);
}

/// File-backed session state: one id in one file.
pub struct FileSession {
    path: PathBuf,
}

impl FileSession {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SessionStore for FileSession {
    fn load_last_tab(&self) -> Option<String> {
        let text = fs::read_to_string(&self.path).ok()?;
        let id = text.trim();
        if id.is_empty() {
            None
        } else {
            Some(id.to_string())
        }
    }

    fn save_last_tab(&self, tab_id: Option<&str>) {
        let result = match tab_id {
            Some(id) => fs::write(&self.path, id),
            None => match fs::remove_file(&self.path) {
                Err(err) if err.kind() != std::io::ErrorKind::NotFound => Err(err),
                _ => Ok(()),
            },
        };
        if let Err(err) = result {
            debug!(path = %self.path.display(), error = %err, "failed to persist session state");
        }
    }
}

/// In-memory session state (tests, embedded use).
#[derive(Default)]
pub struct MemorySession {
    last_tab: Mutex<Option<String>>,
}

impl MemorySession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_last_tab(tab_id: &str) -> Self {
        Self {
            last_tab: Mutex::new(Some(tab_id.to_string())),
        }
    }
}

impl SessionStore for MemorySession {
    fn load_last_tab(&self) -> Option<String> {
        self.last_tab.lock().unwrap().clone()
    }

    fn save_last_tab(&self, tab_id: Option<&str>) {
        *self.last_tab.lock().unwrap() = tab_id.map(String::from);
    }
}
