//! Session state shared by both managers and the supervisor.
//!
//! The store holds one fetch tracker per manager, a single batch counter and
//! the restart signal. Managers never touch these files directly; they go
//! through [`SessionStore`] so both agree on one set of files.

use std::path::{Path, PathBuf};

use crate::files;
use crate::item_types::Manager;

pub(crate) const RESTART_SIGNAL_CONTENT: &str = "ready_for_restart";

/// Last dispensed item key and how many times in a row it was dispensed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct FetchState {
    pub(crate) last: Option<String>,
    pub(crate) count: u32,
}

impl FetchState {
    /// Parses the two-line `count\nkey` format. Anything unreadable is an
    /// empty tracker.
    pub(crate) fn parse(content: &str) -> Self {
        let lines: Vec<&str> = content.lines().collect();
        if lines.len() < 2 {
            return Self::default();
        }
        let Ok(count) = lines[0].trim().parse::<u32>() else {
            return Self::default();
        };
        let key = lines[1..].join("\n").trim().to_string();
        Self {
            last: if key.is_empty() { None } else { Some(key) },
            count,
        }
    }

    pub(crate) fn render(&self) -> String {
        format!("{}\n{}\n", self.count, self.last.as_deref().unwrap_or(""))
    }

    /// The tracker after dispensing `key` once more.
    pub(crate) fn advance(&self, key: &str) -> Self {
        let count = if self.last.as_deref() == Some(key) {
            self.count.saturating_add(1)
        } else {
            1
        };
        Self {
            last: Some(key.to_string()),
            count,
        }
    }
}

pub(crate) trait SessionStore {
    fn fetch_state(&self, manager: Manager) -> FetchState;
    fn save_fetch_state(&self, manager: Manager, state: &FetchState) -> Result<(), String>;
    fn remove_fetch_state(&self, manager: Manager) -> Result<(), String>;

    /// Missing or corrupt counters read as zero.
    fn batch_count(&self) -> u64;
    fn save_batch_count(&self, count: u64) -> Result<(), String>;
    fn remove_batch_count(&self) -> Result<(), String>;

    fn restart_signal_raised(&self) -> bool;
    fn raise_restart_signal(&self) -> Result<(), String>;
    /// Returns whether a signal was present.
    fn clear_restart_signal(&self) -> Result<bool, String>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct SessionPaths {
    pub(crate) tasks_state: PathBuf,
    pub(crate) scenarios_state: PathBuf,
    pub(crate) batch_count: PathBuf,
    pub(crate) restart_signal: PathBuf,
}

impl SessionPaths {
    pub(crate) fn in_dir(dir: &Path) -> Self {
        Self {
            tasks_state: dir.join(".manager_state.txt"),
            scenarios_state: dir.join(".scenarios_state.txt"),
            batch_count: dir.join(".batch_count"),
            restart_signal: dir.join(".batch_complete"),
        }
    }

    pub(crate) fn fetch_state(&self, manager: Manager) -> &Path {
        match manager {
            Manager::Tasks => &self.tasks_state,
            Manager::Scenarios => &self.scenarios_state,
        }
    }
}

/// File-backed store. Every write is a whole-file rewrite.
#[derive(Clone, Debug)]
pub(crate) struct FileSessionStore {
    paths: SessionPaths,
}

impl FileSessionStore {
    pub(crate) fn new(paths: SessionPaths) -> Self {
        Self { paths }
    }

    pub(crate) fn paths(&self) -> &SessionPaths {
        &self.paths
    }
}

impl SessionStore for FileSessionStore {
    fn fetch_state(&self, manager: Manager) -> FetchState {
        match files::read_optional(self.paths.fetch_state(manager)) {
            Ok(Some(content)) => FetchState::parse(&content),
            Ok(None) | Err(_) => FetchState::default(),
        }
    }

    fn save_fetch_state(&self, manager: Manager, state: &FetchState) -> Result<(), String> {
        files::write(self.paths.fetch_state(manager), &state.render())
    }

    fn remove_fetch_state(&self, manager: Manager) -> Result<(), String> {
        files::remove_if_exists(self.paths.fetch_state(manager)).map(|_| ())
    }

    fn batch_count(&self) -> u64 {
        match files::read_optional(&self.paths.batch_count) {
            Ok(Some(content)) => content.trim().parse().unwrap_or(0),
            Ok(None) | Err(_) => 0,
        }
    }

    fn save_batch_count(&self, count: u64) -> Result<(), String> {
        files::write(&self.paths.batch_count, &count.to_string())
    }

    fn remove_batch_count(&self) -> Result<(), String> {
        files::remove_if_exists(&self.paths.batch_count).map(|_| ())
    }

    fn restart_signal_raised(&self) -> bool {
        self.paths.restart_signal.exists()
    }

    fn raise_restart_signal(&self) -> Result<(), String> {
        files::write(&self.paths.restart_signal, RESTART_SIGNAL_CONTENT)
    }

    fn clear_restart_signal(&self) -> Result<bool, String> {
        files::remove_if_exists(&self.paths.restart_signal)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BatchCheck {
    Continue,
    /// The limit was reached: the signal is raised and the counter is zeroed.
    RestartRequested { limit: i64, count: u64 },
}

/// `limit <= 0` disables the batch limit.
pub(crate) fn check_batch_limit(store: &dyn SessionStore, limit: i64) -> Result<BatchCheck, String> {
    if limit <= 0 {
        return Ok(BatchCheck::Continue);
    }
    let count = store.batch_count();
    if count < limit.unsigned_abs() {
        return Ok(BatchCheck::Continue);
    }
    store.raise_restart_signal()?;
    store.save_batch_count(0)?;
    Ok(BatchCheck::RestartRequested { limit, count })
}

/// Returns the new counter value.
pub(crate) fn increment_batch(store: &dyn SessionStore) -> Result<u64, String> {
    let next = store.batch_count().saturating_add(1);
    store.save_batch_count(next)?;
    Ok(next)
}

/// Clears the manager's tracker, the shared counter and the restart signal.
pub(crate) fn reset_session(store: &dyn SessionStore, manager: Manager) -> Result<(), String> {
    store.remove_fetch_state(manager)?;
    store.remove_batch_count()?;
    store.clear_restart_signal()?;
    Ok(())
}

#[cfg(test)]
pub(crate) use memory::MemorySessionStore;

#[cfg(test)]
mod memory {
    use std::cell::RefCell;
    use std::collections::HashMap;

    use super::{FetchState, SessionStore};
    use crate::item_types::Manager;

    /// In-memory store for exercising manager logic without touching disk.
    #[derive(Debug, Default)]
    pub(crate) struct MemorySessionStore {
        fetch: RefCell<HashMap<Manager, FetchState>>,
        batch: RefCell<Option<u64>>,
        signal: RefCell<bool>,
    }

    impl SessionStore for MemorySessionStore {
        fn fetch_state(&self, manager: Manager) -> FetchState {
            self.fetch
                .borrow()
                .get(&manager)
                .cloned()
                .unwrap_or_default()
        }

        fn save_fetch_state(&self, manager: Manager, state: &FetchState) -> Result<(), String> {
            self.fetch.borrow_mut().insert(manager, state.clone());
            Ok(())
        }

        fn remove_fetch_state(&self, manager: Manager) -> Result<(), String> {
            self.fetch.borrow_mut().remove(&manager);
            Ok(())
        }

        fn batch_count(&self) -> u64 {
            self.batch.borrow().unwrap_or(0)
        }

        fn save_batch_count(&self, count: u64) -> Result<(), String> {
            *self.batch.borrow_mut() = Some(count);
            Ok(())
        }

        fn remove_batch_count(&self) -> Result<(), String> {
            *self.batch.borrow_mut() = None;
            Ok(())
        }

        fn restart_signal_raised(&self) -> bool {
            *self.signal.borrow()
        }

        fn raise_restart_signal(&self) -> Result<(), String> {
            *self.signal.borrow_mut() = true;
            Ok(())
        }

        fn clear_restart_signal(&self) -> Result<bool, String> {
            Ok(std::mem::replace(&mut *self.signal.borrow_mut(), false))
        }
    }
}
