//! Tasks: units of server-side work with locks, progress counters and a
//! deferred change list.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::db::ConfigKey;

/// An exclusive claim on a mutable database object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLock {
    Dataset(String),
    Iterator(String),
}

impl DatabaseLock {
    #[must_use]
    pub fn target(&self) -> &str {
        match self {
            DatabaseLock::Dataset(id) | DatabaseLock::Iterator(id) => id,
        }
    }
}

impl fmt::Display for DatabaseLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseLock::Dataset(id) => write!(f, "dataset {id}"),
            DatabaseLock::Iterator(id) => write!(f, "iterator {id}"),
        }
    }
}

/// One deferred mutation of the database catalog. Changes are collected
/// on the worker and applied in order by the coordinator at commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbChange {
    /// Load a freshly written dataset (by manifest filename).
    Insert { dataset: String },
    /// Remove a dataset (by id) from the working set.
    Drop { dataset: String },
    /// Drop and re-load a dataset (by id) after an on-disk update.
    Reload { dataset: String },
    /// Flip one taint of a dataset (by id) and persist its manifest.
    ToggleTaint { dataset: String, taint: String },
    /// Load a freshly written iterator (by metadata filename).
    NewIterator { name: String },
    /// Persist new offsets of an iterator (by id); reads past the end
    /// drop the iterator instead.
    UpdateIterator {
        name: String,
        byte_offset: u64,
        file_offset: u64,
    },
    /// Set one config key and persist the manifest.
    ConfigChange { key: ConfigKey, value: u64 },
}

impl fmt::Display for DbChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbChange::Insert { dataset } => write!(f, "INSERT {dataset}"),
            DbChange::Drop { dataset } => write!(f, "DROP {dataset}"),
            DbChange::Reload { dataset } => write!(f, "RELOAD {dataset}"),
            DbChange::ToggleTaint { dataset, taint } => {
                write!(f, "TOGGLE_TAINT {dataset} ({taint})")
            }
            DbChange::NewIterator { name } => write!(f, "NEW_ITERATOR {name}"),
            DbChange::UpdateIterator {
                name,
                byte_offset,
                file_offset,
            } => write!(f, "UPDATE_ITERATOR {name} ({byte_offset}:{file_offset})"),
            DbChange::ConfigChange { key, value } => {
                write!(f, "CONFIG_CHANGE {} ({value})", key.name())
            }
        }
    }
}

/// Shared task state. Multiple threads may read it concurrently; the
/// specification is immutable and the progress counters are atomic.
#[derive(Debug)]
pub struct TaskSpec {
    id: u64,
    conn_id: String,
    request: String,
    epoch_ms: u64,
    work_estimated: AtomicU64,
    work_done: AtomicU64,
    locks: Vec<DatabaseLock>,
}

impl TaskSpec {
    #[must_use]
    pub fn new(
        id: u64,
        conn_id: String,
        request: String,
        epoch_ms: u64,
        locks: Vec<DatabaseLock>,
    ) -> Self {
        Self {
            id,
            conn_id,
            request,
            epoch_ms,
            work_estimated: AtomicU64::new(0),
            work_done: AtomicU64::new(0),
            locks,
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn conn_id(&self) -> &str {
        &self.conn_id
    }

    #[must_use]
    pub fn request(&self) -> &str {
        &self.request
    }

    #[must_use]
    pub fn epoch_ms(&self) -> u64 {
        self.epoch_ms
    }

    #[must_use]
    pub fn work_estimated(&self) -> u64 {
        self.work_estimated.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn work_done(&self) -> u64 {
        self.work_done.load(Ordering::Relaxed)
    }

    pub fn estimate_work(&self, estimation: u64) {
        self.work_estimated.store(estimation, Ordering::Relaxed);
    }

    pub fn add_progress(&self, done_units: u64) {
        self.work_done.fetch_add(done_units, Ordering::Relaxed);
    }

    #[must_use]
    pub fn locks(&self) -> &[DatabaseLock] {
        &self.locks
    }

    #[must_use]
    pub fn has_lock(&self, lock: &DatabaseLock) -> bool {
        self.locks.contains(lock)
    }
}

/// Worker-local task handle: the shared spec plus this request's pending
/// change list. Never shared between threads.
pub struct Task {
    spec: Arc<TaskSpec>,
    changes: Vec<DbChange>,
}

impl Task {
    #[must_use]
    pub fn new(spec: Arc<TaskSpec>) -> Self {
        Self {
            spec,
            changes: Vec::new(),
        }
    }

    #[must_use]
    pub fn spec(&self) -> &TaskSpec {
        &self.spec
    }

    #[must_use]
    pub fn spec_handle(&self) -> Arc<TaskSpec> {
        Arc::clone(&self.spec)
    }

    pub fn change(&mut self, change: DbChange) {
        self.changes.push(change);
    }

    #[must_use]
    pub fn changes(&self) -> &[DbChange] {
        &self.changes
    }

    #[must_use]
    pub fn into_changes(self) -> Vec<DbChange> {
        self.changes
    }
}
