//! The database catalog: datasets, iterators, tasks and config.
//!
//! The catalog is mutable and owned by exactly one thread (the
//! coordinator). Everything else sees immutable [`DatabaseSnapshot`]s;
//! mutations travel back as [`DbChange`] lists and are applied here at
//! commit time.

mod config;
mod name;
mod snapshot;
mod task;
mod upgrade;

pub use config::{ConfigKey, DatabaseConfig};
pub use name::DatabaseName;
pub use snapshot::DatabaseSnapshot;
pub use task::{DatabaseLock, DbChange, Task, TaskSpec};
pub use upgrade::{migrate_version, DB_FORMAT_VERSION};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::dataset::{OnDiskDataset, OnDiskIterator};
use crate::error::{DbError, LockError, Result};
use crate::util::{get_milli_timestamp, random_hex_string};

#[derive(Serialize, Deserialize)]
struct DatabaseManifest {
    datasets: Vec<String>,
    #[serde(default)]
    iterators: BTreeMap<String, String>,
    version: String,
    #[serde(default)]
    config: BTreeMap<String, u64>,
}

pub struct Database {
    db_name: String,
    db_base: PathBuf,
    iterators: BTreeMap<String, OnDiskIterator>,
    loaded_datasets: Vec<Arc<OnDiskDataset>>,
    working_datasets: Vec<Arc<OnDiskDataset>>,
    config: DatabaseConfig,
    last_task_id: u64,
    tasks: HashMap<u64, Arc<TaskSpec>>,
}

impl Database {
    /// Creates an empty database manifest. Fails if the file exists.
    pub fn create(path: &Path) -> Result<()> {
        let create = OpenOptions::new().write(true).create_new(true).open(path);
        if let Err(err) = create {
            return Err(if err.kind() == std::io::ErrorKind::AlreadyExists {
                DbError::AlreadyExists {
                    path: path.to_path_buf(),
                }
                .into()
            } else {
                DbError::Io(err).into()
            });
        }

        let empty = Self::empty(path);
        empty.save()?;
        Ok(())
    }

    fn empty(path: &Path) -> Self {
        let db_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let db_base = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        Self {
            db_name,
            db_base,
            iterators: BTreeMap::new(),
            loaded_datasets: Vec::new(),
            working_datasets: Vec::new(),
            config: DatabaseConfig::default(),
            last_task_id: 0,
            tasks: HashMap::new(),
        }
    }

    /// Loads a database and all of its datasets and iterators.
    pub fn load(path: &Path) -> Result<Self> {
        let manifest: DatabaseManifest = serde_json::from_reader(File::open(path)?)?;

        let mut db = Self::empty(path);
        db.config = DatabaseConfig::from_map(manifest.config);

        for dataset_fname in &manifest.datasets {
            db.load_dataset(dataset_fname)?;
        }
        for (id, fname) in &manifest.iterators {
            let name = DatabaseName::new(db.db_base.clone(), "itermeta", id, fname);
            db.load_iterator(name)?;
        }
        Ok(db)
    }

    #[must_use]
    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    #[must_use]
    pub fn db_base(&self) -> &Path {
        &self.db_base
    }

    #[must_use]
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    #[must_use]
    pub fn working_sets(&self) -> &[Arc<OnDiskDataset>] {
        &self.working_datasets
    }

    #[must_use]
    pub fn iterators(&self) -> &BTreeMap<String, OnDiskIterator> {
        &self.iterators
    }

    #[must_use]
    pub fn current_tasks(&self) -> &HashMap<u64, Arc<TaskSpec>> {
        &self.tasks
    }

    /// Persists the manifest (write-temp-then-rename).
    pub fn save(&self) -> Result<()> {
        let manifest = DatabaseManifest {
            datasets: self
                .working_datasets
                .iter()
                .map(|dataset| dataset.name().to_string())
                .collect(),
            iterators: self
                .iterators
                .iter()
                .map(|(id, iterator)| (id.clone(), iterator.name().filename().to_string()))
                .collect(),
            version: DB_FORMAT_VERSION.to_string(),
            config: self.config.raw().clone(),
        };

        let tmp_fname = format!("temp.{}.{}", random_hex_string(8), self.db_name);
        let mut out = File::create(self.db_base.join(&tmp_fname))?;
        serde_json::to_writer_pretty(&mut out, &manifest)?;
        out.write_all(b"\n")?;
        out.sync_data()?;
        std::fs::rename(
            self.db_base.join(&tmp_fname),
            self.db_base.join(&self.db_name),
        )?;
        Ok(())
    }

    fn find_working_dataset(&self, id: &str) -> Option<&Arc<OnDiskDataset>> {
        self.working_datasets
            .iter()
            .find(|dataset| dataset.id() == id)
    }

    pub fn load_dataset(&mut self, fname: &str) -> Result<()> {
        let dataset = Arc::new(OnDiskDataset::open(&self.db_base, fname)?);
        self.loaded_datasets.push(Arc::clone(&dataset));
        self.working_datasets.push(dataset);
        tracing::info!("Loaded new dataset {}", fname);
        Ok(())
    }

    fn drop_dataset(&mut self, id: &str) {
        self.working_datasets.retain(|dataset| {
            if dataset.id() == id {
                tracing::info!("Drop dataset {}", id);
                false
            } else {
                true
            }
        });
    }

    pub fn load_iterator(&mut self, name: DatabaseName) -> Result<()> {
        let id = name.id().to_string();
        let iterator = OnDiskIterator::load(name)?;
        tracing::info!("Loaded new iterator {}", iterator.name().filename());
        self.iterators.insert(id, iterator);
        Ok(())
    }

    fn update_iterator(&mut self, id: &str, byte_offset: u64, file_offset: u64) -> Result<()> {
        let Some(iterator) = self.iterators.get_mut(id) else {
            tracing::warn!("Can't update invalid iterator {}", id);
            return Ok(());
        };
        if file_offset >= iterator.total_files() {
            // Fully consumed; remove it instead of persisting.
            iterator.drop_files()?;
            self.iterators.remove(id);
        } else {
            iterator.update_offset(byte_offset, file_offset);
            iterator.save()?;
        }
        Ok(())
    }

    /// Grants a task id and registers the task, refusing requests whose
    /// locks overlap any live task's locks.
    pub fn allocate_task(
        &mut self,
        request: &str,
        conn_id: &str,
        locks: Vec<DatabaseLock>,
    ) -> std::result::Result<Arc<TaskSpec>, LockError> {
        for lock in &locks {
            let busy = self.tasks.values().any(|task| task.has_lock(lock));
            if busy {
                return Err(LockError::Busy {
                    target: lock.to_string(),
                });
            }
        }

        self.last_task_id += 1;
        let spec = Arc::new(TaskSpec::new(
            self.last_task_id,
            conn_id.to_string(),
            request.to_string(),
            get_milli_timestamp(),
            locks,
        ));
        self.tasks.insert(spec.id(), Arc::clone(&spec));
        Ok(spec)
    }

    pub fn erase_task(&mut self, task_id: u64) {
        self.tasks.remove(&task_id);
    }

    /// Applies a finished task's changes in emission order, persists the
    /// manifest when anything changed, and releases the task (and its
    /// locks).
    pub fn commit_task(&mut self, task: Task) -> Result<()> {
        let spec = task.spec_handle();
        let changes = task.into_changes();

        for change in &changes {
            tracing::info!("Change: {}", change);
            match change {
                DbChange::Insert { dataset } => self.load_dataset(dataset)?,
                DbChange::Drop { dataset } => self.drop_dataset(dataset),
                DbChange::Reload { dataset } => {
                    if let Some(working) = self.find_working_dataset(dataset) {
                        let fname = working.name().to_string();
                        self.drop_dataset(dataset);
                        self.load_dataset(&fname)?;
                    }
                }
                DbChange::ToggleTaint { dataset, taint } => {
                    let Some(working) = self.find_working_dataset(dataset) else {
                        // Suspicious, but maybe a delayed task.
                        tracing::warn!("Can't taint unknown dataset {}", dataset);
                        continue;
                    };
                    let fname = working.name().to_string();
                    working.save_toggled_taint(taint)?;
                    self.drop_dataset(dataset);
                    self.load_dataset(&fname)?;
                }
                DbChange::NewIterator { name } => {
                    let name = DatabaseName::parse(self.db_base.clone(), name)?;
                    self.load_iterator(name)?;
                }
                DbChange::UpdateIterator {
                    name,
                    byte_offset,
                    file_offset,
                } => {
                    let name = DatabaseName::parse(self.db_base.clone(), name)?;
                    self.update_iterator(name.id(), *byte_offset, *file_offset)?;
                }
                DbChange::ConfigChange { key, value } => {
                    self.config.set(*key, *value);
                }
            }
        }

        if !changes.is_empty() {
            self.save()?;
        }
        self.erase_task(spec.id());
        Ok(())
    }

    /// Destroys loaded datasets that are neither in the working set nor
    /// referenced by any live snapshot. Merged-away inputs become
    /// unreferenced once the last snapshot using them is dropped.
    pub fn collect_garbage(&mut self) {
        let working = std::mem::take(&mut self.working_datasets);
        let mut keep = Vec::with_capacity(self.loaded_datasets.len());

        for dataset in self.loaded_datasets.drain(..) {
            let is_working = working.iter().any(|w| Arc::ptr_eq(w, &dataset));
            // The local binding holds the only known count once a dataset
            // is out of the working set and all snapshots released it.
            if !is_working && Arc::strong_count(&dataset) == 1 {
                tracing::info!("Destroying dataset {}", dataset.name());
                dataset.drop_files();
            } else {
                keep.push(dataset);
            }
        }

        self.loaded_datasets = keep;
        self.working_datasets = working;
    }

    /// A frozen view of the current state for one request.
    #[must_use]
    pub fn snapshot(&self) -> DatabaseSnapshot {
        DatabaseSnapshot::new(
            self.db_name.clone(),
            self.db_base.clone(),
            self.iterators.clone(),
            self.config.clone(),
            self.working_datasets.clone(),
            self.tasks.iter().map(|(&id, spec)| (id, Arc::clone(spec))).collect(),
        )
    }
}
