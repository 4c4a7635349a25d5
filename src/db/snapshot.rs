//! Immutable snapshots of the database state.
//!
//! Workers never touch the live catalog: each request runs against a
//! snapshot, performs only reads or writes-to-new-files, and records its
//! intended catalog mutations as [`DbChange`]s on its task.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::dataset::{OnDiskDataset, OnDiskIterator, ResultWriter};
use crate::db::{ConfigKey, DatabaseConfig, DatabaseLock, DatabaseName, DbChange, Task, TaskSpec};
use crate::error::{DatasetError, DbError, DbResult, Result};
use crate::indexer::Indexer;
use crate::query::{Query, QueryCounters, QueryPlanSet};
use crate::types::IndexType;

pub struct DatabaseSnapshot {
    db_name: String,
    db_base: PathBuf,
    iterators: BTreeMap<String, OnDiskIterator>,
    config: DatabaseConfig,
    datasets: Vec<Arc<OnDiskDataset>>,
    tasks: BTreeMap<u64, Arc<TaskSpec>>,
}

impl DatabaseSnapshot {
    #[must_use]
    pub fn new(
        db_name: String,
        db_base: PathBuf,
        iterators: BTreeMap<String, OnDiskIterator>,
        config: DatabaseConfig,
        datasets: Vec<Arc<OnDiskDataset>>,
        tasks: BTreeMap<u64, Arc<TaskSpec>>,
    ) -> Self {
        Self {
            db_name,
            db_base,
            iterators,
            config,
            datasets,
            tasks,
        }
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
    pub fn datasets(&self) -> &[Arc<OnDiskDataset>] {
        &self.datasets
    }

    #[must_use]
    pub fn iterators(&self) -> &BTreeMap<String, OnDiskIterator> {
        &self.iterators
    }

    #[must_use]
    pub fn tasks(&self) -> &BTreeMap<u64, Arc<TaskSpec>> {
        &self.tasks
    }

    #[must_use]
    pub fn find_dataset(&self, id: &str) -> Option<&Arc<OnDiskDataset>> {
        self.datasets.iter().find(|dataset| dataset.id() == id)
    }

    /// Reserves a fresh object name of the given kind.
    pub fn allocate_name(&self, kind: &str) -> DbResult<DatabaseName> {
        DatabaseName::allocate(&self.db_base, &self.db_name, kind)
    }

    /// Reads up to `count` results from an iterator; the offset update is
    /// recorded on the task and applied at commit.
    ///
    /// Returns the filenames, the new file offset and the total count.
    pub fn read_iterator(
        &self,
        task: &mut Task,
        iterator_id: &str,
        count: u64,
    ) -> Result<(Vec<String>, u64, u64)> {
        let iterator = self
            .iterators
            .get(iterator_id)
            .ok_or_else(|| DbError::UnknownIterator(iterator_id.to_string()))?;

        let mut copy = iterator.clone();
        let mut out = Vec::new();
        copy.pop(count, &mut out)?;

        task.change(DbChange::UpdateIterator {
            name: copy.name().filename().to_string(),
            byte_offset: copy.byte_offset(),
            file_offset: copy.file_offset(),
        });
        Ok((out, copy.file_offset(), copy.total_files()))
    }

    /// Every file registered in any dataset of this snapshot.
    fn find_all_indexed_files(&self) -> Result<BTreeSet<String>> {
        let mut existing = BTreeSet::new();
        for dataset in &self.datasets {
            dataset.for_each_filename(&mut |fname| {
                existing.insert(fname.to_string());
                Ok(())
            })?;
        }
        Ok(existing)
    }

    /// Expands one path (file or directory) into indexing targets,
    /// skipping anything already present in `existing`.
    fn build_target_list(
        filepath: &str,
        existing: &BTreeSet<String>,
        targets: &mut Vec<String>,
    ) {
        let mut push = |path: &Path| {
            let absolute = std::fs::canonicalize(path)
                .unwrap_or_else(|_| path.to_path_buf())
                .to_string_lossy()
                .into_owned();
            if !existing.contains(&absolute) {
                targets.push(absolute);
            }
        };

        let path = Path::new(filepath);
        if path.is_file() {
            push(path);
            return;
        }
        for entry in walkdir::WalkDir::new(path) {
            match entry {
                Ok(entry) if entry.file_type().is_file() => push(entry.path()),
                Ok(_) => {}
                Err(err) => tracing::warn!("Walk error under {}: {}", filepath, err),
            }
        }
    }

    /// Recursively indexes files under `root_paths`, skipping files that
    /// some dataset already contains. The duplicate check may be very
    /// memory-heavy on large databases.
    pub fn recursive_index_paths(
        &self,
        task: &mut Task,
        types: &[IndexType],
        root_paths: &[String],
    ) -> Result<()> {
        let mut targets = Vec::new();
        {
            let existing = self.find_all_indexed_files()?;
            for filepath in root_paths {
                Self::build_target_list(filepath, &existing, &mut targets);
            }
        }
        self.force_index_files(task, types, &targets)
    }

    /// Recursively indexes files under `root_paths` without the
    /// duplicate check. Faster, but can register a file twice.
    pub fn force_recursive_index_paths(
        &self,
        task: &mut Task,
        types: &[IndexType],
        root_paths: &[String],
    ) -> Result<()> {
        let mut targets = Vec::new();
        for filepath in root_paths {
            Self::build_target_list(filepath, &BTreeSet::new(), &mut targets);
        }
        self.force_index_files(task, types, &targets)
    }

    /// Indexes exactly the given files, skipping already-indexed ones.
    pub fn index_files(
        &self,
        task: &mut Task,
        types: &[IndexType],
        filenames: &[String],
    ) -> Result<()> {
        let existing = self.find_all_indexed_files()?;
        let unique: Vec<String> = filenames
            .iter()
            .filter(|fname| !existing.contains(*fname))
            .cloned()
            .collect();
        self.force_index_files(task, types, &unique)
    }

    /// Indexes exactly the given files, no duplicate check.
    pub fn force_index_files(
        &self,
        task: &mut Task,
        types: &[IndexType],
        targets: &[String],
    ) -> Result<()> {
        if targets.is_empty() {
            return Ok(());
        }

        let mut indexer = Indexer::new(self, types.to_vec());

        task.spec().estimate_work(targets.len() as u64 + 1);
        for target in targets {
            tracing::debug!("Indexing {}", target);
            indexer.index(target)?;
            task.spec().add_progress(1);
        }

        for dataset in indexer.finalize()? {
            task.change(DbChange::Insert {
                dataset: dataset.name().to_string(),
            });
        }
        task.spec().add_progress(1);
        Ok(())
    }

    /// Rebuilds a dataset with the given index types. Emits one change
    /// list: insert the replacements (with inherited taints), then drop
    /// the source.
    pub fn reindex_dataset(
        &self,
        task: &mut Task,
        types: &[IndexType],
        dataset_id: &str,
    ) -> Result<()> {
        let source = self
            .find_dataset(dataset_id)
            .ok_or_else(|| DatasetError::UnknownDataset(dataset_id.to_string()))?;

        let mut targets = Vec::new();
        source.for_each_filename(&mut |fname| {
            targets.push(fname.to_string());
            Ok(())
        })?;

        let mut indexer = Indexer::new(self, types.to_vec());
        task.spec().estimate_work(targets.len() as u64 + 1);
        for target in &targets {
            tracing::debug!("Reindexing {}", target);
            indexer.index(target)?;
            task.spec().add_progress(1);
        }

        for dataset in indexer.finalize()? {
            task.change(DbChange::Insert {
                dataset: dataset.name().to_string(),
            });
            for taint in source.taints() {
                task.change(DbChange::ToggleTaint {
                    dataset: dataset.id(),
                    taint: taint.clone(),
                });
            }
        }
        task.change(DbChange::Drop {
            dataset: source.id(),
        });
        task.spec().add_progress(1);
        Ok(())
    }

    /// Runs a select against every matching dataset, streaming results.
    pub fn execute(
        &self,
        query: &Query,
        taints: &BTreeSet<String>,
        datasets: &BTreeSet<String>,
        task: &Task,
        writer: &mut dyn ResultWriter,
    ) -> Result<QueryCounters> {
        let mut to_query: Vec<&Arc<OnDiskDataset>> = Vec::new();
        if datasets.is_empty() {
            // No datasets selected explicitly: query everything.
            to_query.extend(self.datasets.iter());
        } else {
            for dsname in datasets {
                let dataset = self
                    .find_dataset(dsname)
                    .ok_or_else(|| DatasetError::UnknownDataset(dsname.to_string()))?;
                to_query.push(dataset);
            }
        }

        let mut types_to_query = BTreeSet::new();
        for dataset in &to_query {
            types_to_query.extend(dataset.index_types());
        }

        let plans = QueryPlanSet::compile(
            query,
            &types_to_query,
            self.config.get(ConfigKey::QueryMaxEdge),
            self.config.get(ConfigKey::QueryMaxNgram),
        );

        task.spec().estimate_work(to_query.len() as u64);

        let mut counters = QueryCounters::default();
        for dataset in to_query {
            task.spec().add_progress(1);
            if !dataset.has_all_taints(taints) {
                continue;
            }
            dataset.execute(&plans, writer, &mut counters)?;
        }
        Ok(counters)
    }

    fn is_dataset_locked(&self, dataset_id: &str) -> bool {
        let lock = DatabaseLock::Dataset(dataset_id.to_string());
        self.tasks.values().any(|task| task.has_lock(&lock))
    }

    /// Merge candidates that won't fire on marginal layouts.
    #[must_use]
    pub fn compact_smart_candidates(&self) -> Vec<String> {
        self.find_compact_candidate(true)
    }

    /// Merge candidates for an unconditional compaction; merges whenever
    /// at least two compatible datasets exist.
    #[must_use]
    pub fn compact_full_candidates(&self) -> Vec<String> {
        self.find_compact_candidate(false)
    }

    /// Picks the best set of datasets to merge.
    ///
    /// Rating is "number of datasets minus average file count": prefer
    /// merging many small datasets over few big ones. Locked datasets
    /// are skipped, and the config caps on dataset and file counts are
    /// enforced by shedding the biggest members first.
    fn find_compact_candidate(&self, smart: bool) -> Vec<String> {
        let max_datasets = self.config.get(ConfigKey::MergeMaxDatasets) as usize;
        let max_files = self.config.get(ConfigKey::MergeMaxFiles);

        let mut best_compact: Vec<Arc<OnDiskDataset>> = Vec::new();
        let mut best_value = i64::MIN;

        for set in OnDiskDataset::get_compatible_datasets(&self.datasets) {
            let candidates = if smart {
                OnDiskDataset::get_compact_candidates(&set)
            } else {
                set
            };

            let mut ready: Vec<Arc<OnDiskDataset>> = candidates
                .into_iter()
                .filter(|dataset| !self.is_dataset_locked(&dataset.id()))
                .collect();

            let mut number_of_files: u64 = ready.iter().map(|ds| ds.file_count()).sum();
            ready.sort_by_key(|ds| ds.file_count());
            while ready.len() > max_datasets || number_of_files > max_files {
                match ready.pop() {
                    Some(dropped) => number_of_files -= dropped.file_count(),
                    None => break,
                }
            }

            if ready.len() < 2 {
                continue;
            }

            let avg_files = number_of_files / ready.len() as u64;
            let compact_value = ready.len() as i64 - avg_files as i64;
            if compact_value > best_value {
                best_value = compact_value;
                best_compact = ready;
            }
        }

        if best_compact.is_empty() {
            tracing::debug!("No suitable compact candidate found");
        } else {
            tracing::debug!(
                "Good candidate (cost: {}, datasets: {})",
                best_value,
                best_compact.len()
            );
        }

        best_compact.iter().map(|dataset| dataset.id()).collect()
    }

    /// Merges the datasets this task has locked into one new dataset.
    pub fn compact_locked_datasets(&self, task: &mut Task) -> Result<()> {
        let mut datasets = Vec::new();
        for lock in task.spec().locks() {
            if let DatabaseLock::Dataset(id) = lock {
                let dataset = self
                    .find_dataset(id)
                    .ok_or_else(|| DatasetError::UnknownDataset(id.to_string()))?;
                datasets.push(Arc::clone(dataset));
            }
        }
        self.internal_compact(task, &datasets)
    }

    /// Merges `datasets` and records the drop+insert changes.
    fn internal_compact(&self, task: &mut Task, datasets: &[Arc<OnDiskDataset>]) -> Result<()> {
        if datasets.len() < 2 {
            // There's nothing to compact.
            return Ok(());
        }

        let outname = self.allocate_name("set")?;
        OnDiskDataset::merge(
            &self.db_base,
            outname.filename(),
            datasets,
            Some(task.spec()),
        )?;

        for dataset in datasets {
            task.change(DbChange::Drop {
                dataset: dataset.id(),
            });
        }
        task.change(DbChange::Insert {
            dataset: outname.filename().to_string(),
        });
        Ok(())
    }
}
