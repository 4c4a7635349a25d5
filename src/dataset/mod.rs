//! Datasets: immutable groups of per-type indexes + a filename list +
//! taints, described by a JSON manifest.

mod builder;
mod files;
mod iterator;

pub use builder::DatasetBuilder;
pub use files::OnDiskFileIndex;
pub use iterator::OnDiskIterator;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::db::{DatabaseName, TaskSpec};
use crate::error::{DatasetError, DatasetResult};
use crate::index::{IndexMergeHelper, OnDiskIndex};
use crate::query::{QueryCounters, QueryPlanSet, QueryResult};
use crate::types::{FileId, IndexType, NUM_TRIGRAMS};
use crate::util::random_hex_string;

/// The JSON manifest of one dataset.
#[derive(Serialize, Deserialize)]
struct DatasetManifest {
    indices: Vec<String>,
    files: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    filename_cache: Option<String>,
    taints: BTreeSet<String>,
}

/// Writes a dataset manifest (write-temp-then-rename).
pub fn store_dataset(
    db_base: &Path,
    fname: &str,
    index_names: &[String],
    files_fname: &str,
    filename_cache: Option<&str>,
    taints: &BTreeSet<String>,
) -> DatasetResult<()> {
    let manifest = DatasetManifest {
        indices: index_names.to_vec(),
        files: files_fname.to_string(),
        filename_cache: filename_cache.map(str::to_string),
        taints: taints.clone(),
    };

    let tmp_fname = format!("temp.{}.{}", random_hex_string(8), fname);
    let mut out = File::create(db_base.join(&tmp_fname))?;
    serde_json::to_writer_pretty(&mut out, &manifest)?;
    out.write_all(b"\n")?;
    out.sync_data()?;
    std::fs::rename(db_base.join(&tmp_fname), db_base.join(fname))?;
    Ok(())
}

/// Pushes select results somewhere: memory for plain selects, a backing
/// file for `select into iterator`.
pub trait ResultWriter {
    fn push(&mut self, filename: &str) -> DatasetResult<()>;
}

#[derive(Default)]
pub struct InMemoryResultWriter {
    out: Vec<String>,
}

impl InMemoryResultWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<String> {
        self.out
    }
}

impl ResultWriter for InMemoryResultWriter {
    fn push(&mut self, filename: &str) -> DatasetResult<()> {
        self.out.push(filename.to_string());
        Ok(())
    }
}

pub struct FileResultWriter {
    out: BufWriter<File>,
    file_count: u64,
}

impl FileResultWriter {
    pub fn create(path: &Path) -> DatasetResult<Self> {
        Ok(Self {
            out: BufWriter::new(File::create(path)?),
            file_count: 0,
        })
    }

    #[must_use]
    pub fn file_count(&self) -> u64 {
        self.file_count
    }

    pub fn flush(&mut self) -> DatasetResult<()> {
        self.out.flush()?;
        Ok(())
    }
}

impl ResultWriter for FileResultWriter {
    fn push(&mut self, filename: &str) -> DatasetResult<()> {
        writeln!(self.out, "{filename}")?;
        self.file_count += 1;
        Ok(())
    }
}

/// One loaded dataset. Immutable once written; taint updates go through a
/// manifest rewrite and reload.
pub struct OnDiskDataset {
    name: String,
    db_base: PathBuf,
    files_index: OnDiskFileIndex,
    indices: Vec<OnDiskIndex>,
    taints: BTreeSet<String>,
}

impl OnDiskDataset {
    /// Loads a dataset from its manifest, generating the filename cache
    /// (and persisting its name into the manifest) when missing.
    pub fn open(db_base: &Path, fname: &str) -> DatasetResult<Self> {
        let manifest: DatasetManifest =
            serde_json::from_reader(File::open(db_base.join(fname))?)?;

        let mut indices = Vec::with_capacity(manifest.indices.len());
        for index_fname in &manifest.indices {
            indices.push(OnDiskIndex::open(&db_base.join(index_fname))?);
        }

        let needs_save = manifest.filename_cache.is_none();
        let cache_fname = manifest
            .filename_cache
            .unwrap_or_else(|| format!("namecache.{}", manifest.files));

        let files_index = OnDiskFileIndex::open(db_base, &manifest.files, &cache_fname)?;

        let dataset = Self {
            name: fname.to_string(),
            db_base: db_base.to_path_buf(),
            files_index,
            indices,
            taints: manifest.taints,
        };
        if needs_save {
            dataset.save()?;
        }
        Ok(dataset)
    }

    /// Rewrites the manifest with the current taints and cache name.
    pub fn save(&self) -> DatasetResult<()> {
        let index_names: Vec<String> = self
            .indices
            .iter()
            .map(|index| index.fname().to_string())
            .collect();
        store_dataset(
            &self.db_base,
            &self.name,
            &index_names,
            self.files_index.files_fname(),
            Some(self.files_index.cache_fname()),
            &self.taints,
        )?;
        tracing::info!("SAVE: {}", self.name);
        Ok(())
    }

    /// Persists the manifest with `taint` flipped. Loaded datasets are
    /// immutable, so the caller is expected to reload this dataset to
    /// observe the change.
    pub fn save_toggled_taint(&self, taint: &str) -> DatasetResult<()> {
        let mut taints = self.taints.clone();
        if !taints.remove(taint) {
            taints.insert(taint.to_string());
        }
        let index_names: Vec<String> = self
            .indices
            .iter()
            .map(|index| index.fname().to_string())
            .collect();
        store_dataset(
            &self.db_base,
            &self.name,
            &index_names,
            self.files_index.files_fname(),
            Some(self.files_index.cache_fname()),
            &taints,
        )?;
        tracing::info!("SAVE: {}", self.name);
        Ok(())
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The dataset's id (the middle component of its filename).
    #[must_use]
    pub fn id(&self) -> String {
        DatabaseName::parse(self.db_base.clone(), &self.name)
            .map(|name| name.id().to_string())
            .unwrap_or_else(|_| self.name.clone())
    }

    #[must_use]
    pub fn base(&self) -> &Path {
        &self.db_base
    }

    #[must_use]
    pub fn taints(&self) -> &BTreeSet<String> {
        &self.taints
    }

    #[must_use]
    pub fn has_all_taints(&self, taints: &BTreeSet<String>) -> bool {
        taints.iter().all(|taint| self.taints.contains(taint))
    }

    #[must_use]
    pub fn indexes(&self) -> &[OnDiskIndex] {
        &self.indices
    }

    #[must_use]
    pub fn index_types(&self) -> BTreeSet<IndexType> {
        self.indices.iter().map(OnDiskIndex::index_type).collect()
    }

    #[must_use]
    pub fn file_count(&self) -> u64 {
        self.files_index.file_count()
    }

    #[must_use]
    pub fn files_fname(&self) -> &str {
        self.files_index.files_fname()
    }

    #[must_use]
    pub fn cache_fname(&self) -> &str {
        self.files_index.cache_fname()
    }

    pub fn file_name(&self, fid: FileId) -> DatasetResult<String> {
        self.files_index.file_name(fid)
    }

    pub fn for_each_filename(
        &self,
        cb: &mut dyn FnMut(&str) -> DatasetResult<()>,
    ) -> DatasetResult<()> {
        self.files_index.for_each_filename(cb)
    }

    fn index_with_type(&self, ntype: IndexType) -> DatasetResult<&OnDiskIndex> {
        self.indices
            .iter()
            .find(|index| index.index_type() == ntype)
            .ok_or(DatasetError::MissingIndexType(ntype))
    }

    /// Total on-disk size of the dataset's index files.
    pub fn on_disk_size(&self) -> DatasetResult<u64> {
        let mut total = 0;
        for index in &self.indices {
            total += index.real_size()?;
        }
        Ok(total)
    }

    /// Intersects the per-index results of the compiled query.
    pub fn query(
        &self,
        plans: &QueryPlanSet,
        counters: &mut QueryCounters,
    ) -> DatasetResult<QueryResult> {
        let mut result = QueryResult::everything();
        for index in &self.indices {
            let Some(plan) = plans.get(index.index_type()) else {
                continue;
            };
            let mut partial = index.query(plan, counters)?;
            result.do_and(&mut partial, &mut counters.ands);
        }
        Ok(result)
    }

    /// Runs the query and streams the matching filenames.
    ///
    /// An *everything* result means the index cannot prune this dataset
    /// at all; every filename is streamed in that case.
    pub fn execute(
        &self,
        plans: &QueryPlanSet,
        writer: &mut dyn ResultWriter,
        counters: &mut QueryCounters,
    ) -> DatasetResult<()> {
        let result = self.query(plans, counters)?;
        if result.is_everything() {
            self.files_index
                .for_each_filename(&mut |fname| writer.push(fname))
        } else {
            for fid in result.into_run().into_sorted_vec() {
                writer.push(&self.file_name(fid)?)?;
            }
            Ok(())
        }
    }

    /// Merges `datasets` into a new dataset called `outname`.
    ///
    /// Preconditions: at least two inputs, equal taint sets, identical
    /// index type sets. FileIds are renumbered by cumulative bases in
    /// input order; taints are inherited.
    pub fn merge(
        db_base: &Path,
        outname: &str,
        datasets: &[Arc<OnDiskDataset>],
        task: Option<&TaskSpec>,
    ) -> DatasetResult<()> {
        let (first, rest) = datasets
            .split_first()
            .ok_or(DatasetError::NotEnoughDatasets)?;
        if rest.is_empty() {
            return Err(DatasetError::NotEnoughDatasets);
        }

        for other in rest {
            if first.taints != other.taints {
                return Err(DatasetError::TaintMismatch {
                    left: first.name.clone(),
                    right: other.name.clone(),
                });
            }
            if first.index_types() != other.index_types() {
                return Err(DatasetError::TypeMismatch {
                    left: first.name.clone(),
                    right: other.name.clone(),
                });
            }
        }

        let index_types = first.index_types();
        if let Some(task) = task {
            task.estimate_work(u64::from(NUM_TRIGRAMS) * index_types.len() as u64);
        }

        tracing::debug!("Pre-checks succeeded, merge can begin");

        let mut index_names = Vec::new();
        for &ntype in &index_types {
            let index_name = format!("{}.{outname}", ntype.name());
            let mut inputs = Vec::with_capacity(datasets.len());
            for dataset in datasets {
                inputs.push(IndexMergeHelper::new(
                    dataset.index_with_type(ntype)?,
                    dataset.file_count() as u32,
                ));
            }
            tracing::debug!("On disk merge: {}", ntype);
            OnDiskIndex::merge(db_base, &index_name, ntype, &inputs, task)?;
            index_names.push(index_name);
        }

        tracing::debug!("Merging filename lists");
        let files_fname = format!("files.{outname}");
        let mut out = BufWriter::new(File::create(db_base.join(&files_fname))?);
        for dataset in datasets {
            dataset.for_each_filename(&mut |fname| {
                writeln!(out, "{fname}").map_err(DatasetError::from)
            })?;
        }
        out.flush()?;
        drop(out);

        store_dataset(
            db_base,
            outname,
            &index_names,
            &files_fname,
            None,
            &first.taints,
        )?;

        tracing::debug!("Merge finished successfully");
        Ok(())
    }

    /// Removes every component file of this dataset. Individual failures
    /// are logged, not fatal.
    pub fn drop_files(&self) {
        let remove = |path: PathBuf| {
            if let Err(err) = std::fs::remove_file(&path) {
                tracing::warn!("Failed to remove {}: {}", path.display(), err);
            }
        };

        for index in &self.indices {
            remove(index.fpath().to_path_buf());
        }
        remove(self.db_base.join(self.files_index.files_fname()));
        remove(self.db_base.join(self.files_index.cache_fname()));
        remove(self.db_base.join(&self.name));
    }

    /// Groups datasets into compatibility classes: equal taints and equal
    /// index type sets. Only members of one class can merge.
    #[must_use]
    pub fn get_compatible_datasets(
        datasets: &[Arc<OnDiskDataset>],
    ) -> Vec<Vec<Arc<OnDiskDataset>>> {
        let mut classes: std::collections::BTreeMap<
            (BTreeSet<String>, BTreeSet<IndexType>),
            Vec<Arc<OnDiskDataset>>,
        > = std::collections::BTreeMap::new();

        for dataset in datasets {
            classes
                .entry((dataset.taints.clone(), dataset.index_types()))
                .or_default()
                .push(Arc::clone(dataset));
        }

        classes.into_values().collect()
    }

    /// Picks a cluster of similarly sized datasets worth merging: sorted
    /// by on-disk size, the cluster grows from the smallest dataset as
    /// long as twice the running cluster size exceeds the next candidate.
    #[must_use]
    pub fn get_compact_candidates(datasets: &[Arc<OnDiskDataset>]) -> Vec<Arc<OnDiskDataset>> {
        if datasets.len() < 2 {
            return Vec::new();
        }

        let mut scores: Vec<(Arc<OnDiskDataset>, u64)> = datasets
            .iter()
            .map(|dataset| {
                let size = dataset.on_disk_size().unwrap_or(u64::MAX);
                (Arc::clone(dataset), size)
            })
            .collect();
        scores.sort_by_key(|(_, size)| *size);

        let mut out = vec![Arc::clone(&scores[0].0)];
        let mut cluster_size = scores[0].1;
        for (dataset, size) in &scores[1..] {
            if cluster_size.saturating_mul(2) <= *size {
                break;
            }
            out.push(Arc::clone(dataset));
            cluster_size += size;
        }

        if out.len() < 2 {
            // No candidate to merge with the smallest dataset.
            return Vec::new();
        }
        out
    }
}
