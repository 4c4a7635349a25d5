//! The indexer: routes files into the flat or bitmap builder, spills
//! finished builders to new datasets, and keeps the number of spilled
//! datasets bounded by merging them along the way.

use std::sync::Arc;

use crate::dataset::{DatasetBuilder, OnDiskDataset};
use crate::db::{ConfigKey, DatabaseSnapshot};
use crate::error::{DatasetError, Result};
use crate::index::BuilderKind;
use crate::types::IndexType;

/// When this many of the indexer's own datasets are merge candidates,
/// they are compacted inline before indexing continues.
pub const INDEXER_COMPACT_THRESHOLD: usize = 20;

/// Files above this size go to the bitmap builder, whose memory cost
/// does not depend on content volume.
const BITMAP_THRESHOLD: u64 = 20 * 1024 * 1024;

pub struct Indexer<'a> {
    snap: &'a DatabaseSnapshot,
    flat_builder: DatasetBuilder,
    bitmap_builder: DatasetBuilder,
    created_datasets: Vec<Arc<OnDiskDataset>>,
    max_file_size: u64,
}

impl<'a> Indexer<'a> {
    #[must_use]
    pub fn new(snap: &'a DatabaseSnapshot, types: Vec<IndexType>) -> Self {
        Self {
            snap,
            flat_builder: DatasetBuilder::new(BuilderKind::Flat, types.clone()),
            bitmap_builder: DatasetBuilder::new(BuilderKind::Bitmap, types),
            created_datasets: Vec::new(),
            max_file_size: snap.config().get(ConfigKey::IndexMaxFileSize),
        }
    }

    fn builder(&mut self, use_bitmap: bool) -> &mut DatasetBuilder {
        if use_bitmap {
            &mut self.bitmap_builder
        } else {
            &mut self.flat_builder
        }
    }

    /// Indexes one file. Per-file problems (missing, unreadable, empty,
    /// bad name, oversized) are logged and skipped; spill failures abort.
    pub fn index(&mut self, target: &str) -> Result<()> {
        let file_size = match std::fs::metadata(target) {
            Ok(meta) => meta.len(),
            Err(err) => {
                tracing::warn!("Failed to stat {} reason: {}", target, err);
                return Ok(());
            }
        };
        if self.max_file_size > 0 && file_size > self.max_file_size {
            tracing::warn!(
                "File too large ({} > {} bytes), skip: {}",
                file_size,
                self.max_file_size,
                target
            );
            return Ok(());
        }

        let use_bitmap = file_size > BITMAP_THRESHOLD;
        if !self.builder(use_bitmap).can_still_add(file_size) {
            self.spill(use_bitmap)?;
        }

        match self.builder(use_bitmap).index(target) {
            Ok(()) => Ok(()),
            Err(DatasetError::EmptyFile { path }) => {
                tracing::debug!("Empty file (skip): {}", path.display());
                Ok(())
            }
            Err(DatasetError::InvalidFilename(name)) => {
                tracing::warn!("Illegal file name (skip): {}", name);
                Ok(())
            }
            Err(DatasetError::FileOpen { path, source }) => {
                tracing::warn!("Failed to open {} reason: {}", path.display(), source);
                Ok(())
            }
            Err(other) => Err(other.into()),
        }
    }

    fn register_dataset(&mut self, dataset_name: &str) -> Result<()> {
        let dataset = OnDiskDataset::open(self.snap.db_base(), dataset_name)?;
        self.created_datasets.push(Arc::new(dataset));
        Ok(())
    }

    fn remove_dataset(&mut self, name: &str) {
        self.created_datasets.retain(|dataset| {
            if dataset.name() == name {
                dataset.drop_files();
                false
            } else {
                true
            }
        });
    }

    /// Saves the builder's state as a new dataset, then keeps merging the
    /// accumulated small datasets while enough candidates pile up.
    fn spill(&mut self, use_bitmap: bool) -> Result<()> {
        let dataset_name = self.snap.allocate_name("set")?;
        tracing::debug!("New dataset: {}", dataset_name.filename());
        let db_base = self.snap.db_base().to_path_buf();
        self.builder(use_bitmap)
            .save(&db_base, dataset_name.filename())?;
        self.register_dataset(dataset_name.filename())?;

        loop {
            let candidates = OnDiskDataset::get_compact_candidates(&self.created_datasets);
            if candidates.len() < INDEXER_COMPACT_THRESHOLD {
                tracing::debug!("{} datasets, not merging", candidates.len());
                break;
            }

            tracing::debug!("Merging {} datasets inline", candidates.len());
            let merged_name = self.snap.allocate_name("set")?;
            OnDiskDataset::merge(&db_base, merged_name.filename(), &candidates, None)?;
            for candidate in &candidates {
                let name = candidate.name().to_string();
                self.remove_dataset(&name);
            }
            self.register_dataset(merged_name.filename())?;
        }

        self.builder(use_bitmap).clear();
        Ok(())
    }

    /// Spills any residual state and returns every dataset this indexer
    /// produced.
    pub fn finalize(&mut self) -> Result<Vec<Arc<OnDiskDataset>>> {
        if !self.flat_builder.is_empty() {
            self.spill(false)?;
        }
        if !self.bitmap_builder.is_empty() {
            self.spill(true)?;
        }
        Ok(self.created_datasets.clone())
    }

    /// Like [`Indexer::finalize`], but merges everything into a single
    /// dataset first.
    pub fn force_compact(&mut self) -> Result<Arc<OnDiskDataset>> {
        if !self.flat_builder.is_empty() {
            self.spill(false)?;
        }
        if !self.bitmap_builder.is_empty() {
            self.spill(true)?;
        }

        if self.created_datasets.is_empty() {
            return Err(DatasetError::NothingIndexed.into());
        }

        if self.created_datasets.len() > 1 {
            let candidates = self.created_datasets.clone();
            let merged_name = self.snap.allocate_name("set")?;
            OnDiskDataset::merge(
                self.snap.db_base(),
                merged_name.filename(),
                &candidates,
                None,
            )?;
            for candidate in &candidates {
                let name = candidate.name().to_string();
                self.remove_dataset(&name);
            }
            self.register_dataset(merged_name.filename())?;
        }

        Ok(Arc::clone(
            self.created_datasets.first().expect("registered above"),
        ))
    }
}
