//! Accumulates files into one new dataset: per-type index builders plus
//! the filename list.

use memmap2::Mmap;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::dataset::store_dataset;
use crate::error::{DatasetError, DatasetResult};
use crate::index::{BitmapIndexBuilder, BuilderKind, FlatIndexBuilder, IndexBuilder};
use crate::types::{FileId, IndexType};

pub struct DatasetBuilder {
    kind: BuilderKind,
    types: Vec<IndexType>,
    fids: Vec<String>,
    indices: Vec<Box<dyn IndexBuilder + Send>>,
}

impl DatasetBuilder {
    #[must_use]
    pub fn new(kind: BuilderKind, types: Vec<IndexType>) -> Self {
        let mut builder = Self {
            kind,
            types,
            fids: Vec::new(),
            indices: Vec::new(),
        };
        builder.clear();
        builder
    }

    fn register_fname(&mut self, fname: &str) -> DatasetResult<FileId> {
        if fname.contains('\n') || fname.contains('\r') {
            return Err(DatasetError::InvalidFilename(fname.to_string()));
        }
        let new_id = FileId::new(self.fids.len() as u32);
        self.fids.push(fname.to_string());
        Ok(new_id)
    }

    /// Maps the file and feeds it to every index builder.
    pub fn index(&mut self, filepath: &str) -> DatasetResult<()> {
        if filepath.contains('\n') || filepath.contains('\r') {
            return Err(DatasetError::InvalidFilename(filepath.to_string()));
        }

        let file = File::open(filepath).map_err(|source| DatasetError::FileOpen {
            path: filepath.into(),
            source,
        })?;
        let size = file
            .metadata()
            .map_err(|source| DatasetError::FileOpen {
                path: filepath.into(),
                source,
            })?
            .len();
        if size == 0 {
            return Err(DatasetError::EmptyFile {
                path: filepath.into(),
            });
        }
        let data = unsafe { Mmap::map(&file) }.map_err(|source| DatasetError::FileOpen {
            path: filepath.into(),
            source,
        })?;

        let fid = self.register_fname(filepath)?;
        for index in &mut self.indices {
            index.add_file(fid, &data)?;
        }
        Ok(())
    }

    /// Whether a file of `bytes` bytes still fits in every builder.
    #[must_use]
    pub fn can_still_add(&self, bytes: u64) -> bool {
        let file_count = self.fids.len() as u32;
        self.indices
            .iter()
            .all(|index| index.can_still_add(bytes, file_count))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fids.is_empty()
    }

    /// Writes the accumulated state as a complete dataset: one index file
    /// per type, the filename list, and the manifest.
    pub fn save(&mut self, db_base: &Path, fname: &str) -> DatasetResult<()> {
        let mut index_names = Vec::new();
        for index in &mut self.indices {
            let index_name = format!("{}.{}", index.index_type().name(), fname);
            index.save(&db_base.join(&index_name))?;
            index_names.push(index_name);
        }

        let files_fname = format!("files.{fname}");
        let mut out = BufWriter::new(File::create(db_base.join(&files_fname))?);
        for filename in &self.fids {
            writeln!(out, "{filename}")?;
        }
        out.flush()?;

        store_dataset(db_base, fname, &index_names, &files_fname, None, &BTreeSet::new())
    }

    /// Drops all accumulated state and rebuilds fresh index builders.
    pub fn clear(&mut self) {
        self.fids.clear();
        self.indices = self
            .types
            .iter()
            .map(|&ntype| -> Box<dyn IndexBuilder + Send> {
                match self.kind {
                    BuilderKind::Flat => Box::new(FlatIndexBuilder::new(ntype)),
                    BuilderKind::Bitmap => Box::new(BitmapIndexBuilder::new(ntype)),
                }
            })
            .collect();
    }
}
