//! The common interface of in-memory index builders.

use std::path::Path;

use crate::error::IndexResult;
use crate::types::{FileId, IndexType};

/// Which builder strategy a dataset builder should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuilderKind {
    /// Packed (gram, fid) entries, sorted at save time. Memory use grows
    /// with content volume; right for many small files.
    Flat,
    /// A dense gram x file bitmap. Memory use is fixed but the file
    /// capacity per spill is small; right for few huge files.
    Bitmap,
}

/// An in-memory builder accumulating files and emitting one on-disk index.
pub trait IndexBuilder {
    fn index_type(&self) -> IndexType;

    /// Adds one file's grams under the given id.
    fn add_file(&mut self, fid: FileId, data: &[u8]) -> IndexResult<()>;

    /// Can a file of `bytes` bytes still be accepted, given that
    /// `file_count` files are already registered?
    fn can_still_add(&self, bytes: u64, file_count: u32) -> bool;

    /// Writes the accumulated index in the on-disk format.
    fn save(&mut self, path: &Path) -> IndexResult<()>;
}
