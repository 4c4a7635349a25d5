//! The filename side of a dataset: `files.<name>` (newline-delimited
//! names) plus `namecache.<name>` (cumulative byte offsets, u64 each) for
//! random access by FileId.

use byteorder::{LittleEndian, WriteBytesExt};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::DatasetResult;
use crate::types::FileId;
use crate::util::pread_exact;

pub struct OnDiskFileIndex {
    db_base: PathBuf,
    files_fname: String,
    cache_fname: String,
    files_file: File,
    cache_file: File,
    file_count: u64,
}

impl OnDiskFileIndex {
    /// Opens the file list, generating the name cache if it is missing.
    pub fn open(db_base: &Path, files_fname: &str, cache_fname: &str) -> DatasetResult<Self> {
        let files_path = db_base.join(files_fname);
        let cache_path = db_base.join(cache_fname);

        let files_file = File::open(&files_path)?;
        if !cache_path.exists() {
            generate_namecache(&files_path, &cache_path)?;
        }
        let cache_file = File::open(&cache_path)?;
        let file_count = (cache_file.metadata()?.len() / 8).saturating_sub(1);

        Ok(Self {
            db_base: db_base.to_path_buf(),
            files_fname: files_fname.to_string(),
            cache_fname: cache_fname.to_string(),
            files_file,
            cache_file,
            file_count,
        })
    }

    #[must_use]
    pub fn file_count(&self) -> u64 {
        self.file_count
    }

    #[must_use]
    pub fn files_fname(&self) -> &str {
        &self.files_fname
    }

    #[must_use]
    pub fn cache_fname(&self) -> &str {
        &self.cache_fname
    }

    /// Resolves one FileId to its filename: two cache reads for the byte
    /// range, one read for the name itself.
    pub fn file_name(&self, fid: FileId) -> DatasetResult<String> {
        let mut offsets = [0u8; 16];
        pread_exact(&self.cache_file, &mut offsets, u64::from(fid.as_u32()) * 8)?;
        let start = u64::from_le_bytes(offsets[..8].try_into().expect("8 bytes"));
        let end = u64::from_le_bytes(offsets[8..].try_into().expect("8 bytes")) - 1;

        let mut name = vec![0u8; (end - start) as usize];
        pread_exact(&self.files_file, &mut name, start)?;
        Ok(String::from_utf8_lossy(&name).into_owned())
    }

    /// Streams every filename in FileId order.
    pub fn for_each_filename(
        &self,
        cb: &mut dyn FnMut(&str) -> DatasetResult<()>,
    ) -> DatasetResult<()> {
        let reader = BufReader::new(File::open(self.db_base.join(&self.files_fname))?);
        for line in reader.lines() {
            let line = line?;
            if !line.is_empty() {
                cb(&line)?;
            }
        }
        Ok(())
    }
}

/// Writes `namecache`: file_count + 1 cumulative offsets into the name
/// list, so entry i's name spans offsets[i]..offsets[i+1]-1.
fn generate_namecache(files_path: &Path, cache_path: &Path) -> DatasetResult<()> {
    tracing::debug!(
        "Namecache {} not found, generating",
        cache_path.display()
    );

    let reader = BufReader::new(File::open(files_path)?);
    let mut out = BufWriter::new(File::create(cache_path)?);

    let mut offset: u64 = 0;
    for line in reader.lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        out.write_u64::<LittleEndian>(offset)?;
        offset += line.len() as u64 + 1;
    }
    out.write_u64::<LittleEndian>(offset)?;
    out.flush()?;
    tracing::info!("SAVE: {}", cache_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn resolves_names_by_fid() {
        let dir = tempfile::tempdir().unwrap();
        let mut files = File::create(dir.path().join("files.test")).unwrap();
        writeln!(files, "/a/one").unwrap();
        writeln!(files, "/a/two").unwrap();
        writeln!(files, "/b/three").unwrap();
        drop(files);

        let index = OnDiskFileIndex::open(dir.path(), "files.test", "namecache.files.test")
            .unwrap();
        assert_eq!(index.file_count(), 3);
        assert_eq!(index.file_name(FileId::new(0)).unwrap(), "/a/one");
        assert_eq!(index.file_name(FileId::new(1)).unwrap(), "/a/two");
        assert_eq!(index.file_name(FileId::new(2)).unwrap(), "/b/three");

        let mut seen = Vec::new();
        index
            .for_each_filename(&mut |name| {
                seen.push(name.to_string());
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, vec!["/a/one", "/a/two", "/b/three"]);

        // The cache persists and is reused on reopen.
        assert!(dir.path().join("namecache.files.test").exists());
        let reopened =
            OnDiskFileIndex::open(dir.path(), "files.test", "namecache.files.test").unwrap();
        assert_eq!(reopened.file_name(FileId::new(2)).unwrap(), "/b/three");
    }
}
