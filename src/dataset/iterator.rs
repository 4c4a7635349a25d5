//! Persisted, paginated result sets.
//!
//! An iterator is a frozen select result: a newline-delimited backing
//! file plus a small JSON metadata file tracking how far the client has
//! read. `pop` returns the next slice and advances both offsets; the
//! metadata is persisted atomically by the coordinator at commit time.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};

use crate::db::DatabaseName;
use crate::error::{DatasetError, DatasetResult};

#[derive(Serialize, Deserialize)]
struct IteratorMeta {
    byte_offset: u64,
    file_offset: u64,
    total_files: u64,
    backing_storage: String,
}

#[derive(Debug, Clone)]
pub struct OnDiskIterator {
    name: DatabaseName,
    datafile_name: DatabaseName,
    total_files: u64,
    byte_offset: u64,
    file_offset: u64,
}

impl OnDiskIterator {
    /// Writes the metadata file of a fresh iterator.
    pub fn construct(
        location: &DatabaseName,
        backing_storage: &DatabaseName,
        total_files: u64,
    ) -> DatasetResult<()> {
        write_itermeta(location, 0, 0, total_files, backing_storage)
    }

    pub fn load(name: DatabaseName) -> DatasetResult<Self> {
        let meta: IteratorMeta = serde_json::from_reader(File::open(name.full_path())?)?;
        let datafile_name = name.derive("iterator", &meta.backing_storage);
        Ok(Self {
            name,
            datafile_name,
            total_files: meta.total_files,
            byte_offset: meta.byte_offset,
            file_offset: meta.file_offset,
        })
    }

    #[must_use]
    pub fn name(&self) -> &DatabaseName {
        &self.name
    }

    #[must_use]
    pub fn backing_name(&self) -> &DatabaseName {
        &self.datafile_name
    }

    #[must_use]
    pub fn total_files(&self) -> u64 {
        self.total_files
    }

    #[must_use]
    pub fn byte_offset(&self) -> u64 {
        self.byte_offset
    }

    #[must_use]
    pub fn file_offset(&self) -> u64 {
        self.file_offset
    }

    pub fn update_offset(&mut self, byte_offset: u64, file_offset: u64) {
        self.byte_offset = byte_offset;
        self.file_offset = file_offset;
    }

    /// Reads up to `count` filenames from the current position and
    /// advances the in-memory offsets. The caller persists them.
    pub fn pop(&mut self, count: u64, out: &mut Vec<String>) -> DatasetResult<()> {
        let mut reader = BufReader::new(File::open(self.datafile_name.full_path())?);
        reader.seek(SeekFrom::Start(self.byte_offset))?;

        for _ in 0..count {
            let mut line = String::new();
            let bytes = reader.read_line(&mut line)?;
            if bytes == 0 {
                break;
            }
            self.byte_offset += bytes as u64;
            let name = line.trim_end_matches('\n');
            if name.is_empty() {
                continue;
            }
            out.push(name.to_string());
            self.file_offset += 1;
        }
        Ok(())
    }

    /// Persists the current offsets (write-temp-then-rename).
    pub fn save(&self) -> DatasetResult<()> {
        write_itermeta(
            &self.name,
            self.byte_offset,
            self.file_offset,
            self.total_files,
            &self.datafile_name,
        )?;
        tracing::info!("SAVE: {}", self.name.filename());
        Ok(())
    }

    /// Removes both the metadata and the backing file.
    pub fn drop_files(&self) -> DatasetResult<()> {
        std::fs::remove_file(self.name.full_path())?;
        std::fs::remove_file(self.datafile_name.full_path())?;
        Ok(())
    }
}

fn write_itermeta(
    target: &DatabaseName,
    byte_offset: u64,
    file_offset: u64,
    total_files: u64,
    backing_storage: &DatabaseName,
) -> DatasetResult<()> {
    let meta = IteratorMeta {
        byte_offset,
        file_offset,
        total_files,
        backing_storage: backing_storage.filename().to_string(),
    };

    let tmp_name = target.derive_temporary();
    let mut out = File::create(tmp_name.full_path())?;
    serde_json::to_writer_pretty(&mut out, &meta)?;
    out.write_all(b"\n")?;
    out.sync_data().map_err(DatasetError::Io)?;
    std::fs::rename(tmp_name.full_path(), target.full_path())?;
    Ok(())
}
