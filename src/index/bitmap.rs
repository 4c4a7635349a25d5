//! Bitmap index builder: a dense gram x file bit matrix.

use byteorder::{LittleEndian, WriteBytesExt};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::{IndexError, IndexResult};
use crate::index::builder::IndexBuilder;
use crate::index::ondisk::{DB_MAGIC, INDEX_FORMAT_VERSION};
use crate::ngram::generate;
use crate::run::RunWriter;
use crate::types::{FileId, IndexType, NUM_TRIGRAMS};

/// File capacity of one bitmap spill.
const MAX_FILES: u32 = 64;
/// Bytes per gram: one bit per file slot.
const FILE_RUN_SIZE: usize = (MAX_FILES / 8) as usize;

/// Builder holding one bit per (gram, file) pair.
///
/// Memory cost is fixed at `NUM_TRIGRAMS * 8` bytes regardless of how
/// much content the files carry, which is what makes it the right
/// strategy for huge inputs. The flip side is the hard 64-file capacity:
/// `can_still_add` reports the builder full at that point so the owner
/// spills before the file that would overflow.
pub struct BitmapIndexBuilder {
    ntype: IndexType,
    raw_data: Vec<u8>,
}

impl BitmapIndexBuilder {
    #[must_use]
    pub fn new(ntype: IndexType) -> Self {
        Self {
            ntype,
            raw_data: vec![0u8; FILE_RUN_SIZE * NUM_TRIGRAMS as usize],
        }
    }

    fn run_fids(&self, gram: u32) -> impl Iterator<Item = FileId> + '_ {
        let run_start = gram as usize * FILE_RUN_SIZE;
        (0..FILE_RUN_SIZE).flat_map(move |offset| {
            let byte = self.raw_data[run_start + offset];
            (0..8).filter_map(move |shift| {
                if byte & (1 << shift) != 0 {
                    Some(FileId::new((offset * 8 + shift) as u32))
                } else {
                    None
                }
            })
        })
    }
}

impl IndexBuilder for BitmapIndexBuilder {
    fn index_type(&self) -> IndexType {
        self.ntype
    }

    fn add_file(&mut self, fid: FileId, data: &[u8]) -> IndexResult<()> {
        if fid.as_u32() >= MAX_FILES {
            return Err(IndexError::BuilderFull { fid: fid.as_u32() });
        }

        let offset = (fid.as_u32() / 8) as usize;
        let bit = 1u8 << (fid.as_u32() % 8);
        let raw_data = &mut self.raw_data;
        generate(self.ntype, data, &mut |gram| {
            raw_data[gram.as_usize() * FILE_RUN_SIZE + offset] |= bit;
        });
        Ok(())
    }

    fn can_still_add(&self, _bytes: u64, file_count: u32) -> bool {
        file_count < MAX_FILES
    }

    fn save(&mut self, path: &Path) -> IndexResult<()> {
        let mut out = BufWriter::new(File::create(path)?);

        out.write_u32::<LittleEndian>(DB_MAGIC)?;
        out.write_u32::<LittleEndian>(INDEX_FORMAT_VERSION)?;
        out.write_u32::<LittleEndian>(self.ntype.as_raw())?;
        out.write_u32::<LittleEndian>(0)?;

        let mut offset: u64 = 16;
        let mut offsets = vec![0u64; NUM_TRIGRAMS as usize + 1];

        {
            let mut writer = RunWriter::new(&mut out);
            for gram in 0..NUM_TRIGRAMS {
                offsets[gram as usize] = offset;
                for fid in self.run_fids(gram) {
                    writer.write(fid)?;
                }
                offset += writer.reset();
            }
        }

        offsets[NUM_TRIGRAMS as usize] = offset;
        for &o in &offsets {
            out.write_u64::<LittleEndian>(o)?;
        }
        out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitmap_records_fids_in_order() {
        let mut builder = BitmapIndexBuilder::new(IndexType::Gram3);
        builder.add_file(FileId::new(9), b"abc").unwrap();
        builder.add_file(FileId::new(2), b"abc").unwrap();

        let fids: Vec<FileId> = builder.run_fids(0x61_62_63).collect();
        assert_eq!(fids, vec![FileId::new(2), FileId::new(9)]);
    }

    #[test]
    fn bitmap_rejects_fid_over_capacity() {
        let mut builder = BitmapIndexBuilder::new(IndexType::Gram3);
        assert!(builder.can_still_add(1 << 30, 63));
        assert!(!builder.can_still_add(1, 64));
        assert!(builder.add_file(FileId::new(64), b"abc").is_err());
    }
}
