//! The on-disk index: a memory-mapped posting file, one varint-delta run
//! per possible gram, and a tail array of run offsets.
//!
//! Layout (all little-endian):
//!
//! ```text
//! magic:   u32 = 0x0CA7DA7A
//! version: u32 = 6
//! type:    u32 in {1..4}
//! reserved:u32 = 0
//! <concatenated varint-delta runs, gram-ordered>
//! offsets: u64[NUM_TRIGRAMS + 1]    (offsets[N] = end of the run area)
//! ```

use byteorder::{LittleEndian, WriteBytesExt};
use memmap2::Mmap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::error::{IndexError, IndexResult};
use crate::ngram::convert_gram;
use crate::query::{QueryCounter, QueryCounters, QueryPlan, QueryResult};
use crate::run::{RunWriter, SortedRun};
use crate::types::{FileId, IndexType, TriGram, NUM_TRIGRAMS};
use crate::util::pread_exact;

pub const DB_MAGIC: u32 = 0x0CA7_DA7A;
pub const INDEX_FORMAT_VERSION: u32 = 6;

const DATA_OFFSET: u64 = 16;
const RUN_ARRAY_SIZE: u64 = (NUM_TRIGRAMS as u64 + 1) * 8;

/// How much compressed run data a single merge batch may stage in memory.
const MAX_BATCH_BYTES: u64 = 128 * 1024 * 1024;

/// Read-only handle to one index file.
pub struct OnDiskIndex {
    fname: String,
    fpath: PathBuf,
    file: File,
    mmap: Mmap,
    index_size: u64,
    ntype: IndexType,
}

impl OnDiskIndex {
    /// Opens and validates an index file; the run data stays memory-mapped.
    pub fn open(path: &Path) -> IndexResult<Self> {
        let file = File::open(path)?;
        let index_size = file.metadata()?.len();

        if index_size < DATA_OFFSET + RUN_ARRAY_SIZE {
            return Err(IndexError::TooSmall {
                path: path.to_path_buf(),
            });
        }

        let mmap = unsafe { Mmap::map(&file)? };

        let magic = read_u32_at(&mmap, 0);
        let version = read_u32_at(&mmap, 4);
        let raw_type = read_u32_at(&mmap, 8);
        let reserved = read_u32_at(&mmap, 12);

        if magic != DB_MAGIC {
            return Err(IndexError::BadMagic {
                path: path.to_path_buf(),
            });
        }
        if version != INDEX_FORMAT_VERSION {
            return Err(IndexError::BadVersion { version });
        }
        let ntype = IndexType::from_raw(raw_type).ok_or(IndexError::BadType { raw: raw_type })?;
        if reserved != 0 {
            return Err(IndexError::BadReserved);
        }

        let fname = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self {
            fname,
            fpath: path.to_path_buf(),
            file,
            mmap,
            index_size,
            ntype,
        })
    }

    #[must_use]
    pub fn index_type(&self) -> IndexType {
        self.ntype
    }

    #[must_use]
    pub fn fname(&self) -> &str {
        &self.fname
    }

    #[must_use]
    pub fn fpath(&self) -> &Path {
        &self.fpath
    }

    /// Current size of the index file in bytes.
    pub fn real_size(&self) -> IndexResult<u64> {
        Ok(std::fs::metadata(&self.fpath)?.len())
    }

    /// Byte range of one gram's run within the file.
    fn run_offsets(&self, gram: TriGram) -> (u64, u64) {
        let array_start = (self.index_size - RUN_ARRAY_SIZE) as usize;
        let at = array_start + gram.as_usize() * 8;
        (read_u64_at(&self.mmap, at), read_u64_at(&self.mmap, at + 8))
    }

    fn run_data(&self, start: u64, end: u64) -> IndexResult<&[u8]> {
        if start < DATA_OFFSET || start > end || end > self.index_size - RUN_ARRAY_SIZE {
            return Err(IndexError::CorruptRun {
                path: self.fpath.clone(),
            });
        }
        Ok(&self.mmap[start as usize..end as usize])
    }

    /// Reads and wraps one gram's compressed posting run.
    pub fn run(&self, gram: TriGram) -> IndexResult<SortedRun> {
        let (start, end) = self.run_offsets(gram);
        let data = self.run_data(start, end)?;
        Ok(SortedRun::from_compressed(data.to_vec()))
    }

    /// Decoded posting run of one gram.
    pub fn query_primitive(&self, gram: TriGram) -> IndexResult<Vec<FileId>> {
        Ok(self.run(gram)?.into_sorted_vec())
    }

    /// Evaluates a compiled query against this index.
    ///
    /// The oracle resolves each n-gram window through this type's
    /// generator; windows the charset cannot express resolve to
    /// *everything* (the index has no opinion about them).
    pub fn query(
        &self,
        plan: &QueryPlan,
        counters: &mut QueryCounters,
    ) -> IndexResult<QueryResult> {
        let mut reads = QueryCounter::default();
        let mut oracle = |window: u64| -> IndexResult<QueryResult> {
            let started = Instant::now();
            let result = match convert_gram(self.ntype, window) {
                Some(gram) => QueryResult::from_run(self.run(gram)?),
                None => QueryResult::everything(),
            };
            reads.record(started);
            Ok(result)
        };
        let result = plan.run(&mut oracle, counters)?;
        counters.reads.add(&reads);
        Ok(result)
    }

    /// Reads the whole tail offset array. Used to prepare merges.
    #[must_use]
    pub fn read_run_offsets(&self) -> Vec<u64> {
        let array_start = (self.index_size - RUN_ARRAY_SIZE) as usize;
        self.mmap[array_start..]
            .chunks_exact(8)
            .map(|chunk| u64::from_le_bytes(chunk.try_into().expect("chunk of 8")))
            .collect()
    }

    /// Merges `inputs` into a new index file, streaming batched reads.
    ///
    /// Each input's FileIds are rebased by the total file count of the
    /// inputs before it, so the output stays strictly ascending without
    /// decompressing anything but the first varint of every run.
    pub fn merge(
        db_base: &Path,
        fname: &str,
        merge_type: IndexType,
        inputs: &[IndexMergeHelper<'_>],
        task: Option<&crate::db::TaskSpec>,
    ) -> IndexResult<()> {
        for input in inputs {
            if input.index.index_type() != merge_type {
                return Err(IndexError::MergeTypeMismatch {
                    expected: merge_type,
                    got: input.index.index_type(),
                });
            }
        }

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(db_base.join(fname))?;
        let mut out = BufWriter::new(file);

        out.write_u32::<LittleEndian>(DB_MAGIC)?;
        out.write_u32::<LittleEndian>(INDEX_FORMAT_VERSION)?;
        out.write_u32::<LittleEndian>(merge_type.as_raw())?;
        out.write_u32::<LittleEndian>(0)?;

        merge_core(inputs, &mut out, task)?;
        out.flush()?;
        Ok(())
    }
}

fn read_u32_at(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(data[at..at + 4].try_into().expect("4 bytes"))
}

fn read_u64_at(data: &[u8], at: usize) -> u64 {
    u64::from_le_bytes(data[at..at + 8].try_into().expect("8 bytes"))
}

/// One merge input: the index, its file count (for rebasing) and its
/// cached run offset array.
pub struct IndexMergeHelper<'a> {
    index: &'a OnDiskIndex,
    file_count: u32,
    run_offsets: Vec<u64>,
}

impl<'a> IndexMergeHelper<'a> {
    #[must_use]
    pub fn new(index: &'a OnDiskIndex, file_count: u32) -> Self {
        let run_offsets = index.read_run_offsets();
        Self {
            index,
            file_count,
            run_offsets,
        }
    }

    /// Byte range of `count` consecutive runs starting at `gram`.
    fn span(&self, gram: u32, count: u32) -> (u64, u64) {
        (
            self.run_offsets[gram as usize],
            self.run_offsets[(gram + count) as usize],
        )
    }

    fn span_bytes(&self, gram: u32, count: u32) -> u64 {
        let (start, end) = self.span(gram, count);
        end - start
    }
}

/// Largest window of grams starting at `gram` whose combined compressed
/// size still fits the batch budget. Always at least one gram, so a
/// single oversized run degrades to an unbatched copy instead of failing.
fn find_max_batch(inputs: &[IndexMergeHelper<'_>], gram: u32, max_bytes: u64) -> u32 {
    let mut batch: u32 = 1;
    while gram + batch < NUM_TRIGRAMS {
        let bytes: u64 = inputs
            .iter()
            .map(|input| input.span_bytes(gram, batch + 1))
            .sum();
        if bytes > max_bytes {
            break;
        }
        batch += 1;
    }
    batch
}

/// The merge loop: stage a batch of runs from every input, then write the
/// output runs in gram order, rebiasing only each run's first varint.
fn merge_core(
    inputs: &[IndexMergeHelper<'_>],
    out: &mut BufWriter<File>,
    task: Option<&crate::db::TaskSpec>,
) -> IndexResult<()> {
    let mut offsets = vec![0u64; NUM_TRIGRAMS as usize + 1];
    let mut out_offset: u64 = DATA_OFFSET;

    let mut staging: Vec<u8> = Vec::new();
    // Staging offset of each input's batch slice, and the file offset the
    // slice was read from.
    let mut batch_spans: Vec<(usize, u64)> = Vec::with_capacity(inputs.len());

    {
        let mut writer = RunWriter::new(&mut *out);

        let mut gram: u32 = 0;
        while gram < NUM_TRIGRAMS {
            let batch = find_max_batch(inputs, gram, MAX_BATCH_BYTES);

            staging.clear();
            batch_spans.clear();
            for input in inputs {
                let (start, end) = input.span(gram, batch);
                let at = staging.len();
                staging.resize(at + (end - start) as usize, 0);
                pread_exact(&input.index.file, &mut staging[at..], start)?;
                batch_spans.push((at, start));
            }

            for i in 0..batch {
                offsets[(gram + i) as usize] = out_offset;
                let mut base_files: u32 = 0;
                for (input, &(batch_at, batch_start)) in inputs.iter().zip(&batch_spans) {
                    let (run_start, run_end) = input.span(gram + i, 1);
                    let from = batch_at + (run_start - batch_start) as usize;
                    let to = batch_at + (run_end - batch_start) as usize;
                    writer.write_raw(FileId::new(base_files), &staging[from..to])?;
                    base_files += input.file_count;
                }
                out_offset += writer.reset();
            }

            if let Some(task) = task {
                task.add_progress(u64::from(batch));
            }
            gram += batch;
        }
    }

    offsets[NUM_TRIGRAMS as usize] = out_offset;
    for &offset in &offsets {
        out.write_u64::<LittleEndian>(offset)?;
    }
    Ok(())
}
