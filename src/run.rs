//! Compressed runs of FileIds and the sorted-run set algebra.
//!
//! A run is a strictly ascending sequence of FileIds stored as
//! varint-encoded deltas: the first value is stored as `f0 + 1`, each
//! later value as the difference to its predecessor. Varints are
//! little-endian base-128 with the high bit marking continuation. Zero is
//! never emitted, which keeps adjacent FileIds at a single byte each.

use std::io::{self, Write};

use crate::types::FileId;

/// Splits the first varint off `bytes`. Returns the decoded value and the
/// number of bytes consumed, or `None` on a truncated stream.
fn decode_single(bytes: &[u8]) -> Option<(u64, usize)> {
    let mut acc: u64 = 0;
    let mut shift: u32 = 0;
    for (i, &byte) in bytes.iter().enumerate() {
        acc += u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Some((acc, i + 1));
        }
        shift += 7;
    }
    None
}

/// Incremental writer of a single compressed run.
///
/// Tracks the previously written FileId so callers can interleave
/// [`RunWriter::write`] with [`RunWriter::write_raw`] appends of
/// already-compressed runs; this is what makes the streaming index merge
/// possible without recompressing the bulk of the data.
pub struct RunWriter<W: Write> {
    out: W,
    prev: i64,
    out_bytes: u64,
}

impl<W: Write> RunWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            prev: -1,
            out_bytes: 0,
        }
    }

    /// Appends the next FileId. Values must be strictly ascending.
    pub fn write(&mut self, next: FileId) -> io::Result<()> {
        let next = i64::from(next.as_u32());
        debug_assert!(next > self.prev);
        let mut diff = (next - self.prev) as u64;
        while diff >= 0x80 {
            self.out.write_all(&[0x80 | (diff & 0x7F) as u8])?;
            self.out_bytes += 1;
            diff >>= 7;
        }
        self.out.write_all(&[diff as u8])?;
        self.out_bytes += 1;
        self.prev = next;
        Ok(())
    }

    /// Appends a whole compressed run, rebasing its FileIds by `base`.
    ///
    /// Only the first varint needs rewriting (to splice the run after
    /// whatever was already written); the remaining bytes are deltas and
    /// stay valid verbatim. The writer still scans them to learn the last
    /// FileId of the run.
    pub fn write_raw(&mut self, base: FileId, run: &[u8]) -> io::Result<()> {
        if run.is_empty() {
            return Ok(());
        }

        let (first, consumed) = decode_single(run).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "truncated varint in run")
        })?;
        // Stored value is f0 + 1.
        self.write(FileId::new(base.as_u32() + (first - 1) as u32))?;

        let rest = &run[consumed..];
        self.out.write_all(rest)?;
        self.out_bytes += rest.len() as u64;

        let mut acc: u64 = 0;
        let mut shift: u32 = 0;
        for &byte in rest {
            acc += u64::from(byte & 0x7F) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                self.prev += acc as i64;
                acc = 0;
                shift = 0;
            }
        }
        Ok(())
    }

    /// Bytes emitted since construction or the last [`RunWriter::reset`].
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.out_bytes
    }

    /// Ends the current run: re-arms the delta base and returns how many
    /// bytes the finished run took.
    pub fn reset(&mut self) -> u64 {
        self.prev = -1;
        std::mem::take(&mut self.out_bytes)
    }
}

/// Compresses a sorted run into a fresh byte vector.
#[must_use]
pub fn compress_run(run: &[FileId]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut writer = RunWriter::new(&mut out);
    for &fid in run {
        // Writing to a Vec cannot fail.
        writer.write(fid).expect("write to Vec failed");
    }
    out
}

/// Decodes a compressed run back into FileIds.
#[must_use]
pub fn read_compressed_run(bytes: &[u8]) -> Vec<FileId> {
    let mut out = Vec::new();
    let mut prev: i64 = -1;
    let mut acc: u64 = 0;
    let mut shift: u32 = 0;

    for &byte in bytes {
        acc += u64::from(byte & 0x7F) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            prev += acc as i64;
            out.push(FileId::new(prev as u32));
            acc = 0;
            shift = 0;
        }
    }

    out
}

/// A sorted, strictly ascending set of FileIds.
///
/// Holds its data either decoded or still varint-compressed, but never
/// both. Operations decompress their operands lazily on first use and
/// always produce decoded output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortedRun {
    sequence: Vec<FileId>,
    compressed: Vec<u8>,
}

impl SortedRun {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_compressed(compressed: Vec<u8>) -> Self {
        Self {
            sequence: Vec::new(),
            compressed,
        }
    }

    /// Wraps an already sorted, duplicate-free vector.
    #[must_use]
    pub fn from_sorted(sequence: Vec<FileId>) -> Self {
        debug_assert!(sequence.windows(2).all(|w| w[0] < w[1]));
        Self {
            sequence,
            compressed: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty() && self.compressed.is_empty()
    }

    fn validate(&self) {
        debug_assert!(
            self.sequence.is_empty() || self.compressed.is_empty(),
            "run holds both decoded and compressed data"
        );
    }

    fn decompress(&mut self) {
        self.validate();
        if self.compressed.is_empty() {
            return;
        }
        self.sequence = read_compressed_run(&self.compressed);
        self.compressed = Vec::new();
    }

    /// The decoded sequence, decompressing first when necessary.
    pub fn decompressed(&mut self) -> &[FileId] {
        self.decompress();
        &self.sequence
    }

    /// Consumes the run, returning the decoded sequence.
    #[must_use]
    pub fn into_sorted_vec(mut self) -> Vec<FileId> {
        self.decompress();
        self.sequence
    }

    /// Set union, in place.
    pub fn do_or(&mut self, other: &mut SortedRun) {
        self.decompress();
        other.decompress();

        let mut merged = Vec::with_capacity(self.sequence.len() + other.sequence.len());
        let (a, b) = (&self.sequence, &other.sequence);
        let (mut i, mut j) = (0, 0);
        while i < a.len() && j < b.len() {
            match a[i].cmp(&b[j]) {
                std::cmp::Ordering::Less => {
                    merged.push(a[i]);
                    i += 1;
                }
                std::cmp::Ordering::Greater => {
                    merged.push(b[j]);
                    j += 1;
                }
                std::cmp::Ordering::Equal => {
                    merged.push(a[i]);
                    i += 1;
                    j += 1;
                }
            }
        }
        merged.extend_from_slice(&a[i..]);
        merged.extend_from_slice(&b[j..]);
        self.sequence = merged;
    }

    /// Set intersection, in place.
    pub fn do_and(&mut self, other: &mut SortedRun) {
        self.decompress();
        other.decompress();

        let b = &other.sequence;
        let mut j = 0;
        let mut keep = 0;
        for i in 0..self.sequence.len() {
            let val = self.sequence[i];
            while j < b.len() && b[j] < val {
                j += 1;
            }
            if j < b.len() && b[j] == val {
                self.sequence[keep] = val;
                keep += 1;
                j += 1;
            }
        }
        self.sequence.truncate(keep);
    }

    /// Returns all FileIds appearing in at least `cutoff` of `sources`.
    ///
    /// Sweeps all sources in parallel: repeatedly selects the minimum
    /// current head, counts how many heads carry it, advances those heads,
    /// and emits the value when the count reaches the cutoff. Stops as
    /// soon as fewer than `cutoff` sources remain.
    #[must_use]
    pub fn pick_common(cutoff: usize, sources: &mut [SortedRun]) -> SortedRun {
        let mut heads: Vec<&[FileId]> = sources
            .iter_mut()
            .map(SortedRun::decompressed)
            .filter(|seq| !seq.is_empty())
            .collect();

        let mut result = Vec::new();
        while heads.len() >= cutoff.max(1) {
            let mut min_id = heads[0][0];
            for head in &heads[1..] {
                if head[0] < min_id {
                    min_id = head[0];
                }
            }

            let mut repeat_count = 0;
            let mut i = 0;
            while i < heads.len() {
                if heads[i][0] == min_id {
                    repeat_count += 1;
                    heads[i] = &heads[i][1..];
                    if heads[i].is_empty() {
                        heads.swap_remove(i);
                        continue;
                    }
                }
                i += 1;
            }

            if repeat_count >= cutoff {
                result.push(min_id);
            }
        }

        SortedRun::from_sorted(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fids(ids: &[u32]) -> Vec<FileId> {
        ids.iter().copied().map(FileId::new).collect()
    }

    #[test]
    fn compress_run_sanity() {
        let compressed = compress_run(&fids(&[1, 2, 5, 8, 265]));
        assert_eq!(compressed, b"\x02\x01\x03\x03\x81\x02");
        assert_eq!(read_compressed_run(&compressed), fids(&[1, 2, 5, 8, 265]));
    }

    #[test]
    fn compress_starts_at_zero() {
        // FileId 0 is stored as 1; zero is a reserved sentinel.
        assert_eq!(compress_run(&fids(&[0])), b"\x01");
        assert_eq!(compress_run(&fids(&[0, 1, 2])), b"\x01\x01\x01");
    }

    #[test]
    fn write_raw_rebases_only_the_first_varint() {
        let left = compress_run(&fids(&[0, 3]));
        let right = compress_run(&fids(&[1, 200]));

        let mut out = Vec::new();
        let mut writer = RunWriter::new(&mut out);
        writer.write_raw(FileId::new(0), &left).unwrap();
        writer.write_raw(FileId::new(4), &right).unwrap();
        writer.reset();
        drop(writer);

        assert_eq!(read_compressed_run(&out), fids(&[0, 3, 5, 204]));
    }

    #[test]
    fn or_is_union() {
        let mut a = SortedRun::from_sorted(fids(&[1, 3, 5]));
        let mut b = SortedRun::from_compressed(compress_run(&fids(&[2, 3, 9])));
        a.do_or(&mut b);
        assert_eq!(a.decompressed(), fids(&[1, 2, 3, 5, 9]).as_slice());
    }

    #[test]
    fn and_is_intersection() {
        let mut a = SortedRun::from_sorted(fids(&[1, 3, 5, 9]));
        let mut b = SortedRun::from_sorted(fids(&[3, 4, 9, 12]));
        a.do_and(&mut b);
        assert_eq!(a.decompressed(), fids(&[3, 9]).as_slice());
    }

    #[test]
    fn pick_common_thresholds() {
        let runs = || {
            vec![
                SortedRun::from_sorted(fids(&[1, 2, 3])),
                SortedRun::from_sorted(fids(&[2, 3, 4])),
                SortedRun::from_sorted(fids(&[3, 4, 5])),
            ]
        };

        let mut sources = runs();
        assert_eq!(
            SortedRun::pick_common(1, &mut sources).into_sorted_vec(),
            fids(&[1, 2, 3, 4, 5])
        );
        let mut sources = runs();
        assert_eq!(
            SortedRun::pick_common(2, &mut sources).into_sorted_vec(),
            fids(&[2, 3, 4])
        );
        let mut sources = runs();
        assert_eq!(
            SortedRun::pick_common(3, &mut sources).into_sorted_vec(),
            fids(&[3])
        );
        let mut sources = runs();
        assert!(SortedRun::pick_common(4, &mut sources).is_empty());
    }
}
