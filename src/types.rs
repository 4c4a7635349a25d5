//! Type-safe newtypes for the core index domain.
//!
//! These newtypes provide compile-time safety and semantic clarity
//! for the values that flow through every layer of the engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Size of the n-gram namespace. Every index type packs its window into
/// 24 bits, so all index files carry exactly this many posting runs.
pub const NUM_TRIGRAMS: u32 = 1 << 24;

/// Identifier of a file within a single dataset.
///
/// FileIds are dense and assigned at index time starting from 0. They are
/// only meaningful relative to their dataset; merges renumber them by
/// adding a per-input base offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(pub u32);

impl FileId {
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for FileId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl From<FileId> for u32 {
    fn from(id: FileId) -> Self {
        id.0
    }
}

/// A 24-bit n-gram key.
///
/// Despite the name, this is not always three bytes of input: each index
/// type packs its own window shape (3, 4 or 8 bytes) into the same 24-bit
/// namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TriGram(u32);

impl TriGram {
    #[must_use]
    pub const fn new(val: u32) -> Self {
        Self(val & (NUM_TRIGRAMS - 1))
    }

    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TriGram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06x}", self.0)
    }
}

/// The rule mapping a byte window to a [`TriGram`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum IndexType {
    /// Raw trigrams: "abcdef" -> "abc", "bcd", "cde", "def".
    Gram3 = 1,
    /// Text 4-grams over the base64-like alphabet `[A-Za-z0-9 \n]`,
    /// 6 bits per symbol. Bytes outside the alphabet reset the window.
    Text4 = 2,
    /// Hashed 4-grams: gram3(a,b,c) XOR gram3(b,c,d).
    Hash4 = 3,
    /// UTF-16-LE text 4-grams: base64 symbols interleaved with NULs,
    /// eight input bytes per gram.
    Wide8 = 4,
}

impl IndexType {
    /// All supported index types, in on-disk tag order.
    pub const ALL: [IndexType; 4] = [
        IndexType::Gram3,
        IndexType::Text4,
        IndexType::Hash4,
        IndexType::Wide8,
    ];

    /// Decodes the on-disk type tag.
    #[must_use]
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(IndexType::Gram3),
            2 => Some(IndexType::Text4),
            3 => Some(IndexType::Hash4),
            4 => Some(IndexType::Wide8),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_raw(self) -> u32 {
        self as u32
    }

    /// Name used in the query language and in index file names.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            IndexType::Gram3 => "gram3",
            IndexType::Text4 => "text4",
            IndexType::Hash4 => "hash4",
            IndexType::Wide8 => "wide8",
        }
    }

    /// Number of input bytes covered by one gram of this type.
    #[must_use]
    pub const fn window_size(self) -> usize {
        match self {
            IndexType::Gram3 => 3,
            IndexType::Text4 => 4,
            IndexType::Hash4 => 4,
            IndexType::Wide8 => 8,
        }
    }
}

impl fmt::Display for IndexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for IndexType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gram3" => Ok(IndexType::Gram3),
            "text4" => Ok(IndexType::Text4),
            "hash4" => Ok(IndexType::Hash4),
            "wide8" => Ok(IndexType::Wide8),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_type_raw_round_trip() {
        for ntype in IndexType::ALL {
            assert_eq!(IndexType::from_raw(ntype.as_raw()), Some(ntype));
        }
        assert_eq!(IndexType::from_raw(0), None);
        assert_eq!(IndexType::from_raw(5), None);
    }

    #[test]
    fn index_type_name_round_trip() {
        for ntype in IndexType::ALL {
            assert_eq!(ntype.name().parse(), Ok(ntype));
        }
        assert!("gram4".parse::<IndexType>().is_err());
    }

    #[test]
    fn trigram_masks_to_24_bits() {
        assert_eq!(TriGram::new(0xFF_AA_BB_CC).as_u32(), 0xAA_BB_CC);
    }
}
