//! N-gram generators: byte windows to 24-bit grams.
//!
//! Each [`IndexType`] has its own generator. All of them stream over the
//! input and call back with one gram per valid window; types with a
//! restricted alphabet reset their window on the first byte that fails
//! their validator and only emit again once a full window of valid bytes
//! has accumulated.

use crate::types::{IndexType, TriGram};

/// Maps a byte of the base64-like alphabet `[A-Za-z0-9 \n]` to its 6-bit
/// value, or `None` for bytes outside the alphabet.
#[must_use]
pub fn b64_value(chr: u8) -> Option<u32> {
    const ALPHABET_SIZE: u32 = 26;
    match chr {
        b'A'..=b'Z' => Some(u32::from(chr - b'A')),
        b'a'..=b'z' => Some(u32::from(chr - b'a') + ALPHABET_SIZE),
        b'0'..=b'9' => Some(u32::from(chr - b'0') + 2 * ALPHABET_SIZE),
        b' ' => Some(2 * ALPHABET_SIZE + 10),
        b'\n' => Some(2 * ALPHABET_SIZE + 10 + 1),
        _ => None,
    }
}

/// Window validator: can `chr` occupy position `ndx` of a window of this
/// type? For unrestricted types this is always true.
#[must_use]
pub fn validates(ntype: IndexType, ndx: usize, chr: u8) -> bool {
    match ntype {
        IndexType::Gram3 | IndexType::Hash4 => true,
        IndexType::Text4 => b64_value(chr).is_some(),
        IndexType::Wide8 => {
            if ndx % 2 == 0 {
                b64_value(chr).is_some()
            } else {
                chr == 0
            }
        }
    }
}

/// Raw trigrams, three consecutive bytes packed big-endian.
pub fn gen_trigrams(data: &[u8], emit: &mut dyn FnMut(TriGram)) {
    if data.len() < 3 {
        return;
    }

    let mut gram3 = (u32::from(data[0]) << 8) | u32::from(data[1]);
    for &byte in &data[2..] {
        gram3 = ((gram3 & 0xFFFF) << 8) | u32::from(byte);
        emit(TriGram::new(gram3));
    }
}

/// Text 4-grams: four consecutive alphabet bytes, 6 bits each.
pub fn gen_b64grams(data: &[u8], emit: &mut dyn FnMut(TriGram)) {
    if data.len() < 4 {
        return;
    }

    let mut gram4: u32 = 0;
    let mut good_run: usize = 0;

    for &byte in data {
        match b64_value(byte) {
            Some(next) => {
                gram4 = ((gram4 << 6) + next) & 0xFF_FFFF;
                good_run += 1;
            }
            None => good_run = 0,
        }
        if good_run >= 4 {
            emit(TriGram::new(gram4));
        }
    }
}

/// Wide text 4-grams: alphabet bytes interleaved with NULs (UTF-16-LE
/// ASCII). Any byte breaking the pattern resets the window.
pub fn gen_wide_b64grams(data: &[u8], emit: &mut dyn FnMut(TriGram)) {
    if data.len() < 8 {
        return;
    }

    let mut gram4: u32 = 0;
    let mut good_run: usize = 0;

    for &byte in data {
        if good_run % 2 == 1 {
            if byte == 0 {
                good_run += 1;
            } else {
                good_run = 0;
            }

            if good_run >= 8 {
                emit(TriGram::new(gram4));
            }
        } else {
            match b64_value(byte) {
                Some(next) => {
                    gram4 = ((gram4 << 6) + next) & 0xFF_FFFF;
                    good_run += 1;
                }
                None => good_run = 0,
            }
        }
    }
}

/// Hashed 4-grams: XOR of the two overlapping trigrams of the window.
pub fn gen_h4grams(data: &[u8], emit: &mut dyn FnMut(TriGram)) {
    if data.len() < 4 {
        return;
    }

    let mut gram4: u32 = 0;

    for (offset, &byte) in data.iter().enumerate() {
        gram4 = ((gram4 & 0xFF_FFFF) << 8) | u32::from(byte);

        if offset >= 3 {
            emit(TriGram::new(((gram4 >> 8) & 0xFF_FFFF) ^ (gram4 & 0xFF_FFFF)));
        }
    }
}

/// Streams every gram of `data` under the given index type.
pub fn generate(ntype: IndexType, data: &[u8], emit: &mut dyn FnMut(TriGram)) {
    match ntype {
        IndexType::Gram3 => gen_trigrams(data, emit),
        IndexType::Text4 => gen_b64grams(data, emit),
        IndexType::Hash4 => gen_h4grams(data, emit),
        IndexType::Wide8 => gen_wide_b64grams(data, emit),
    }
}

/// Eager variant of [`generate`], mostly useful in tests and for
/// single-window conversions.
#[must_use]
pub fn all_grams(ntype: IndexType, data: &[u8]) -> Vec<TriGram> {
    let mut out = Vec::new();
    generate(ntype, data, &mut |gram| out.push(gram));
    out
}

/// Converts one concrete window (packed big-endian into a u64) to the gram
/// the given index type assigns to it, or `None` when the window is not
/// expressible in the type's charset.
#[must_use]
pub fn convert_gram(ntype: IndexType, window: u64) -> Option<TriGram> {
    let size = ntype.window_size();
    let mut bytes = [0u8; 8];
    for (i, byte) in bytes.iter_mut().take(size).enumerate() {
        *byte = (window >> ((size - 1 - i) * 8)) as u8;
    }
    all_grams(ntype, &bytes[..size]).into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gram3_pack(s: &[u8; 3]) -> TriGram {
        TriGram::new((u32::from(s[0]) << 16) | (u32::from(s[1]) << 8) | u32::from(s[2]))
    }

    fn text4_pack(s: &[u8; 4]) -> TriGram {
        let mut val = 0;
        for &c in s {
            val = (val << 6) | b64_value(c).unwrap();
        }
        TriGram::new(val)
    }

    #[test]
    fn pack_is_big_endian() {
        // Pay attention to the input, this covers unexpected sign extension.
        assert_eq!(gram3_pack(b"\xCC\xBB\xAA").as_u32(), 0xCC_BB_AA);
        assert_eq!(gram3_pack(b"\xAA\xBB\xCC").as_u32(), 0xAA_BB_CC);
        assert_eq!(gram3_pack(b"abc").as_u32(), 0x61_62_63);
    }

    #[test]
    fn trigrams_of_short_inputs() {
        assert!(all_grams(IndexType::Gram3, b"").is_empty());
        assert!(all_grams(IndexType::Gram3, b"a").is_empty());
        assert!(all_grams(IndexType::Gram3, b"aa").is_empty());
        assert_eq!(all_grams(IndexType::Gram3, b"abc"), vec![gram3_pack(b"abc")]);
        assert_eq!(
            all_grams(IndexType::Gram3, b"abcd"),
            vec![gram3_pack(b"abc"), gram3_pack(b"bcd")]
        );
    }

    #[test]
    fn text4_resets_on_invalid_bytes() {
        assert!(all_grams(IndexType::Text4, b"abc").is_empty());
        assert_eq!(
            all_grams(IndexType::Text4, b"abcd"),
            vec![text4_pack(b"abcd")]
        );
        assert!(all_grams(IndexType::Text4, b"abcd\xAA").len() <= 1);
        // The invalid byte kills the windows spanning it, nothing else.
        assert_eq!(
            all_grams(IndexType::Text4, b"abcde\xAAXghi"),
            vec![text4_pack(b"abcd"), text4_pack(b"bcde"), text4_pack(b"Xghi")]
        );
    }

    #[test]
    fn hash4_is_xor_of_trigrams() {
        assert!(all_grams(IndexType::Hash4, b"abc").is_empty());
        assert_eq!(
            all_grams(IndexType::Hash4, b"abcd"),
            vec![TriGram::new(
                gram3_pack(b"abc").as_u32() ^ gram3_pack(b"bcd").as_u32()
            )]
        );
        assert_eq!(
            all_grams(IndexType::Hash4, b"abcde"),
            vec![
                TriGram::new(gram3_pack(b"abc").as_u32() ^ gram3_pack(b"bcd").as_u32()),
                TriGram::new(gram3_pack(b"bcd").as_u32() ^ gram3_pack(b"cde").as_u32()),
            ]
        );
    }

    #[test]
    fn wide8_needs_interleaved_nuls() {
        assert!(all_grams(IndexType::Wide8, b"abcd").is_empty());
        assert!(all_grams(IndexType::Wide8, b"abcdefgh").is_empty());
        assert_eq!(
            all_grams(IndexType::Wide8, b"a\0b\0c\0d\0"),
            vec![text4_pack(b"abcd")]
        );
        assert_eq!(
            all_grams(IndexType::Wide8, b"a\0b\0c\0d\0e\0"),
            vec![text4_pack(b"abcd"), text4_pack(b"bcde")]
        );
        // A stray non-NUL odd byte resets the run.
        assert_eq!(
            all_grams(IndexType::Wide8, b"a\0b\0cXd\0e\0f\0g\0h\0"),
            vec![text4_pack(b"defg"), text4_pack(b"efgh")]
        );
    }

    #[test]
    fn convert_gram_round_trips_concrete_windows() {
        assert_eq!(
            convert_gram(IndexType::Gram3, 0x61_62_63),
            Some(TriGram::new(0x61_62_63))
        );
        assert_eq!(
            convert_gram(IndexType::Text4, u64::from_be_bytes(*b"\0\0\0\0abcd")),
            Some(text4_pack(b"abcd"))
        );
        // Bytes outside the text alphabet are not expressible.
        assert_eq!(
            convert_gram(IndexType::Text4, u64::from_be_bytes(*b"\0\0\0\0ab\xAAd")),
            None
        );
        assert_eq!(
            convert_gram(IndexType::Wide8, u64::from_be_bytes(*b"a\0b\0c\0d\0")),
            Some(text4_pack(b"abcd"))
        );
        assert_eq!(
            convert_gram(IndexType::Wide8, u64::from_be_bytes(*b"abcdefgh")),
            None
        );
    }

    #[test]
    fn validators_match_generator_charsets() {
        assert!(validates(IndexType::Gram3, 0, 0xFF));
        assert!(validates(IndexType::Text4, 2, b'x'));
        assert!(!validates(IndexType::Text4, 2, 0xFF));
        assert!(validates(IndexType::Wide8, 0, b'x'));
        assert!(validates(IndexType::Wide8, 1, 0));
        assert!(!validates(IndexType::Wide8, 1, b'x'));
    }
}
