//! Small shared helpers: object id generation, timestamps, positioned
//! reads, rlimits.

use rand::Rng;
use std::fs::File;
use std::io;
use std::time::{SystemTime, UNIX_EPOCH};

/// Reads exactly `buf.len()` bytes at `offset` without touching the file
/// cursor (pread).
#[cfg(unix)]
pub fn pread_exact(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(not(unix))]
pub fn pread_exact(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::io::{Read, Seek, SeekFrom};
    let mut file = file;
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(buf)
}

/// Generates a random lowercase hex string of the given length.
///
/// Used for dataset/iterator ids; uniqueness is enforced separately by an
/// exclusive-create probe when names are allocated.
#[must_use]
pub fn random_hex_string(length: usize) -> String {
    const CHARSET: &[u8] = b"0123456789abcdef";
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

/// Milliseconds since the unix epoch, for task ETA bookkeeping.
#[must_use]
pub fn get_milli_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Raises `RLIMIT_NOFILE` so large databases can keep every index open.
///
/// A database holds one descriptor per index file, so big corpora easily
/// exceed the usual soft limit of 1024.
#[cfg(unix)]
pub fn fix_rlimit() {
    let limit = libc::rlimit {
        rlim_cur: 65535,
        rlim_max: 65535,
    };
    // Failure is not fatal, the server just won't scale as far.
    let rc = unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &limit) };
    if rc != 0 {
        tracing::warn!(
            "Failed to raise RLIMIT_NOFILE to 65535: {}",
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
pub fn fix_rlimit() {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_hex_has_requested_length_and_charset() {
        let s = random_hex_string(8);
        assert_eq!(s.len(), 8);
        assert!(s.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
