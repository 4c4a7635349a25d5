//! Error types for the engine.
//!
//! Uses thiserror for ergonomic error handling with proper
//! error chain propagation. Each subsystem gets its own enum; the
//! top-level [`ServerError`] is what crosses the dispatch boundary and
//! becomes an error response.

use std::path::PathBuf;
use thiserror::Error;

use crate::types::IndexType;

/// Top-level error, converted into an error [`Response`](crate::response::Response)
/// at the dispatch boundary.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("{0}")]
    Lock(#[from] LockError),

    #[error("Database error: {0}")]
    Db(#[from] DbError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ServerError {
    /// True when the client is expected to retry the same request later
    /// (lock contention, not a real failure).
    #[must_use]
    pub fn is_retry(&self) -> bool {
        matches!(self, ServerError::Lock(_))
    }
}

/// Errors of the on-disk index format and its readers/writers.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("corrupted index, file is too small: {path}")]
    TooSmall { path: PathBuf },

    #[error("invalid magic, not an index file: {path}")]
    BadMagic { path: PathBuf },

    #[error("unsupported index version {version}")]
    BadVersion { version: u32 },

    #[error("unknown index type tag {raw}")]
    BadType { raw: u32 },

    #[error("reserved header field is not zero")]
    BadReserved,

    #[error("corrupted index, invalid run boundaries in {path}")]
    CorruptRun { path: PathBuf },

    #[error("unexpected index type during merge: expected {expected}, got {got}")]
    MergeTypeMismatch { expected: IndexType, got: IndexType },

    #[error("bitmap index builder is full, file {fid} exceeds its capacity")]
    BuilderFull { fid: u32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors of the dataset layer (manifests, file lists, merging, builders).
#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("file name contains invalid character (either \\r or \\n): {0}")]
    InvalidFilename(String),

    #[error("empty file (nothing to index): {path}")]
    EmptyFile { path: PathBuf },

    #[error("failed to open {path}: {source}")]
    FileOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("merge requires at least 2 datasets")]
    NotEnoughDatasets,

    #[error("forced to compact but no single file was indexed")]
    NothingIndexed,

    #[error("datasets {left} and {right} have different taints")]
    TaintMismatch { left: String, right: String },

    #[error("datasets {left} and {right} contain indexes of different types")]
    TypeMismatch { left: String, right: String },

    #[error("dataset has no index of type {0}")]
    MissingIndexType(IndexType),

    #[error("unknown dataset: {0}")]
    UnknownDataset(String),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Command language parse errors. Always non-retry.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("unexpected end of command")]
    UnexpectedEnd,

    #[error("expected {expected} at offset {at}")]
    Expected { expected: String, at: usize },

    #[error("invalid escape sequence \\{0}")]
    InvalidEscape(char),

    #[error("invalid hex digit {0:?}")]
    InvalidHexDigit(char),

    #[error("number out of range: {0}")]
    NumberOutOfRange(String),

    #[error("unknown index type: {0}")]
    UnknownIndexType(String),

    #[error("string may not contain wildcards here")]
    WildcardInName,

    #[error("string is not valid utf-8")]
    InvalidUtf8String,

    #[error("trailing input after command")]
    TrailingInput,
}

/// Lock acquisition failure. Carries the retry semantics.
#[derive(Error, Debug)]
pub enum LockError {
    #[error("Can't acquire lock on {target}, try again later")]
    Busy { target: String },
}

/// Errors of the database catalog itself.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("database file already exists: {path}")]
    AlreadyExists { path: PathBuf },

    #[error("invalid object name: {0}")]
    InvalidName(String),

    #[error("unknown iterator: {0}")]
    UnknownIterator(String),

    #[error("unknown config key: {0}")]
    UnknownConfigKey(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ServerError>;
pub type IndexResult<T> = std::result::Result<T, IndexError>;
pub type DatasetResult<T> = std::result::Result<T, DatasetError>;
pub type ParseResult<T> = std::result::Result<T, ParseError>;
pub type DbResult<T> = std::result::Result<T, DbError>;
