//! The closed set of commands understood by the engine.
//!
//! Commands are produced by the parser, pretty-printed by the `Display`
//! impls (the two are mutual inverses), and executed by the dispatch
//! shell.

use std::collections::BTreeSet;
use std::fmt;

use crate::query::Query;
use crate::types::IndexType;

/// Index types used when an `index` command doesn't name any.
#[must_use]
pub fn default_index_types() -> Vec<IndexType> {
    vec![IndexType::Gram3]
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectCommand {
    pub query: Query,
    pub taints: BTreeSet<String>,
    pub datasets: BTreeSet<String>,
    pub use_iterator: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexCommand {
    pub paths: Vec<String>,
    pub types: Vec<IndexType>,
    pub ensure_unique: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexFromCommand {
    pub list_file: String,
    pub types: Vec<IndexType>,
    pub ensure_unique: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IteratorPopCommand {
    pub iterator_id: String,
    pub how_many: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReindexCommand {
    pub dataset_id: String,
    pub types: Vec<IndexType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactType {
    All,
    Smart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaintMode {
    Add,
    Clear,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaintCommand {
    pub dataset_id: String,
    pub mode: TaintMode,
    pub taint: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Select(SelectCommand),
    Index(IndexCommand),
    IndexFrom(IndexFromCommand),
    IteratorPop(IteratorPopCommand),
    Reindex(ReindexCommand),
    Compact(CompactType),
    ConfigGet(Vec<String>),
    ConfigSet(String, u64),
    Taint(TaintCommand),
    DatasetDrop(String),
    Status,
    Topology,
    Ping,
}

/// Quotes a string for the command language, escaping as needed.
fn write_quoted(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_str("\"")?;
    for byte in s.bytes() {
        match byte {
            b'"' => f.write_str("\\\"")?,
            b'\\' => f.write_str("\\\\")?,
            b'\n' => f.write_str("\\n")?,
            b'\r' => f.write_str("\\r")?,
            b'\t' => f.write_str("\\t")?,
            0x20..=0x7E => write!(f, "{}", byte as char)?,
            _ => write!(f, "\\x{byte:02x}")?,
        }
    }
    f.write_str("\"")
}

fn write_quoted_list(f: &mut fmt::Formatter<'_>, items: &BTreeSet<String>) -> fmt::Result {
    f.write_str("[")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write_quoted(f, item)?;
    }
    f.write_str("]")
}

fn write_type_list(f: &mut fmt::Formatter<'_>, types: &[IndexType]) -> fmt::Result {
    f.write_str("[")?;
    for (i, ntype) in types.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        f.write_str(ntype.name())?;
    }
    f.write_str("]")
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Select(cmd) => {
                f.write_str("select")?;
                if !cmd.taints.is_empty() {
                    f.write_str(" with taints ")?;
                    write_quoted_list(f, &cmd.taints)?;
                }
                if !cmd.datasets.is_empty() {
                    f.write_str(" with datasets ")?;
                    write_quoted_list(f, &cmd.datasets)?;
                }
                if cmd.use_iterator {
                    f.write_str(" into iterator")?;
                }
                write!(f, " {};", cmd.query)
            }
            Command::Index(cmd) => {
                f.write_str("index")?;
                for path in &cmd.paths {
                    f.write_str(" ")?;
                    write_quoted(f, path)?;
                }
                f.write_str(" with ")?;
                write_type_list(f, &cmd.types)?;
                if !cmd.ensure_unique {
                    f.write_str(" nocheck")?;
                }
                f.write_str(";")
            }
            Command::IndexFrom(cmd) => {
                f.write_str("index from list ")?;
                write_quoted(f, &cmd.list_file)?;
                f.write_str(" with ")?;
                write_type_list(f, &cmd.types)?;
                if !cmd.ensure_unique {
                    f.write_str(" nocheck")?;
                }
                f.write_str(";")
            }
            Command::IteratorPop(cmd) => {
                f.write_str("iterator ")?;
                write_quoted(f, &cmd.iterator_id)?;
                write!(f, " pop {};", cmd.how_many)
            }
            Command::Reindex(cmd) => {
                f.write_str("reindex ")?;
                write_quoted(f, &cmd.dataset_id)?;
                f.write_str(" with ")?;
                write_type_list(f, &cmd.types)?;
                f.write_str(";")
            }
            Command::Compact(CompactType::All) => f.write_str("compact all;"),
            Command::Compact(CompactType::Smart) => f.write_str("compact smart;"),
            Command::ConfigGet(keys) => {
                f.write_str("config get")?;
                for key in keys {
                    f.write_str(" ")?;
                    write_quoted(f, key)?;
                }
                f.write_str(";")
            }
            Command::ConfigSet(key, value) => {
                f.write_str("config set ")?;
                write_quoted(f, key)?;
                write!(f, " {value};")
            }
            Command::Taint(cmd) => {
                f.write_str("dataset ")?;
                write_quoted(f, &cmd.dataset_id)?;
                match cmd.mode {
                    TaintMode::Add => f.write_str(" taint ")?,
                    TaintMode::Clear => f.write_str(" untaint ")?,
                }
                write_quoted(f, &cmd.taint)?;
                f.write_str(";")
            }
            Command::DatasetDrop(dataset_id) => {
                f.write_str("dataset ")?;
                write_quoted(f, dataset_id)?;
                f.write_str(" drop;")
            }
            Command::Status => f.write_str("status;"),
            Command::Topology => f.write_str("topology;"),
            Command::Ping => f.write_str("ping;"),
        }
    }
}
