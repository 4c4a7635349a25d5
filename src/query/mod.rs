//! The user-facing query model.
//!
//! A query is a tree of literals combined with and/or/min-of. A literal
//! is a [`QString`]: a sequence of tokens, each enumerating the byte
//! values allowed at that position (a single byte, a nibble wildcard, a
//! full wildcard, or an explicit alternative set).

mod graph;
mod plan;
mod result;

pub mod parser;

pub use graph::QueryGraph;
pub use plan::{QueryPlan, QueryPlanSet};
pub use result::{QueryCounter, QueryCounters, QueryResult};

use std::fmt;

/// A single position of a query literal: the sorted set of byte values
/// that may occur there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QToken {
    opts: Vec<u8>,
}

impl QToken {
    /// A token with exactly one possible value.
    #[must_use]
    pub fn single(val: u8) -> Self {
        Self { opts: vec![val] }
    }

    /// A token of the form `X?`: fixed high nibble, any low nibble.
    #[must_use]
    pub fn low_wildcard(high: u8) -> Self {
        debug_assert_eq!(high & 0x0F, 0);
        Self {
            opts: (0..16).map(|i| high | i).collect(),
        }
    }

    /// A token of the form `?X`: any high nibble, fixed low nibble.
    #[must_use]
    pub fn high_wildcard(low: u8) -> Self {
        debug_assert_eq!(low & 0xF0, 0);
        Self {
            opts: (0..16).map(|i| (i << 4) | low).collect(),
        }
    }

    /// A full wildcard (`??`), all 256 values.
    #[must_use]
    pub fn wildcard() -> Self {
        Self {
            opts: (0..=255).collect(),
        }
    }

    /// A token with an explicit option list. Input is sorted and deduped.
    #[must_use]
    pub fn with_values(mut values: Vec<u8>) -> Self {
        values.sort_unstable();
        values.dedup();
        Self { opts: values }
    }

    #[must_use]
    pub fn possible_values(&self) -> &[u8] {
        &self.opts
    }

    #[must_use]
    pub fn num_possible_values(&self) -> u64 {
        self.opts.len() as u64
    }

    /// The value of a fully concrete token, `None` otherwise.
    #[must_use]
    pub fn single_value(&self) -> Option<u8> {
        match self.opts.as_slice() {
            [val] => Some(*val),
            _ => None,
        }
    }
}

/// A query literal: a sequence of tokens.
pub type QString = Vec<QToken>;

/// Builds a fully concrete QString out of plain bytes.
#[must_use]
pub fn qstring_from_bytes(bytes: &[u8]) -> QString {
    bytes.iter().copied().map(QToken::single).collect()
}

/// The query tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// A literal byte pattern.
    Literal(QString),
    /// Matches files matching every subquery.
    And(Vec<Query>),
    /// Matches files matching any subquery.
    Or(Vec<Query>),
    /// Matches files matching at least `count` subqueries.
    MinOf(u32, Vec<Query>),
}

impl Query {
    #[must_use]
    pub fn literal(qstr: QString) -> Self {
        Query::Literal(qstr)
    }
}

fn write_token(f: &mut fmt::Formatter<'_>, token: &QToken) -> fmt::Result {
    let opts = token.possible_values();
    if let Some(val) = token.single_value() {
        return write!(f, "{val:02X}");
    }
    if opts.len() == 256 {
        return f.write_str("??");
    }
    if opts.len() == 16 {
        // Try both nibble-wildcard shapes before falling back to an
        // explicit alternative list.
        let high = opts[0] & 0xF0;
        if opts.iter().enumerate().all(|(i, &o)| o == high | i as u8) {
            return write!(f, "{:X}?", high >> 4);
        }
        let low = opts[0] & 0x0F;
        if opts
            .iter()
            .enumerate()
            .all(|(i, &o)| o == ((i as u8) << 4) | low)
        {
            return write!(f, "?{low:X}");
        }
    }
    f.write_str("(")?;
    for (i, &opt) in opts.iter().enumerate() {
        if i > 0 {
            f.write_str(" | ")?;
        }
        write!(f, "{opt:02X}")?;
    }
    f.write_str(")")
}

impl fmt::Display for Query {
    /// Pretty-prints the query in command-language syntax. Literals are
    /// rendered as hex strings, which every token shape can express.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Query::Literal(qstr) => {
                f.write_str("{")?;
                for (i, token) in qstr.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write_token(f, token)?;
                }
                f.write_str("}")
            }
            Query::And(queries) => {
                f.write_str("(")?;
                for (i, query) in queries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" & ")?;
                    }
                    write!(f, "{query}")?;
                }
                f.write_str(")")
            }
            Query::Or(queries) => {
                f.write_str("(")?;
                for (i, query) in queries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" | ")?;
                    }
                    write!(f, "{query}")?;
                }
                f.write_str(")")
            }
            Query::MinOf(count, queries) => {
                write!(f, "min {count} of (")?;
                for (i, query) in queries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{query}")?;
                }
                f.write_str(")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_option_counts() {
        assert_eq!(QToken::single(0x41).num_possible_values(), 1);
        assert_eq!(QToken::low_wildcard(0x50).num_possible_values(), 16);
        assert_eq!(QToken::high_wildcard(0x03).num_possible_values(), 16);
        assert_eq!(QToken::wildcard().num_possible_values(), 256);
        assert_eq!(
            QToken::with_values(vec![3, 1, 3, 2]).possible_values(),
            [1, 2, 3].as_slice()
        );
    }

    #[test]
    fn nibble_wildcards_enumerate_the_right_bytes() {
        assert_eq!(
            QToken::low_wildcard(0x50).possible_values(),
            (0x50..=0x5F).collect::<Vec<u8>>().as_slice()
        );
        let high: Vec<u8> = (0..16).map(|i| (i << 4) | 0x03).collect();
        assert_eq!(QToken::high_wildcard(0x03).possible_values(), high.as_slice());
    }

    #[test]
    fn display_uses_hexstring_syntax() {
        let q = Query::Literal(vec![
            QToken::single(0x4D),
            QToken::wildcard(),
            QToken::low_wildcard(0x50),
            QToken::high_wildcard(0x03),
        ]);
        assert_eq!(q.to_string(), "{4D ?? 5? ?3}");
    }
}
