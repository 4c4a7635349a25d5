//! Recursive-descent parser for the command language.
//!
//! The grammar (commands terminated by `;`):
//!
//! ```text
//! command    := select | index | reindex | iterator | compact | dataset
//!             | config | status | topology | ping
//! select     := "select" ("with" "taints" [strings])?
//!                        ("with" "datasets" [strings])?
//!                        ("into" "iterator")? expression
//! expression := term (("&" | "|") term)*     -- "&" binds tighter
//! term       := plaintext | w plaintext | hexstring | "(" expression ")"
//!             | "min" N "of" "(" expression ("," expression)* ")"
//! hexstring  := "{" (hexbyte | "(" hexbyte ("|" hexbyte)* ")")* "}"
//! ```
//!
//! Plaintext supports the escapes `\xHH \n \t \r \b \f \\ \"`; hex bytes
//! support nibble wildcards (`?3`, `5?`, `??`).

use std::collections::BTreeSet;

use crate::command::{
    default_index_types, Command, CompactType, IndexCommand, IndexFromCommand, IteratorPopCommand,
    ReindexCommand, SelectCommand, TaintCommand, TaintMode,
};
use crate::error::{ParseError, ParseResult};
use crate::query::{QString, QToken, Query};
use crate::types::IndexType;

/// Parses one `;`-terminated command.
pub fn parse_command(input: &str) -> ParseResult<Command> {
    let mut parser = Parser::new(input);
    parser.skip_ws();
    let cmd = parser.command()?;
    parser.skip_ws();
    parser.expect_byte(b';')?;
    parser.skip_ws();
    if !parser.at_end() {
        return Err(ParseError::TrailingInput);
    }
    Ok(cmd)
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input: input.as_bytes(),
            pos: 0,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.input.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> ParseResult<u8> {
        let byte = self.peek().ok_or(ParseError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(byte)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\r' | b'\n')) {
            self.pos += 1;
        }
    }

    fn expect_byte(&mut self, expected: u8) -> ParseResult<()> {
        if self.peek() == Some(expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(ParseError::Expected {
                expected: format!("'{}'", expected as char),
                at: self.pos,
            })
        }
    }

    /// Consumes `keyword` if it is next and ends at a word boundary.
    fn try_keyword(&mut self, keyword: &str) -> bool {
        let bytes = keyword.as_bytes();
        if !self.input[self.pos..].starts_with(bytes) {
            return false;
        }
        let boundary = self
            .input
            .get(self.pos + bytes.len())
            .map_or(true, |&b| !b.is_ascii_alphanumeric() && b != b'_');
        if boundary {
            self.pos += bytes.len();
        }
        boundary
    }

    fn expect_keyword(&mut self, keyword: &str) -> ParseResult<()> {
        if self.try_keyword(keyword) {
            Ok(())
        } else {
            Err(ParseError::Expected {
                expected: format!("\"{keyword}\""),
                at: self.pos,
            })
        }
    }

    fn number(&mut self) -> ParseResult<u64> {
        let start = self.pos;
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(ParseError::Expected {
                expected: "number".to_string(),
                at: self.pos,
            });
        }
        let digits = std::str::from_utf8(&self.input[start..self.pos])
            .expect("digits are valid utf-8");
        digits
            .parse()
            .map_err(|_| ParseError::NumberOutOfRange(digits.to_string()))
    }

    fn hex_digit(&mut self) -> ParseResult<u8> {
        let byte = self.bump()?;
        match byte {
            b'0'..=b'9' => Ok(byte - b'0'),
            b'a'..=b'f' => Ok(byte - b'a' + 10),
            b'A'..=b'F' => Ok(byte - b'A' + 10),
            _ => Err(ParseError::InvalidHexDigit(byte as char)),
        }
    }

    /// One hex byte with optional nibble wildcards: `HH`, `?H`, `H?`, `??`.
    fn hexbyte(&mut self) -> ParseResult<QToken> {
        if self.peek() == Some(b'?') {
            self.pos += 1;
            if self.peek() == Some(b'?') {
                self.pos += 1;
                return Ok(QToken::wildcard());
            }
            let low = self.hex_digit()?;
            return Ok(QToken::high_wildcard(low));
        }
        let high = self.hex_digit()?;
        if self.peek() == Some(b'?') {
            self.pos += 1;
            return Ok(QToken::low_wildcard(high << 4));
        }
        let low = self.hex_digit()?;
        Ok(QToken::single((high << 4) | low))
    }

    /// A double-quoted string as a QString (escapes may create wildcards).
    fn plaintext(&mut self) -> ParseResult<QString> {
        self.expect_byte(b'"')?;
        let mut result = QString::new();
        loop {
            let byte = self.bump()?;
            match byte {
                b'"' => return Ok(result),
                b'\\' => {
                    let escaped = self.bump()?;
                    match escaped {
                        b'"' => result.push(QToken::single(b'"')),
                        b'\\' => result.push(QToken::single(b'\\')),
                        b'b' => result.push(QToken::single(0x08)),
                        b'f' => result.push(QToken::single(0x0C)),
                        b'n' => result.push(QToken::single(b'\n')),
                        b'r' => result.push(QToken::single(b'\r')),
                        b't' => result.push(QToken::single(b'\t')),
                        b'x' => result.push(self.hexbyte()?),
                        other => return Err(ParseError::InvalidEscape(other as char)),
                    }
                }
                0x20..=0x7E => result.push(QToken::single(byte)),
                _ => {
                    return Err(ParseError::Expected {
                        expected: "printable character or escape".to_string(),
                        at: self.pos - 1,
                    })
                }
            }
        }
    }

    /// A double-quoted string in a name position: fully concrete, utf-8.
    fn string(&mut self) -> ParseResult<String> {
        let qstr = self.plaintext()?;
        let mut bytes = Vec::with_capacity(qstr.len());
        for token in &qstr {
            bytes.push(token.single_value().ok_or(ParseError::WildcardInName)?);
        }
        String::from_utf8(bytes).map_err(|_| ParseError::InvalidUtf8String)
    }

    /// `["a", "b", ...]`, possibly empty.
    fn string_list(&mut self) -> ParseResult<Vec<String>> {
        self.expect_byte(b'[')?;
        let mut out = Vec::new();
        self.skip_ws();
        if self.peek() == Some(b']') {
            self.pos += 1;
            return Ok(out);
        }
        loop {
            self.skip_ws();
            out.push(self.string()?);
            self.skip_ws();
            match self.bump()? {
                b',' => continue,
                b']' => return Ok(out),
                _ => {
                    return Err(ParseError::Expected {
                        expected: "',' or ']'".to_string(),
                        at: self.pos - 1,
                    })
                }
            }
        }
    }

    /// `[gram3, text4, ...]`, possibly empty.
    fn index_type_list(&mut self) -> ParseResult<Vec<IndexType>> {
        self.expect_byte(b'[')?;
        let mut out = Vec::new();
        self.skip_ws();
        if self.peek() == Some(b']') {
            self.pos += 1;
            return Ok(out);
        }
        loop {
            self.skip_ws();
            let start = self.pos;
            while matches!(self.peek(), Some(b'a'..=b'z' | b'0'..=b'9')) {
                self.pos += 1;
            }
            let name = std::str::from_utf8(&self.input[start..self.pos])
                .expect("ascii range is valid utf-8");
            let ntype = name
                .parse::<IndexType>()
                .map_err(|()| ParseError::UnknownIndexType(name.to_string()))?;
            out.push(ntype);
            self.skip_ws();
            match self.bump()? {
                b',' => continue,
                b']' => return Ok(out),
                _ => {
                    return Err(ParseError::Expected {
                        expected: "',' or ']'".to_string(),
                        at: self.pos - 1,
                    })
                }
            }
        }
    }

    /// `{11 2F (3? | 45) ??}`
    fn hexstring(&mut self) -> ParseResult<QString> {
        self.expect_byte(b'{')?;
        let mut result = QString::new();
        loop {
            self.skip_ws();
            match self.peek().ok_or(ParseError::UnexpectedEnd)? {
                b'}' => {
                    self.pos += 1;
                    return Ok(result);
                }
                b'(' => {
                    self.pos += 1;
                    let mut values: Vec<u8> = Vec::new();
                    loop {
                        self.skip_ws();
                        let token = self.hexbyte()?;
                        values.extend_from_slice(token.possible_values());
                        self.skip_ws();
                        match self.bump()? {
                            b'|' => continue,
                            b')' => break,
                            _ => {
                                return Err(ParseError::Expected {
                                    expected: "'|' or ')'".to_string(),
                                    at: self.pos - 1,
                                })
                            }
                        }
                    }
                    result.push(QToken::with_values(values));
                }
                _ => result.push(self.hexbyte()?),
            }
        }
    }

    fn term(&mut self) -> ParseResult<Query> {
        self.skip_ws();
        match self.peek().ok_or(ParseError::UnexpectedEnd)? {
            b'"' => Ok(Query::Literal(self.plaintext()?)),
            b'w' if self.peek_at(1) == Some(b'"') => {
                self.pos += 1;
                let narrow = self.plaintext()?;
                let mut wide = QString::with_capacity(narrow.len() * 2);
                for token in narrow {
                    wide.push(token);
                    wide.push(QToken::single(0));
                }
                Ok(Query::Literal(wide))
            }
            b'{' => Ok(Query::Literal(self.hexstring()?)),
            b'(' => {
                self.pos += 1;
                let expr = self.expression()?;
                self.skip_ws();
                self.expect_byte(b')')?;
                Ok(expr)
            }
            b'm' => {
                self.expect_keyword("min")?;
                self.skip_ws();
                let count = self.number()?;
                let count = u32::try_from(count)
                    .map_err(|_| ParseError::NumberOutOfRange(count.to_string()))?;
                self.skip_ws();
                self.expect_keyword("of")?;
                self.skip_ws();
                self.expect_byte(b'(')?;
                let mut queries = vec![self.expression()?];
                loop {
                    self.skip_ws();
                    match self.bump()? {
                        b',' => queries.push(self.expression()?),
                        b')' => break,
                        _ => {
                            return Err(ParseError::Expected {
                                expected: "',' or ')'".to_string(),
                                at: self.pos - 1,
                            })
                        }
                    }
                }
                Ok(Query::MinOf(count, queries))
            }
            _ => Err(ParseError::Expected {
                expected: "string, hexstring, '(' or \"min\"".to_string(),
                at: self.pos,
            }),
        }
    }

    /// `&`-level: binds tighter than `|`.
    fn and_expression(&mut self) -> ParseResult<Query> {
        let mut terms = vec![self.term()?];
        loop {
            self.skip_ws();
            if self.peek() == Some(b'&') {
                self.pos += 1;
                terms.push(self.term()?);
            } else {
                break;
            }
        }
        Ok(if terms.len() == 1 {
            terms.pop().expect("nonempty")
        } else {
            Query::And(terms)
        })
    }

    fn expression(&mut self) -> ParseResult<Query> {
        let mut terms = vec![self.and_expression()?];
        loop {
            self.skip_ws();
            if self.peek() == Some(b'|') {
                self.pos += 1;
                terms.push(self.and_expression()?);
            } else {
                break;
            }
        }
        Ok(if terms.len() == 1 {
            terms.pop().expect("nonempty")
        } else {
            Query::Or(terms)
        })
    }

    fn select(&mut self) -> ParseResult<Command> {
        let mut taints = BTreeSet::new();
        let mut datasets = BTreeSet::new();
        let mut use_iterator = false;
        loop {
            self.skip_ws();
            if self.try_keyword("with") {
                self.skip_ws();
                if self.try_keyword("taints") {
                    self.skip_ws();
                    taints.extend(self.string_list()?);
                } else if self.try_keyword("datasets") {
                    self.skip_ws();
                    datasets.extend(self.string_list()?);
                } else {
                    return Err(ParseError::Expected {
                        expected: "\"taints\" or \"datasets\"".to_string(),
                        at: self.pos,
                    });
                }
            } else if self.try_keyword("into") {
                self.skip_ws();
                self.expect_keyword("iterator")?;
                use_iterator = true;
            } else {
                break;
            }
        }
        let query = self.expression()?;
        Ok(Command::Select(SelectCommand {
            query,
            taints,
            datasets,
            use_iterator,
        }))
    }

    fn index(&mut self) -> ParseResult<Command> {
        self.skip_ws();
        let mut paths = Vec::new();
        let mut list_file = None;
        if self.try_keyword("from") {
            self.skip_ws();
            self.expect_keyword("list")?;
            self.skip_ws();
            list_file = Some(self.string()?);
        } else {
            paths.push(self.string()?);
            loop {
                self.skip_ws();
                if self.peek() == Some(b'"') {
                    paths.push(self.string()?);
                } else {
                    break;
                }
            }
        }

        let mut types = default_index_types();
        let mut ensure_unique = true;
        loop {
            self.skip_ws();
            if self.try_keyword("with") {
                self.skip_ws();
                types = self.index_type_list()?;
            } else if self.try_keyword("nocheck") {
                ensure_unique = false;
            } else {
                break;
            }
        }

        Ok(match list_file {
            Some(list_file) => Command::IndexFrom(IndexFromCommand {
                list_file,
                types,
                ensure_unique,
            }),
            None => Command::Index(IndexCommand {
                paths,
                types,
                ensure_unique,
            }),
        })
    }

    fn command(&mut self) -> ParseResult<Command> {
        if self.try_keyword("select") {
            self.select()
        } else if self.try_keyword("index") {
            self.index()
        } else if self.try_keyword("reindex") {
            self.skip_ws();
            let dataset_id = self.string()?;
            self.skip_ws();
            self.expect_keyword("with")?;
            self.skip_ws();
            let types = self.index_type_list()?;
            Ok(Command::Reindex(ReindexCommand { dataset_id, types }))
        } else if self.try_keyword("iterator") {
            self.skip_ws();
            let iterator_id = self.string()?;
            self.skip_ws();
            self.expect_keyword("pop")?;
            self.skip_ws();
            let how_many = self.number()?;
            Ok(Command::IteratorPop(IteratorPopCommand {
                iterator_id,
                how_many,
            }))
        } else if self.try_keyword("compact") {
            self.skip_ws();
            if self.try_keyword("all") {
                Ok(Command::Compact(CompactType::All))
            } else if self.try_keyword("smart") {
                Ok(Command::Compact(CompactType::Smart))
            } else {
                Err(ParseError::Expected {
                    expected: "\"all\" or \"smart\"".to_string(),
                    at: self.pos,
                })
            }
        } else if self.try_keyword("dataset") {
            self.skip_ws();
            let dataset_id = self.string()?;
            self.skip_ws();
            if self.try_keyword("taint") {
                self.skip_ws();
                let taint = self.string()?;
                Ok(Command::Taint(TaintCommand {
                    dataset_id,
                    mode: TaintMode::Add,
                    taint,
                }))
            } else if self.try_keyword("untaint") {
                self.skip_ws();
                let taint = self.string()?;
                Ok(Command::Taint(TaintCommand {
                    dataset_id,
                    mode: TaintMode::Clear,
                    taint,
                }))
            } else if self.try_keyword("drop") {
                Ok(Command::DatasetDrop(dataset_id))
            } else {
                Err(ParseError::Expected {
                    expected: "\"taint\", \"untaint\" or \"drop\"".to_string(),
                    at: self.pos,
                })
            }
        } else if self.try_keyword("config") {
            self.skip_ws();
            if self.try_keyword("get") {
                let mut keys = Vec::new();
                loop {
                    self.skip_ws();
                    if self.peek() == Some(b'"') {
                        keys.push(self.string()?);
                    } else {
                        break;
                    }
                }
                Ok(Command::ConfigGet(keys))
            } else if self.try_keyword("set") {
                self.skip_ws();
                let key = self.string()?;
                self.skip_ws();
                let value = self.number()?;
                Ok(Command::ConfigSet(key, value))
            } else {
                Err(ParseError::Expected {
                    expected: "\"get\" or \"set\"".to_string(),
                    at: self.pos,
                })
            }
        } else if self.try_keyword("status") {
            Ok(Command::Status)
        } else if self.try_keyword("topology") {
            Ok(Command::Topology)
        } else if self.try_keyword("ping") {
            Ok(Command::Ping)
        } else {
            Err(ParseError::Expected {
                expected: "command".to_string(),
                at: self.pos,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::qstring_from_bytes;

    fn literal(bytes: &[u8]) -> Query {
        Query::Literal(qstring_from_bytes(bytes))
    }

    #[test]
    fn parses_simple_select() {
        let cmd = parse_command("select \"test\";").unwrap();
        match cmd {
            Command::Select(select) => {
                assert_eq!(select.query, literal(b"test"));
                assert!(select.taints.is_empty());
                assert!(!select.use_iterator);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let cmd = parse_command("select \"cat\" | \"dog\" & \"msm\" | \"monk\";").unwrap();
        let Command::Select(select) = cmd else {
            panic!("not a select");
        };
        assert_eq!(
            select.query,
            Query::Or(vec![
                literal(b"cat"),
                Query::And(vec![literal(b"dog"), literal(b"msm")]),
                literal(b"monk"),
            ])
        );
    }

    #[test]
    fn parses_escapes_and_hex() {
        let Command::Select(select) = parse_command("select \"a\\n\\x41\\\"\";").unwrap() else {
            panic!("not a select");
        };
        assert_eq!(select.query, literal(b"a\nA\""));
    }

    #[test]
    fn parses_wide_strings() {
        let Command::Select(select) = parse_command("select w\"ab\";").unwrap() else {
            panic!("not a select");
        };
        assert_eq!(select.query, literal(b"a\0b\0"));
    }

    #[test]
    fn parses_hexstring_wildcards() {
        let Command::Select(select) = parse_command("select { 4D ?? 5? ?3 (11 | 22) };").unwrap()
        else {
            panic!("not a select");
        };
        let Query::Literal(qstr) = select.query else {
            panic!("not a literal");
        };
        assert_eq!(qstr.len(), 5);
        assert_eq!(qstr[0].single_value(), Some(0x4D));
        assert_eq!(qstr[1].num_possible_values(), 256);
        let low = QToken::low_wildcard(0x50);
        let high = QToken::high_wildcard(0x03);
        assert_eq!(qstr[2].possible_values(), low.possible_values());
        assert_eq!(qstr[3].possible_values(), high.possible_values());
        assert_eq!(qstr[4].possible_values(), &[0x11, 0x22]);
    }

    #[test]
    fn parses_min_of() {
        let Command::Select(select) =
            parse_command("select min 2 of (\"a\", \"b\", \"c\");").unwrap()
        else {
            panic!("not a select");
        };
        assert_eq!(
            select.query,
            Query::MinOf(2, vec![literal(b"a"), literal(b"b"), literal(b"c")])
        );
    }

    #[test]
    fn parses_select_modifiers() {
        let Command::Select(select) = parse_command(
            "select with taints [\"a\", \"b\"] with datasets [\"ds\"] into iterator \"x\";",
        )
        .unwrap() else {
            panic!("not a select");
        };
        assert_eq!(select.taints.len(), 2);
        assert_eq!(select.datasets.len(), 1);
        assert!(select.use_iterator);
    }

    #[test]
    fn parses_index_commands() {
        let cmd = parse_command("index \"/tmp/a\" \"/tmp/b\" with [gram3, text4] nocheck;");
        let Ok(Command::Index(index)) = cmd else {
            panic!("not an index command: {cmd:?}");
        };
        assert_eq!(index.paths, vec!["/tmp/a", "/tmp/b"]);
        assert_eq!(index.types, vec![IndexType::Gram3, IndexType::Text4]);
        assert!(!index.ensure_unique);

        let cmd = parse_command("index from list \"/tmp/list.txt\";").unwrap();
        let Command::IndexFrom(index) = cmd else {
            panic!("not index from");
        };
        assert_eq!(index.list_file, "/tmp/list.txt");
        assert_eq!(index.types, default_index_types());
        assert!(index.ensure_unique);
    }

    #[test]
    fn parses_the_remaining_commands() {
        assert_eq!(parse_command("status;").unwrap(), Command::Status);
        assert_eq!(parse_command("topology;").unwrap(), Command::Topology);
        assert_eq!(parse_command("ping;").unwrap(), Command::Ping);
        assert_eq!(
            parse_command("compact all;").unwrap(),
            Command::Compact(CompactType::All)
        );
        assert_eq!(
            parse_command("iterator \"abc\" pop 17;").unwrap(),
            Command::IteratorPop(IteratorPopCommand {
                iterator_id: "abc".to_string(),
                how_many: 17,
            })
        );
        assert_eq!(
            parse_command("dataset \"xyz\" drop;").unwrap(),
            Command::DatasetDrop("xyz".to_string())
        );
        assert_eq!(
            parse_command("config set \"query_max_edge\" 8;").unwrap(),
            Command::ConfigSet("query_max_edge".to_string(), 8)
        );
    }

    #[test]
    fn rejects_malformed_commands() {
        assert!(parse_command("select \"a\"").is_err());
        assert!(parse_command("select;").is_err());
        assert!(parse_command("frobnicate;").is_err());
        assert!(parse_command("select \"a\"; trailing").is_err());
        assert!(parse_command("select {4G};").is_err());
        assert!(parse_command("dataset \"a\\x??\" drop;").is_err());
    }
}
