//! Command language tests: parse/pretty round trips and grammar edges.

use ursadb::command::Command;
use ursadb::query::parser::parse_command;

/// Parsing the pretty-printed form of a command must reproduce it.
fn assert_round_trip(text: &str) {
    let parsed = parse_command(text).unwrap_or_else(|err| panic!("parse {text:?}: {err}"));
    let printed = parsed.to_string();
    let reparsed = parse_command(&printed)
        .unwrap_or_else(|err| panic!("reparse {printed:?} (from {text:?}): {err}"));
    assert_eq!(parsed, reparsed, "round trip changed {text:?} -> {printed:?}");
}

#[test]
fn every_command_form_round_trips() {
    for text in [
        "select \"abc\";",
        "select w\"wide\";",
        "select { 11 22 33 };",
        "select { 4D ?? 5? ?3 (11 | 22 | 3?) };",
        "select \"a\" & \"b\" & \"c\";",
        "select \"a\" | \"b\" & \"c\";",
        "select (\"a\" | \"b\") & \"c\";",
        "select min 2 of (\"a\", \"b\", { FF });",
        "select with taints [\"t1\", \"t2\"] \"abc\";",
        "select with datasets [\"abcd1234\"] \"abc\";",
        "select with taints [\"t\"] with datasets [\"d\"] into iterator \"abc\";",
        "select into iterator \"needle\";",
        "select \"esc \\\\ \\\" \\n \\t \\x00 \\xff\";",
        "index \"/tmp/samples\";",
        "index \"/tmp/a\" \"/tmp/b\" with [gram3, text4, hash4, wide8];",
        "index \"/tmp/a\" nocheck;",
        "index from list \"/tmp/list.txt\" with [text4];",
        "reindex \"abcd1234\" with [gram3, wide8];",
        "iterator \"someid\" pop 100;",
        "compact all;",
        "compact smart;",
        "dataset \"abcd1234\" taint \"kot\";",
        "dataset \"abcd1234\" untaint \"kot\";",
        "dataset \"abcd1234\" drop;",
        "config get;",
        "config get \"query_max_edge\" \"query_max_ngram\";",
        "config set \"merge_max_datasets\" 5;",
        "status;",
        "topology;",
        "ping;",
    ] {
        assert_round_trip(text);
    }
}

#[test]
fn escapes_cover_the_whole_byte_range() {
    let Command::Select(select) =
        parse_command("select \"\\x00\\x7f\\x80\\xFF\";").unwrap()
    else {
        panic!("not a select");
    };
    let ursadb::query::Query::Literal(qstr) = select.query else {
        panic!("not a literal");
    };
    let bytes: Vec<u8> = qstr
        .iter()
        .map(|token| token.single_value().unwrap())
        .collect();
    assert_eq!(bytes, vec![0x00, 0x7F, 0x80, 0xFF]);
}

#[test]
fn whitespace_is_insignificant() {
    let dense = parse_command("select \"a\"&\"b\"|\"c\";").unwrap();
    let airy = parse_command("select  \"a\"  &  \"b\"  |  \"c\" ;").unwrap();
    assert_eq!(dense, airy);
}

#[test]
fn keywords_do_not_swallow_prefixes() {
    // "into" must not match the "in" of an identifier-looking string.
    assert!(parse_command("select intoiterator;").is_err());
    // "index" vs "reindex" resolve correctly.
    assert!(matches!(
        parse_command("reindex \"x\" with [gram3];").unwrap(),
        Command::Reindex(_)
    ));
}

#[test]
fn wide_strings_interleave_nuls_in_display() {
    let parsed = parse_command("select w\"ab\";").unwrap();
    // Wide literals print as hex strings; the NULs must be visible.
    assert_eq!(parsed.to_string(), "select {61 00 62 00};");
}
