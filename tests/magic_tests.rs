//! Magic compiler tests: value encoding, priority sort, and the compiled
//! binary layout.

use mimedb::{
    encode_value, magic, parse_document, sort_rules, write_magic_file, MagicNode, MagicRule,
    MAGIC_HEADER,
};

fn node(offset: &str, value_type: &str, value: &str) -> MagicNode {
    MagicNode {
        offset: offset.to_string(),
        value_type: value_type.to_string(),
        value: value.to_string(),
        mask: None,
        children: Vec::new(),
    }
}

fn rule(priority: u32, type_name: &str, matches: Vec<MagicNode>) -> MagicRule {
    MagicRule {
        priority,
        type_name: type_name.to_string(),
        matches,
    }
}

/// Numeric values are written big-endian regardless of the declared
/// byte order, truncated to the declared width.
#[test]
fn encode_numeric_values() {
    assert_eq!(encode_value("big32", "256").unwrap(), vec![0x00, 0x00, 0x01, 0x00]);
    assert_eq!(encode_value("little16", "0x0102").unwrap(), vec![0x01, 0x02]);
    assert_eq!(encode_value("host32", "1").unwrap(), vec![0x00, 0x00, 0x00, 0x01]);
    assert_eq!(encode_value("byte", "0xFF").unwrap(), vec![0xFF]);
    // strtol-style literals: leading zero is octal.
    assert_eq!(encode_value("byte", "010").unwrap(), vec![0x08]);
    // Negative values keep their low bits.
    assert_eq!(encode_value("byte", "-1").unwrap(), vec![0xFF]);
    assert_eq!(encode_value("big16", "-1").unwrap(), vec![0xFF, 0xFF]);
}

/// Numeric parsing must consume the entire input.
#[test]
fn encode_rejects_partial_numbers() {
    assert!(encode_value("big32", "12abc").is_err());
    assert!(encode_value("big16", "0x").is_err());
    assert!(encode_value("byte", "1 2").is_err());
    assert!(encode_value("byte", "").is_err());
}

/// Unknown declared types cannot be encoded.
#[test]
fn encode_rejects_unsupported_type() {
    let err = encode_value("wibble", "1").unwrap_err();
    assert!(err.to_string().contains("wibble"));
}

/// String values get C-style backslash unescaping, file(1) semantics.
#[test]
fn encode_string_escapes() {
    assert_eq!(encode_value("string", "a\\tb").unwrap(), vec![0x61, 0x09, 0x62]);
    assert_eq!(encode_value("string", "\\101BC").unwrap(), b"ABC".to_vec());
    assert_eq!(encode_value("string", "\\x41").unwrap(), b"A".to_vec());
    assert_eq!(encode_value("string", "\\377").unwrap(), vec![0xFF]);
    assert_eq!(encode_value("string", "\\7").unwrap(), vec![0x07]);
    // \x with no hex digits is a literal 'x'.
    assert_eq!(encode_value("string", "\\x=").unwrap(), b"x=".to_vec());
    // Any other escaped byte is copied through.
    assert_eq!(encode_value("string", "\\q\\\\").unwrap(), b"q\\".to_vec());
    // A trailing lone backslash truncates the value.
    assert_eq!(encode_value("string", "ab\\").unwrap(), b"ab".to_vec());
}

/// Rules sort by descending priority, ties by ascending owning type name.
#[test]
fn sort_descending_priority_then_type_name() {
    let mut rules = vec![
        rule(50, "a/z", vec![]),
        rule(20, "c/w", vec![]),
        rule(80, "b/x", vec![]),
        rule(50, "a/y", vec![]),
    ];
    sort_rules(&mut rules);
    let order: Vec<(u32, &str)> = rules.iter().map(|r| (r.priority, r.type_name.as_str())).collect();
    assert_eq!(order, vec![(80, "b/x"), (50, "a/y"), (50, "a/z"), (20, "c/w")]);
}

/// Full binary layout of one rule: header, section marker, then per-node
/// depth markers, big-endian offset and length, value bytes and the
/// word-size/range suffixes.
#[test]
fn write_compiled_layout() {
    let mut root = node("0", "string", "MZ");
    root.children.push(node("4:8", "string", "\\x7fELF"));
    let rules = vec![rule(50, "application/x-test", vec![root])];

    let mut out = Vec::new();
    write_magic_file(&mut out, &rules).unwrap();

    let mut expected = Vec::new();
    expected.extend_from_slice(&MAGIC_HEADER);
    expected.extend_from_slice(b"[50:application/x-test]\n");
    // Root node at depth 0: offset 0, value "MZ".
    expected.push(b'=');
    expected.extend_from_slice(&0u32.to_be_bytes());
    expected.extend_from_slice(&2u16.to_be_bytes());
    expected.extend_from_slice(b"MZ");
    expected.push(b'\n');
    // Child at depth 1: offset 4, range length 5, value 7f "ELF".
    expected.push(b'>');
    expected.push(b'=');
    expected.extend_from_slice(&4u32.to_be_bytes());
    expected.extend_from_slice(&4u16.to_be_bytes());
    expected.extend_from_slice(&[0x7F, b'E', b'L', b'F']);
    expected.extend_from_slice(b"+5");
    expected.push(b'\n');

    assert_eq!(out, expected);
}

/// A supplied mask is written as all-set bytes of the value's length; host
/// types carry a word-size suffix.
#[test]
fn write_mask_and_word_size() {
    let mut n = node("0", "host16", "0x0102");
    n.mask = Some("0xff00".to_string());
    let rules = vec![rule(40, "audio/x-test", vec![n])];

    let mut out = Vec::new();
    write_magic_file(&mut out, &rules).unwrap();

    let mut expected = Vec::new();
    expected.extend_from_slice(&MAGIC_HEADER);
    expected.extend_from_slice(b"[40:audio/x-test]\n");
    expected.push(b'=');
    expected.extend_from_slice(&0u32.to_be_bytes());
    expected.extend_from_slice(&2u16.to_be_bytes());
    expected.extend_from_slice(&[0x01, 0x02]);
    expected.push(b'&');
    expected.extend_from_slice(&[0xFF, 0xFF]);
    expected.extend_from_slice(b"~2");
    expected.push(b'\n');

    assert_eq!(out, expected);
}

/// A rule that fails value encoding is dropped whole; the rules around it
/// are still written.
#[test]
fn write_skips_unencodable_rule() {
    let rules = vec![
        rule(60, "text/x-good", vec![node("0", "string", "ok")]),
        rule(50, "text/x-bad", vec![node("0", "big32", "not-a-number")]),
        rule(40, "text/x-tail", vec![node("0", "byte", "7")]),
    ];

    let mut out = Vec::new();
    write_magic_file(&mut out, &rules).unwrap();
    let text = String::from_utf8_lossy(&out);

    assert!(text.contains("[60:text/x-good]"));
    assert!(!text.contains("x-bad"));
    assert!(text.contains("[40:text/x-tail]"));
}

/// A value whose encoding exceeds the u16 length field drops its tree; the
/// rules around it are still written.
#[test]
fn write_skips_oversized_value() {
    let oversized = "a".repeat(70_000);
    let rules = vec![
        rule(50, "text/x-big", vec![node("0", "string", &oversized)]),
        rule(50, "text/x-ok", vec![node("0", "byte", "1")]),
    ];

    let mut out = Vec::new();
    write_magic_file(&mut out, &rules).unwrap();
    let text = String::from_utf8_lossy(&out);

    assert!(!text.contains("x-big"));
    assert!(text.contains("[50:text/x-ok]"));
}

/// A bad offset attribute also drops only its own tree.
#[test]
fn write_skips_bad_offset() {
    let rules = vec![
        rule(50, "text/x-bad", vec![node("zero", "byte", "1")]),
        rule(50, "text/x-good", vec![node("12", "byte", "1")]),
    ];

    let mut out = Vec::new();
    write_magic_file(&mut out, &rules).unwrap();
    let text = String::from_utf8_lossy(&out);

    assert!(!text.contains("x-bad"));
    assert!(text.contains("[50:text/x-good]"));
}

/// A childless magic element validates trivially and compiles to just its
/// section marker, with no node lines.
#[test]
fn empty_magic_emits_marker_only() {
    let elem = parse_document("<magic/>").unwrap();
    let rule = magic::collect(&elem, "text/x-empty").unwrap();
    assert_eq!(rule.priority, 50);
    assert!(rule.matches.is_empty());

    let mut out = Vec::new();
    write_magic_file(&mut out, &[rule]).unwrap();

    let mut expected = MAGIC_HEADER.to_vec();
    expected.extend_from_slice(b"[50:text/x-empty]\n");
    assert_eq!(out, expected);
}

/// An empty rule list still yields the 12-byte format header.
#[test]
fn write_header_only() {
    let mut out = Vec::new();
    write_magic_file(&mut out, &[]).unwrap();
    assert_eq!(out, MAGIC_HEADER);
}
