//! Magic rule compiler: validation, value encoding and binary serialization
//! of the content-sniffing rules collected during the merge.
//!
//! Rules keep their offset/value/mask attributes as raw text until
//! serialization; a tree that fails to encode is dropped whole, never
//! partially written. The compiled file layout is fixed: other tools parse
//! it, so every byte here is load-bearing.

use std::io::{self, Write};

use thiserror::Error;
use tracing::warn;

use crate::format::{DEFAULT_PRIORITY, MAGIC_HEADER};
use crate::xml::Element;

/// Errors produced while collecting or encoding magic rules. All of them are
/// absorbed as skip-and-continue diagnostics by the callers.
#[derive(Debug, Error)]
pub enum MagicError {
    #[error("magic rule node is missing a required attribute (offset, type or value)")]
    InvalidTree,
    #[error("malformed {kind} '{text}'")]
    MalformedValue { kind: &'static str, text: String },
    #[error("unsupported magic value type '{0}'")]
    UnsupportedValueType(String),
    #[error("encoded value too long: {0} bytes (max 65535)")]
    ValueTooLong(usize),
}

/// One node of a sniffing rule tree. Children only match if this node
/// matched, so a tree is an OR over AND-chains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MagicNode {
    /// Offset attribute text, `start` or `start:end`.
    pub offset: String,
    /// Declared value type (`string`, `byte`, `big16`, `little32`, ...).
    pub value_type: String,
    /// Raw value text, escaped string or numeric literal.
    pub value: String,
    /// Raw mask text, if any. The mask value itself is never decoded; see
    /// the serializer.
    pub mask: Option<String>,
    pub children: Vec<MagicNode>,
}

/// A collected rule tree: priority and owning type from the root element,
/// plus the top-level match nodes (depth 0 in the compiled file).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MagicRule {
    /// Confidence ranking, 0–100; higher rules are probed first.
    pub priority: u32,
    /// Owning `media/subtype` name.
    pub type_name: String,
    pub matches: Vec<MagicNode>,
}

/// Check that every element under `parent` carries offset, type and value
/// attributes, recursively. A single miss anywhere invalidates the tree.
pub fn validate(parent: &Element) -> bool {
    parent.elements().all(|node| {
        node.attr("offset").is_some()
            && node.attr("type").is_some()
            && node.attr("value").is_some()
            && validate(node)
    })
}

/// Collect one `magic` element into an owned rule tree for `type_name`,
/// detaching it from its source document. Fails if any node in the tree is
/// missing a required attribute.
pub fn collect(field: &Element, type_name: &str) -> Result<MagicRule, MagicError> {
    if !validate(field) {
        return Err(MagicError::InvalidTree);
    }
    Ok(MagicRule {
        priority: priority_of(field),
        type_name: type_name.to_owned(),
        matches: field.elements().map(collect_node).collect(),
    })
}

fn collect_node(node: &Element) -> MagicNode {
    MagicNode {
        // Attributes checked by validate() before we get here.
        offset: node.attr("offset").unwrap_or_default().to_owned(),
        value_type: node.attr("type").unwrap_or_default().to_owned(),
        value: node.attr("value").unwrap_or_default().to_owned(),
        mask: node.attr("mask").map(str::to_owned),
        children: node.elements().map(collect_node).collect(),
    }
}

/// Priority from the rule root's `priority` attribute. Missing → default;
/// unparseable or outside 0–100 → warning and default.
fn priority_of(elem: &Element) -> u32 {
    let Some(text) = elem.attr("priority") else {
        return DEFAULT_PRIORITY;
    };
    match text.parse::<i64>() {
        Ok(p) if (0..=100).contains(&p) => p as u32,
        _ => {
            warn!("magic priority '{}' out of range, using {}", text, DEFAULT_PRIORITY);
            DEFAULT_PRIORITY
        }
    }
}

/// Sort rules into probe order: descending priority, ties broken by
/// ascending owning type name. Consumers stop at the first match, so this
/// ordering is a correctness requirement.
pub fn sort_rules(rules: &mut [MagicRule]) {
    rules.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.type_name.cmp(&b.type_name))
    });
}

/// Encode a rule value to the bytes the consumer compares against.
///
/// Numeric types take a strtol-style literal (optional sign, `0x` hex,
/// leading-zero octal, else decimal) which must consume the entire input;
/// only the low 8/16/32 bits are kept, big-endian. `string` values get
/// C-style backslash unescaping.
pub fn encode_value(value_type: &str, raw: &str) -> Result<Vec<u8>, MagicError> {
    if raw.is_empty() {
        return Err(MagicError::MalformedValue { kind: "empty value", text: String::new() });
    }
    if value_type.contains("16") {
        let n = parse_number(raw).ok_or_else(|| malformed("number", raw))?;
        Ok((n as u16).to_be_bytes().to_vec())
    } else if value_type.contains("32") {
        let n = parse_number(raw).ok_or_else(|| malformed("number", raw))?;
        Ok((n as u32).to_be_bytes().to_vec())
    } else if value_type == "byte" {
        let n = parse_number(raw).ok_or_else(|| malformed("number", raw))?;
        Ok(vec![n as u8])
    } else if value_type == "string" {
        Ok(unescape(raw))
    } else {
        Err(MagicError::UnsupportedValueType(value_type.to_owned()))
    }
}

fn malformed(kind: &'static str, text: &str) -> MagicError {
    MagicError::MalformedValue { kind, text: text.to_owned() }
}

/// strtol(…, 0)-style integer parse: optional sign, `0x`/`0X` hex,
/// leading-zero octal, else decimal. The whole input must be consumed.
fn parse_number(text: &str) -> Option<i64> {
    let s = text.trim_start();
    let (negative, s) = match s.as_bytes().first()? {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };
    let (digits, radix) = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        (hex, 16)
    } else if s.len() > 1 && s.starts_with('0') {
        (&s[1..], 8)
    } else {
        (s, 10)
    };
    let value = i64::from_str_radix(digits, radix).ok()?;
    Some(if negative { -value } else { value })
}

/// Decode C-style backslash escapes into raw bytes: `\n \r \b \t \f \v`,
/// 1–3 octal digits, `\x` plus up to two hex digits. Semantics follow
/// file(1): `\x` with no hex digits is a literal `x`, a trailing lone
/// backslash truncates the value, and any other escaped byte passes through.
fn unescape(raw: &str) -> Vec<u8> {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        i += 1;
        if c != b'\\' {
            out.push(c);
            continue;
        }
        let Some(&escaped) = bytes.get(i) else {
            break;
        };
        i += 1;
        match escaped {
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b'b' => out.push(0x08),
            b't' => out.push(b'\t'),
            b'f' => out.push(0x0c),
            b'v' => out.push(0x0b),
            b'0'..=b'7' => {
                let mut value = u32::from(escaped - b'0');
                for _ in 0..2 {
                    match bytes.get(i) {
                        Some(&d @ b'0'..=b'7') => {
                            value = (value << 3) | u32::from(d - b'0');
                            i += 1;
                        }
                        _ => break,
                    }
                }
                out.push(value as u8);
            }
            b'x' => match bytes.get(i).and_then(|&d| hex_digit(d)) {
                None => out.push(b'x'),
                Some(high) => {
                    i += 1;
                    let mut value = high;
                    if let Some(low) = bytes.get(i).and_then(|&d| hex_digit(d)) {
                        i += 1;
                        value = (value << 4) | low;
                    }
                    out.push(value as u8);
                }
            },
            other => out.push(other),
        }
    }
    out
}

fn hex_digit(c: u8) -> Option<u32> {
    (c as char).to_digit(16)
}

/// Multi-byte word size implied by the value type, a hint for byte-order
/// independent matching by the consumer. Unknown type names get a warning
/// here; they then fail value encoding and drop the rule.
fn word_size_of(value_type: &str) -> u32 {
    match value_type {
        "host16" => 2,
        "host32" => 4,
        "big16" | "big32" | "little16" | "little32" | "string" | "byte" => 1,
        other => {
            warn!("unknown magic type '{}'", other);
            1
        }
    }
}

/// Parse an offset attribute of the form `start` or `start:end`, returning
/// (range start, number of candidate start positions).
fn parse_offset(text: &str) -> Result<(u32, u32), MagicError> {
    let (start_text, end_text) = match text.split_once(':') {
        Some((s, e)) => (s, Some(e)),
        None => (text, None),
    };
    let start: u32 = start_text.parse().map_err(|_| malformed("offset", text))?;
    let range_length = match end_text {
        Some(e) => {
            let end: u32 = e.parse().map_err(|_| malformed("offset", text))?;
            end.checked_sub(start)
                .map(|d| d + 1)
                .ok_or_else(|| malformed("offset range", text))?
        }
        None => 1,
    };
    Ok((start, range_length))
}

/// Serialize the rule list to `out`: the 12-byte format header, then one
/// section per rule in list order. Rules that fail encoding are skipped
/// whole, with a diagnostic; the remaining rules are still written.
pub fn write_magic_file<W: Write>(out: &mut W, rules: &[MagicRule]) -> io::Result<()> {
    out.write_all(&MAGIC_HEADER)?;
    let mut buf = Vec::new();
    for rule in rules {
        buf.clear();
        match encode_rule(&mut buf, rule) {
            Ok(()) => out.write_all(&buf)?,
            Err(err) => warn!("skipping magic rule for '{}': {}", rule.type_name, err),
        }
    }
    Ok(())
}

fn encode_rule(buf: &mut Vec<u8>, rule: &MagicRule) -> Result<(), MagicError> {
    buf.extend_from_slice(format!("[{}:{}]\n", rule.priority, rule.type_name).as_bytes());
    for node in &rule.matches {
        encode_node(buf, node, 0)?;
    }
    Ok(())
}

fn encode_node(buf: &mut Vec<u8>, node: &MagicNode, depth: usize) -> Result<(), MagicError> {
    let (range_start, range_length) = parse_offset(&node.offset)?;
    let word_size = word_size_of(&node.value_type);
    let value = encode_value(&node.value_type, &node.value)?;
    if value.len() > usize::from(u16::MAX) {
        return Err(MagicError::ValueTooLong(value.len()));
    }

    buf.extend(std::iter::repeat(b'>').take(depth));
    buf.push(b'=');
    buf.extend_from_slice(&range_start.to_be_bytes());
    buf.extend_from_slice(&(value.len() as u16).to_be_bytes());
    buf.extend_from_slice(&value);
    if node.mask.is_some() {
        // The declared mask text is not decoded; consumers get an all-set
        // mask of the value's length. TODO: encode the real mask bytes once
        // a consumer needs more than "a mask applies here".
        buf.push(b'&');
        buf.extend(std::iter::repeat(0xffu8).take(value.len()));
    }
    if word_size != 1 {
        buf.extend_from_slice(format!("~{}", word_size).as_bytes());
    }
    if range_length != 1 {
        buf.extend_from_slice(format!("+{}", range_length).as_bytes());
    }
    buf.push(b'\n');

    for child in &node.children {
        encode_node(buf, child, depth + 1)?;
    }
    Ok(())
}
