//! Namespace-aware XML tree parser and writer for MIME-info fragment documents.
//!
//! Covers the subset shared-mime-info fragments use: elements, attributes,
//! text, comments, `xmlns` scoping and the predefined/character entities.
//! The prolog and doctype are skipped; CDATA sections are rejected.
//! Whitespace-only text between elements is dropped so the writer can
//! re-indent freely.

use std::collections::HashMap;
use std::fmt::Write as _;

use thiserror::Error;

use crate::format::XML_NS;

/// Errors produced while parsing a fragment document.
#[derive(Debug, Error)]
pub enum XmlError {
    #[error("unexpected end of document")]
    UnexpectedEof,
    #[error("syntax error at byte {0}: {1}")]
    Syntax(usize, &'static str),
    #[error("mismatched closing tag: expected </{expected}>, got </{got}>")]
    MismatchedTag { expected: String, got: String },
    #[error("undeclared namespace prefix '{0}'")]
    UndeclaredPrefix(String),
    #[error("invalid entity reference '&{0};'")]
    BadEntity(String),
}

/// One node of a parsed document: element, character data, or comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    Element(Element),
    Text(String),
    Comment(String),
}

/// An attribute with its namespace resolved to a URI (None = no namespace).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub ns: Option<String>,
    pub name: String,
    pub value: String,
}

/// An element with its namespace resolved to a URI. `xmlns` declarations are
/// consumed during parsing and re-derived by the writer; they never appear in
/// `attrs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub ns: Option<String>,
    pub name: String,
    pub attrs: Vec<Attribute>,
    pub children: Vec<XmlNode>,
}

impl Element {
    pub fn new(ns: Option<&str>, name: &str) -> Self {
        Element {
            ns: ns.map(str::to_owned),
            name: name.to_owned(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    /// True if the element has the given namespace URI and local name.
    pub fn is(&self, ns: &str, name: &str) -> bool {
        self.ns.as_deref() == Some(ns) && self.name == name
    }

    /// Value of a no-namespace attribute.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|a| a.ns.is_none() && a.name == name)
            .map(|a| a.value.as_str())
    }

    /// Value of an attribute in the given namespace (e.g. `xml:lang`).
    pub fn attr_ns(&self, ns: &str, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|a| a.ns.as_deref() == Some(ns) && a.name == name)
            .map(|a| a.value.as_str())
    }

    /// Set (or replace) a no-namespace attribute.
    pub fn set_attr(&mut self, name: &str, value: &str) {
        if let Some(attr) = self.attrs.iter_mut().find(|a| a.ns.is_none() && a.name == name) {
            attr.value = value.to_owned();
            return;
        }
        self.attrs.push(Attribute {
            ns: None,
            name: name.to_owned(),
            value: value.to_owned(),
        });
    }

    /// Child element nodes, in document order.
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            XmlNode::Element(e) => Some(e),
            _ => None,
        })
    }

    /// Concatenated text content of direct text children.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for node in &self.children {
            if let XmlNode::Text(t) = node {
                out.push_str(t);
            }
        }
        out
    }
}

/// Parse a complete document, returning its root element.
pub fn parse_document(source: &str) -> Result<Element, XmlError> {
    let mut parser = Parser { src: source, pos: 0 };
    parser.skip_prolog()?;
    let mut scope = Scope::default();
    scope.bindings.insert("xml".to_owned(), XML_NS.to_owned());
    let root = parser.parse_element(&scope)?;
    parser.skip_prolog()?; // trailing whitespace, comments, PIs
    if parser.pos < parser.src.len() {
        return Err(XmlError::Syntax(parser.pos, "trailing content after document element"));
    }
    Ok(root)
}

#[derive(Debug, Clone, Default)]
struct Scope {
    /// Prefix → namespace URI; the empty-string key is the default namespace.
    /// An empty URI unbinds.
    bindings: HashMap<String, String>,
}

impl Scope {
    fn lookup(&self, prefix: &str) -> Option<&str> {
        match self.bindings.get(prefix) {
            Some(uri) if !uri.is_empty() => Some(uri),
            _ => None,
        }
    }
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn bytes(&self) -> &'a [u8] {
        self.src.as_bytes()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes().get(self.pos).copied()
    }

    fn starts_with(&self, s: &str) -> bool {
        self.src[self.pos..].starts_with(s)
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\r' | b'\n')) {
            self.pos += 1;
        }
    }

    /// Skip whitespace, comments, processing instructions and a doctype,
    /// i.e. everything allowed around the document element.
    fn skip_prolog(&mut self) -> Result<(), XmlError> {
        loop {
            self.skip_whitespace();
            if self.starts_with("<?") {
                self.skip_until("?>")?;
            } else if self.starts_with("<!--") {
                self.skip_until("-->")?;
            } else if self.starts_with("<!DOCTYPE") {
                self.skip_doctype()?;
            } else {
                return Ok(());
            }
        }
    }

    fn skip_until(&mut self, end: &str) -> Result<(), XmlError> {
        match self.src[self.pos..].find(end) {
            Some(i) => {
                self.pos += i + end.len();
                Ok(())
            }
            None => Err(XmlError::UnexpectedEof),
        }
    }

    fn skip_doctype(&mut self) -> Result<(), XmlError> {
        // Skip to the closing '>', honouring an internal subset in brackets.
        let mut depth = 0i32;
        while let Some(c) = self.peek() {
            self.pos += 1;
            match c {
                b'[' => depth += 1,
                b']' => depth -= 1,
                b'>' if depth <= 0 => return Ok(()),
                _ => {}
            }
        }
        Err(XmlError::UnexpectedEof)
    }

    fn expect(&mut self, c: u8, what: &'static str) -> Result<(), XmlError> {
        match self.peek() {
            Some(got) if got == c => {
                self.pos += 1;
                Ok(())
            }
            Some(_) => Err(XmlError::Syntax(self.pos, what)),
            None => Err(XmlError::UnexpectedEof),
        }
    }

    fn read_name(&mut self) -> Result<&'a str, XmlError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            let ok = c.is_ascii_alphanumeric() || matches!(c, b'-' | b'_' | b'.' | b':') || c >= 0x80;
            if !ok {
                break;
            }
            self.pos += 1;
        }
        if self.pos == start {
            return Err(XmlError::Syntax(start, "expected a name"));
        }
        Ok(&self.src[start..self.pos])
    }

    fn read_attr_value(&mut self) -> Result<String, XmlError> {
        let quote = match self.peek() {
            Some(q @ (b'"' | b'\'')) => q,
            Some(_) => return Err(XmlError::Syntax(self.pos, "expected a quoted attribute value")),
            None => return Err(XmlError::UnexpectedEof),
        };
        self.pos += 1;
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == quote {
                let raw = &self.src[start..self.pos];
                self.pos += 1;
                return decode_entities(raw);
            }
            self.pos += 1;
        }
        Err(XmlError::UnexpectedEof)
    }

    fn parse_element(&mut self, scope: &Scope) -> Result<Element, XmlError> {
        self.expect(b'<', "expected '<'")?;
        let qname = self.read_name()?;
        let mut raw_attrs: Vec<(&'a str, String)> = Vec::new();
        let self_closing;
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some(b'/') => {
                    self.pos += 1;
                    self.expect(b'>', "expected '>' after '/'")?;
                    self_closing = true;
                    break;
                }
                Some(b'>') => {
                    self.pos += 1;
                    self_closing = false;
                    break;
                }
                Some(_) => {
                    let name = self.read_name()?;
                    self.skip_whitespace();
                    self.expect(b'=', "expected '=' after attribute name")?;
                    self.skip_whitespace();
                    let value = self.read_attr_value()?;
                    raw_attrs.push((name, value));
                }
                None => return Err(XmlError::UnexpectedEof),
            }
        }

        // New namespace scope if this element declares any.
        let mut local: Option<Scope> = None;
        for (name, value) in &raw_attrs {
            if *name == "xmlns" {
                local
                    .get_or_insert_with(|| scope.clone())
                    .bindings
                    .insert(String::new(), value.clone());
            } else if let Some(prefix) = name.strip_prefix("xmlns:") {
                local
                    .get_or_insert_with(|| scope.clone())
                    .bindings
                    .insert(prefix.to_owned(), value.clone());
            }
        }
        let scope = local.as_ref().unwrap_or(scope);

        let (ns, name) = resolve_element(scope, qname)?;
        let mut attrs = Vec::new();
        for (raw_name, value) in raw_attrs {
            if raw_name == "xmlns" || raw_name.starts_with("xmlns:") {
                continue;
            }
            let (ns, name) = resolve_attr(scope, raw_name)?;
            attrs.push(Attribute { ns, name, value });
        }

        let mut element = Element { ns, name, attrs, children: Vec::new() };
        if self_closing {
            return Ok(element);
        }

        loop {
            let text_start = self.pos;
            while let Some(c) = self.peek() {
                if c == b'<' {
                    break;
                }
                self.pos += 1;
            }
            if self.peek().is_none() {
                return Err(XmlError::UnexpectedEof);
            }
            let raw_text = &self.src[text_start..self.pos];
            if !raw_text.is_empty() {
                let text = decode_entities(raw_text)?;
                if !text.trim().is_empty() {
                    element.children.push(XmlNode::Text(text));
                }
            }

            if self.starts_with("</") {
                self.pos += 2;
                let close = self.read_name()?;
                self.skip_whitespace();
                self.expect(b'>', "expected '>' in closing tag")?;
                if close != qname {
                    return Err(XmlError::MismatchedTag {
                        expected: qname.to_owned(),
                        got: close.to_owned(),
                    });
                }
                return Ok(element);
            } else if self.starts_with("<!--") {
                self.pos += 4;
                let start = self.pos;
                self.skip_until("-->")?;
                let comment = &self.src[start..self.pos - 3];
                element.children.push(XmlNode::Comment(comment.to_owned()));
            } else if self.starts_with("<![") {
                return Err(XmlError::Syntax(self.pos, "CDATA sections are not supported"));
            } else if self.starts_with("<?") {
                self.skip_until("?>")?;
            } else {
                let child = self.parse_element(scope)?;
                element.children.push(XmlNode::Element(child));
            }
        }
    }
}

fn split_qname(qname: &str) -> (Option<&str>, &str) {
    match qname.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, qname),
    }
}

fn resolve_element(scope: &Scope, qname: &str) -> Result<(Option<String>, String), XmlError> {
    let (prefix, local) = split_qname(qname);
    let ns = match prefix {
        Some(p) => Some(
            scope
                .lookup(p)
                .ok_or_else(|| XmlError::UndeclaredPrefix(p.to_owned()))?
                .to_owned(),
        ),
        None => scope.lookup("").map(str::to_owned),
    };
    Ok((ns, local.to_owned()))
}

fn resolve_attr(scope: &Scope, qname: &str) -> Result<(Option<String>, String), XmlError> {
    let (prefix, local) = split_qname(qname);
    // Unlike elements, unprefixed attributes are never in the default namespace.
    let ns = match prefix {
        Some(p) => Some(
            scope
                .lookup(p)
                .ok_or_else(|| XmlError::UndeclaredPrefix(p.to_owned()))?
                .to_owned(),
        ),
        None => None,
    };
    Ok((ns, local.to_owned()))
}

fn decode_entities(raw: &str) -> Result<String, XmlError> {
    if !raw.contains('&') {
        return Ok(raw.to_owned());
    }
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(i) = rest.find('&') {
        out.push_str(&rest[..i]);
        let after = &rest[i + 1..];
        let end = after
            .find(';')
            .ok_or_else(|| XmlError::BadEntity(after.chars().take(8).collect()))?;
        let name = &after[..end];
        match name {
            "lt" => out.push('<'),
            "gt" => out.push('>'),
            "amp" => out.push('&'),
            "apos" => out.push('\''),
            "quot" => out.push('"'),
            _ => {
                let code = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
                    u32::from_str_radix(hex, 16).ok()
                } else if let Some(dec) = name.strip_prefix('#') {
                    dec.parse::<u32>().ok()
                } else {
                    None
                };
                let c = code
                    .and_then(char::from_u32)
                    .ok_or_else(|| XmlError::BadEntity(name.to_owned()))?;
                out.push(c);
            }
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Serialize a document rooted at `root`: XML header, 2-space indentation,
/// default-namespace declarations wherever an element's namespace differs
/// from its parent's.
pub fn write_document(root: &Element) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    write_element(&mut out, root, None, 0);
    out
}

fn write_element(out: &mut String, elem: &Element, inherited_ns: Option<&str>, depth: usize) {
    let indent = "  ".repeat(depth);
    out.push_str(&indent);
    out.push('<');
    out.push_str(&elem.name);
    if elem.ns.as_deref() != inherited_ns {
        match &elem.ns {
            Some(uri) => {
                let _ = write!(out, " xmlns=\"{}\"", escape_attr(uri));
            }
            None => out.push_str(" xmlns=\"\""),
        }
    }
    // Foreign-namespace attributes need prefixes: one declaration per
    // distinct URI, in first-use order.
    let mut foreign: Vec<&str> = Vec::new();
    for attr in &elem.attrs {
        if let Some(uri) = attr.ns.as_deref() {
            if uri != XML_NS && !foreign.contains(&uri) {
                foreign.push(uri);
            }
        }
    }
    for (index, uri) in foreign.iter().enumerate() {
        let _ = write!(out, " xmlns:{}=\"{}\"", foreign_prefix(index), escape_attr(uri));
    }
    for attr in &elem.attrs {
        match attr.ns.as_deref() {
            None => {
                let _ = write!(out, " {}=\"{}\"", attr.name, escape_attr(&attr.value));
            }
            Some(XML_NS) => {
                let _ = write!(out, " xml:{}=\"{}\"", attr.name, escape_attr(&attr.value));
            }
            Some(other) => {
                let index = foreign.iter().position(|uri| *uri == other).unwrap_or(0);
                let _ = write!(
                    out,
                    " {}:{}=\"{}\"",
                    foreign_prefix(index),
                    attr.name,
                    escape_attr(&attr.value)
                );
            }
        }
    }

    if elem.children.is_empty() {
        out.push_str("/>\n");
        return;
    }

    if elem.children.iter().all(|c| matches!(c, XmlNode::Text(_))) {
        out.push('>');
        for child in &elem.children {
            if let XmlNode::Text(t) = child {
                out.push_str(&escape_text(t));
            }
        }
        let _ = writeln!(out, "</{}>", elem.name);
        return;
    }

    out.push_str(">\n");
    for child in &elem.children {
        match child {
            XmlNode::Element(e) => write_element(out, e, elem.ns.as_deref(), depth + 1),
            XmlNode::Text(t) => {
                let _ = writeln!(out, "{}  {}", indent, escape_text(t.trim()));
            }
            XmlNode::Comment(c) => {
                let _ = writeln!(out, "{}  <!--{}-->", indent, c);
            }
        }
    }
    let _ = writeln!(out, "{}</{}>", indent, elem.name);
}

fn foreign_prefix(index: usize) -> String {
    if index == 0 {
        "ext".to_owned()
    } else {
        format!("ext{}", index + 1)
    }
}

fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

fn escape_attr(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\n' => out.push_str("&#10;"),
            '\t' => out.push_str("&#9;"),
            '\r' => out.push_str("&#13;"),
            _ => out.push(c),
        }
    }
    out
}
