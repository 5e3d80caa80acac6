//! Glob pattern index: filename pattern → owning MIME type.
//!
//! A later insertion for a pattern silently replaces the earlier owner, which
//! is what gives override fragments the last word on glob ownership.

use std::collections::BTreeMap;
use std::io::{self, Write};

use crate::format::GLOBS_HEADER;

/// Flat mapping from glob pattern to the `media/subtype` name that owns it.
/// Ordered so the emitted index is deterministic across runs.
#[derive(Debug, Default)]
pub struct GlobIndex {
    patterns: BTreeMap<String, String>,
}

impl GlobIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `pattern` as belonging to `type_name`, replacing any previous owner.
    pub fn insert(&mut self, pattern: &str, type_name: &str) {
        self.patterns.insert(pattern.to_owned(), type_name.to_owned());
    }

    /// The type currently owning `pattern`, if any.
    pub fn owner(&self, pattern: &str) -> Option<&str> {
        self.patterns.get(pattern).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// (pattern, owning type) pairs in index order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.patterns.iter().map(|(p, t)| (p.as_str(), t.as_str()))
    }

    /// Write the globs index file: header comment, then one
    /// `media/subtype:pattern` line per entry in index order.
    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_all(GLOBS_HEADER.as_bytes())?;
        for (pattern, type_name) in self.iter() {
            writeln!(out, "{}:{}", type_name, pattern)?;
        }
        Ok(())
    }
}
