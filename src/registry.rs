//! Type registry: one merged record per MIME type, created on first
//! reference and mutated by every later fragment that names the same type.
//!
//! Records keep only what the generated per-type document needs: comments
//! (one per language, newest wins) and unrecognized fields copied through
//! verbatim. Globs and magic rules are sliced out during the merge and never
//! stored here.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::warn;

use crate::format::{FREEDESKTOP_NS, GENERATED_COMMENT, MEDIA_TYPES, XML_NS};
use crate::xml::{Element, XmlNode};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid MIME type '{0}' (expected media/subtype)")]
    InvalidTypeName(String),
}

/// Merged state for one MIME type: identity plus the field nodes preserved
/// for re-emission, in merge order.
#[derive(Debug)]
pub struct TypeRecord {
    pub media: String,
    pub subtype: String,
    fields: Vec<XmlNode>,
}

impl TypeRecord {
    /// The full `media/subtype` name.
    pub fn name(&self) -> String {
        format!("{}/{}", self.media, self.subtype)
    }

    /// Preserved field nodes, in merge order.
    pub fn fields(&self) -> &[XmlNode] {
        &self.fields
    }

    /// Append a field to the record. A freedesktop `comment` first evicts any
    /// existing comment in the same language (absent `xml:lang` is the
    /// default language), so the newest fragment's text wins.
    pub fn add_field(&mut self, node: XmlNode) {
        if let XmlNode::Element(ref elem) = node {
            if elem.is(FREEDESKTOP_NS, "comment") {
                let lang = elem.attr_ns(XML_NS, "lang");
                let replaced = self.fields.iter().position(|field| {
                    matches!(field, XmlNode::Element(old)
                        if old.is(FREEDESKTOP_NS, "comment")
                            && old.attr_ns(XML_NS, "lang") == lang)
                });
                if let Some(pos) = replaced {
                    self.fields.remove(pos);
                }
            }
        }
        self.fields.push(node);
    }

    /// Build the generated per-type document: `mime-type` root in the
    /// freedesktop namespace, a DO-NOT-EDIT comment, then the preserved
    /// fields.
    pub fn to_document(&self) -> Element {
        let mut root = Element::new(Some(FREEDESKTOP_NS), "mime-type");
        root.set_attr("type", &self.name());
        root.children.push(XmlNode::Comment(GENERATED_COMMENT.to_owned()));
        root.children.extend(self.fields.iter().cloned());
        root
    }
}

/// Ordered map of type name → merged record; iteration (and thus emission)
/// order is deterministic.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: BTreeMap<String, TypeRecord>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up or create the record for `name`, which must contain exactly
    /// one `/`. An unknown media prefix is accepted with a warning.
    pub fn get_or_create(&mut self, name: &str) -> Result<&mut TypeRecord, RegistryError> {
        let (media, subtype) = split_type_name(name)
            .ok_or_else(|| RegistryError::InvalidTypeName(name.to_owned()))?;
        if !self.types.contains_key(name) && !MEDIA_TYPES.contains(&media) {
            warn!("unknown media type in type '{}'", name);
        }
        Ok(self
            .types
            .entry(name.to_owned())
            .or_insert_with(|| TypeRecord {
                media: media.to_owned(),
                subtype: subtype.to_owned(),
                fields: Vec::new(),
            }))
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut TypeRecord> {
        self.types.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Records in name order.
    pub fn iter(&self) -> impl Iterator<Item = &TypeRecord> {
        self.types.values()
    }
}

/// Split `media/subtype`, rejecting names without exactly one separator.
fn split_type_name(name: &str) -> Option<(&str, &str)> {
    let (media, subtype) = name.split_once('/')?;
    if media.is_empty() || subtype.is_empty() || subtype.contains('/') {
        return None;
    }
    Some((media, subtype))
}
