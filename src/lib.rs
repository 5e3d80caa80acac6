//! mimedb — compiler for the shared MIME-info database.
//!
//! Merges declarative MIME-type fragments into a queryable database:
//! - **Format constants** (`format`): namespaces, the media-type set, magic header bytes.
//! - **Fragment documents** (`xml`): namespace-aware tree parser and writer.
//! - **Type registry** (`registry`): one merged record per type, override-aware.
//! - **Glob index** (`glob`): filename pattern → owning type, last writer wins.
//! - **Magic compiler** (`magic`): rule validation, value encoding, and the
//!   compiled binary sniffing database.
//! - **Driver** (`update`): whole-run scan/merge/emit, used by the
//!   `update-mime-database` binary.

pub mod format;
pub mod glob;
pub mod magic;
pub mod registry;
pub mod update;
pub mod xml;

pub use format::{FREEDESKTOP_NS, MAGIC_HEADER, MEDIA_TYPES, XML_NS};
pub use glob::GlobIndex;
pub use magic::{encode_value, sort_rules, write_magic_file, MagicError, MagicNode, MagicRule};
pub use registry::{RegistryError, TypeRecord, TypeRegistry};
pub use update::{update_mime_database, MimeDatabase, UpdateError};
pub use xml::{parse_document, write_document, Attribute, Element, XmlError, XmlNode};
