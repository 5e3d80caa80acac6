//! Whole-run driver: scan fragment files, merge them into the in-memory
//! database, write the output artifacts and reconcile stale per-type files.
//!
//! One invocation recomputes the full merged state from all inputs; there is
//! no incremental path. Per-type records are written via write-then-rename so
//! concurrent readers never observe a partial file; the wholesale-regenerated
//! `globs` and `magic` files are written directly.

use std::fs;
use std::io::{self, BufWriter, Write as _};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

use crate::format::{FREEDESKTOP_NS, MEDIA_TYPES};
use crate::glob::GlobIndex;
use crate::magic::{self, MagicRule};
use crate::registry::{TypeRecord, TypeRegistry};
use crate::xml::{self, Element, XmlNode};

/// Fatal errors of a compiler run. Everything per-fragment, per-declaration
/// or per-rule is absorbed as a diagnostic instead.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("directory '{}' does not exist", .0.display())]
    MissingPackageDir(PathBuf),
    #[error("failed to open '{}' for writing: {source}", .path.display())]
    WriteFailed { path: PathBuf, source: io::Error },
}

/// In-memory state of one run: the three registries threaded through every
/// ingestion step, torn down when the run ends.
#[derive(Debug, Default)]
pub struct MimeDatabase {
    pub types: TypeRegistry,
    pub globs: GlobIndex,
    pub magic: Vec<MagicRule>,
}

impl MimeDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one fragment document into the database. Parse failures and
    /// schema mismatches skip the file with a diagnostic.
    pub fn load_fragment(&mut self, source: &str, filename: &str) {
        let root = match xml::parse_document(source) {
            Ok(root) => root,
            Err(err) => {
                warn!("failed to parse '{}': {}", filename, err);
                return;
            }
        };
        if !root.is(FREEDESKTOP_NS, "mime-info") {
            warn!(
                "wrong root element in '{}': expected ({},mime-info) but got ({},{})",
                filename,
                FREEDESKTOP_NS,
                root.ns.as_deref().unwrap_or("none"),
                root.name
            );
            return;
        }
        for decl in root.elements() {
            if !decl.is(FREEDESKTOP_NS, "mime-type") {
                warn!(
                    "wrong element in '{}': expected ({},mime-type) but got ({},{})",
                    filename,
                    FREEDESKTOP_NS,
                    decl.ns.as_deref().unwrap_or("none"),
                    decl.name
                );
                return;
            }
            self.load_declaration(decl);
        }
    }

    /// Merge one `mime-type` declaration: slice globs and magic rules out
    /// into their registries, copy everything else onto the type record.
    fn load_declaration(&mut self, decl: &Element) {
        let Some(type_name) = decl.attr("type") else {
            warn!("mime-type element has no 'type' attribute");
            return;
        };
        let type_name = match self.types.get_or_create(type_name) {
            Ok(record) => record.name(),
            Err(err) => {
                warn!("{}", err);
                return;
            }
        };

        for field in &decl.children {
            let XmlNode::Element(elem) = field else {
                continue;
            };
            if elem.ns.as_deref() == Some(FREEDESKTOP_NS)
                && self.process_freedesktop_field(&type_name, elem)
            {
                continue;
            }
            if let Some(record) = self.types.get_mut(&type_name) {
                record.add_field(XmlNode::Element(elem.clone()));
            }
        }
    }

    /// Handle a recognized freedesktop field, returning true if it was
    /// consumed. False means the caller copies it onto the record verbatim.
    fn process_freedesktop_field(&mut self, type_name: &str, field: &Element) -> bool {
        match field.name.as_str() {
            "glob" => match field.attr("pattern") {
                Some(pattern) => {
                    self.globs.insert(pattern, type_name);
                    true
                }
                None => {
                    warn!("glob element for '{}' has no pattern attribute", type_name);
                    false
                }
            },
            "magic" => {
                match magic::collect(field, type_name) {
                    Ok(rule) => self.magic.push(rule),
                    Err(err) => {
                        warn!("skipping invalid magic for type '{}': {}", type_name, err);
                    }
                }
                true
            }
            "comment" => false, // copied through, with same-language eviction
            other => {
                warn!("unknown freedesktop.org field '{}' in type '{}'", other, type_name);
                false
            }
        }
    }

    /// Write all output artifacts under `mime_dir` and delete per-type files
    /// for types no longer present.
    pub fn write_out(&mut self, mime_dir: &Path) -> Result<(), UpdateError> {
        delete_old_types(mime_dir, &self.types);
        for record in self.types.iter() {
            write_out_type(mime_dir, record);
        }
        write_globs(mime_dir, &self.globs)?;
        magic::sort_rules(&mut self.magic);
        write_magic(mime_dir, &self.magic)?;
        Ok(())
    }
}

/// Run the full compiler: merge every fragment in `<mime_dir>/packages` and
/// write the per-type records, globs index and compiled magic file under
/// `mime_dir`.
pub fn update_mime_database(mime_dir: &Path) -> Result<(), UpdateError> {
    let package_dir = mime_dir.join("packages");
    if !package_dir.is_dir() {
        return Err(UpdateError::MissingPackageDir(package_dir));
    }

    let mut db = MimeDatabase::new();
    for path in fragment_files(&package_dir)? {
        match fs::read_to_string(&path) {
            Ok(source) => db.load_fragment(&source, &path.display().to_string()),
            Err(err) => warn!("failed to read '{}': {}", path.display(), err),
        }
    }
    db.write_out(mime_dir)
}

/// Fragment files in merge order: `*.xml` ascending by name, with
/// `Override.xml` always last so it wins every conflict.
fn fragment_files(package_dir: &Path) -> Result<Vec<PathBuf>, UpdateError> {
    let mut names = Vec::new();
    let mut have_override = false;
    for entry in fs::read_dir(package_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !name.ends_with(".xml") {
            continue;
        }
        if name == "Override.xml" {
            have_override = true;
            continue;
        }
        names.push(name.to_owned());
    }
    names.sort();
    if have_override {
        names.push("Override.xml".to_owned());
    }
    Ok(names.into_iter().map(|n| package_dir.join(n)).collect())
}

/// Write one per-type record to `<root>/<media>/<subtype>.xml` via a
/// temporary `.xml.new` path and rename, so readers never see a partial
/// file. Failures are warnings; the run continues.
fn write_out_type(mime_dir: &Path, record: &TypeRecord) {
    let media_dir = mime_dir.join(&record.media);
    if let Err(err) = fs::create_dir_all(&media_dir) {
        warn!("failed to create '{}': {}", media_dir.display(), err);
        return;
    }

    let tmp_path = media_dir.join(format!("{}.xml.new", record.subtype));
    let final_path = media_dir.join(format!("{}.xml", record.subtype));
    let document = xml::write_document(&record.to_document());
    if let Err(err) = fs::write(&tmp_path, document) {
        warn!("failed to write out '{}': {}", tmp_path.display(), err);
        return;
    }
    if let Err(err) = fs::rename(&tmp_path, &final_path) {
        warn!(
            "failed to rename {} as {}: {}",
            tmp_path.display(),
            final_path.display(),
            err
        );
    }
}

fn write_globs(mime_dir: &Path, globs: &GlobIndex) -> Result<(), UpdateError> {
    let path = mime_dir.join("globs");
    let file = fs::File::create(&path)
        .map_err(|source| UpdateError::WriteFailed { path: path.clone(), source })?;
    let mut out = BufWriter::new(file);
    globs.write_to(&mut out)?;
    out.flush()?;
    Ok(())
}

fn write_magic(mime_dir: &Path, rules: &[MagicRule]) -> Result<(), UpdateError> {
    let path = mime_dir.join("magic");
    let file = fs::File::create(&path)
        .map_err(|source| UpdateError::WriteFailed { path: path.clone(), source })?;
    let mut out = BufWriter::new(file);
    magic::write_magic_file(&mut out, rules)?;
    out.flush()?;
    Ok(())
}

/// Delete previously emitted `<root>/<media>/*.xml` files whose type no
/// longer appears in the registry, so removed types do not linger between
/// runs.
fn delete_old_types(mime_dir: &Path, types: &TypeRegistry) {
    for media in MEDIA_TYPES {
        let Ok(entries) = fs::read_dir(mime_dir.join(media)) else {
            continue;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some(stem) = name.strip_suffix(".xml") else {
                continue;
            };
            if !types.contains(&format!("{}/{}", media, stem)) {
                let path = entry.path();
                info!("* Removing old info for type {}", path.display());
                if let Err(err) = fs::remove_file(&path) {
                    warn!("failed to remove '{}': {}", path.display(), err);
                }
            }
        }
    }
}
