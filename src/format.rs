//! Shared constants of the MIME database formats.
//!
//! Namespace URIs used by fragment documents, the fixed media-type set, and
//! the magic bytes of the compiled sniffing database. All multi-byte fields
//! in the magic file are big-endian.

/// Namespace of shared-mime-info fragment documents.
pub const FREEDESKTOP_NS: &str = "http://www.freedesktop.org/standards/shared-mime-info";

/// The reserved XML namespace (always bound to the `xml` prefix), used for `xml:lang`.
pub const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

/// Magic bytes at the start of the compiled magic file: "MIME-Magic\0\n".
pub const MAGIC_HEADER: [u8; 12] = *b"MIME-Magic\0\n";

/// Media prefixes the registry recognizes; other prefixes are accepted with a warning.
pub const MEDIA_TYPES: [&str; 9] = [
    "text",
    "application",
    "image",
    "audio",
    "inode",
    "video",
    "message",
    "model",
    "multipart",
];

/// Rule priority used when a magic element carries none, or an out-of-range one.
pub const DEFAULT_PRIORITY: u32 = 50;

/// Comment inserted at the top of every generated per-type document.
pub const GENERATED_COMMENT: &str =
    "Created automatically by update-mime-database. DO NOT EDIT!";

/// Header lines of the globs index file.
pub const GLOBS_HEADER: &str = "# This file was automatically generated by the\n\
                                # update-mime-database command. DO NOT EDIT!\n";
