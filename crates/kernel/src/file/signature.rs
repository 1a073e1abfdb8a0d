//! Magic-byte signature validation.
//!
//! Maps an extension to the byte prefixes its content must start with.
//! This stops a script renamed to `.jpg` from being stored as an image; it
//! is not a content scan.

use std::collections::HashMap;

/// Number of header bytes inspected.
pub const HEADER_LEN: usize = 8;

const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF];
const PNG: &[u8] = &[0x89, 0x50, 0x4E, 0x47];
const GIF87A: &[u8] = b"GIF87a";
const GIF89A: &[u8] = b"GIF89a";
const PDF: &[u8] = &[0x25, 0x50, 0x44, 0x46];
const ZIP: &[u8] = &[0x50, 0x4B, 0x03, 0x04];
const OLE2: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0];
const RIFF: &[u8] = &[0x52, 0x49, 0x46, 0x46];

/// Immutable extension → magic-prefix table.
///
/// Build once at startup and share behind an `Arc`; nothing mutates it.
#[derive(Debug, Clone)]
pub struct SignatureTable {
    signatures: HashMap<String, Vec<&'static [u8]>>,
}

impl SignatureTable {
    /// The built-in table covering common upload types.
    pub fn standard() -> Self {
        let entries: [(&str, &[&'static [u8]]); 9] = [
            ("jpg", &[JPEG]),
            ("jpeg", &[JPEG]),
            ("png", &[PNG]),
            ("gif", &[GIF87A, GIF89A]),
            ("pdf", &[PDF]),
            ("docx", &[ZIP]),
            ("xlsx", &[ZIP]),
            ("doc", &[OLE2]),
            ("webp", &[RIFF]),
        ];

        let signatures = entries
            .into_iter()
            .map(|(ext, sigs)| (ext.to_string(), sigs.to_vec()))
            .collect();

        Self { signatures }
    }

    /// Whether `extension` has any registered signature.
    pub fn has_signature(&self, extension: &str) -> bool {
        self.signatures.contains_key(extension)
    }

    /// Check `header` against the signatures registered for `extension`.
    ///
    /// `extension` must already be lower-cased. Extensions without a
    /// registered signature pass.
    pub fn matches(&self, extension: &str, header: &[u8]) -> bool {
        match self.signatures.get(extension) {
            Some(sigs) => sigs.iter().any(|sig| header.starts_with(sig)),
            None => true,
        }
    }

    /// Registered extensions, for diagnostics.
    pub fn extensions(&self) -> impl Iterator<Item = &str> {
        self.signatures.keys().map(String::as_str)
    }
}

impl Default for SignatureTable {
    fn default() -> Self {
        Self::standard()
    }
}
