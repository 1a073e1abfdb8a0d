//! Ingestion error types.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while ingesting, reading, or erasing stored files.
///
/// `Display` carries diagnostic detail for logs. Anything handed back to a
/// caller goes through [`FileError::public_message`] instead.
#[derive(Debug, Error)]
pub enum FileError {
    #[error("empty input")]
    EmptyInput,

    #[error("upload too large: {size} bytes (max {max} bytes)")]
    SizeExceeded { size: u64, max: u64 },

    #[error("file extension not allowed: {extension:?}")]
    DisallowedExtension { extension: String },

    #[error("content does not match the signature registered for .{extension}")]
    SignatureMismatch { extension: String },

    #[error("image could not be decoded: {details}")]
    CorruptImage { details: String },

    #[error("content rejected by inspector: {reason}")]
    Rejected { reason: String },

    /// The resolved path left the storage root. The sanitizers should make
    /// this unreachable for uploads.
    #[error("resolved path escapes storage root: {}", .path.display())]
    PathEscape { path: PathBuf },

    #[error("file not found: {path}")]
    NotFound { path: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
}

/// Serializable tag for a [`FileError`], carried in upload records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    EmptyInput,
    SizeExceeded,
    DisallowedExtension,
    SignatureMismatch,
    CorruptImage,
    Rejected,
    PathEscape,
    NotFound,
    Cancelled,
    IoFailure,
}

impl FileError {
    /// The taxonomy tag for this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            FileError::EmptyInput => FailureKind::EmptyInput,
            FileError::SizeExceeded { .. } => FailureKind::SizeExceeded,
            FileError::DisallowedExtension { .. } => FailureKind::DisallowedExtension,
            FileError::SignatureMismatch { .. } => FailureKind::SignatureMismatch,
            FileError::CorruptImage { .. } => FailureKind::CorruptImage,
            FileError::Rejected { .. } => FailureKind::Rejected,
            FileError::PathEscape { .. } => FailureKind::PathEscape,
            FileError::NotFound { .. } => FailureKind::NotFound,
            FileError::Cancelled => FailureKind::Cancelled,
            FileError::Io(_) => FailureKind::IoFailure,
        }
    }

    /// Caller-facing message. Never includes paths, OS error text, or the
    /// untrusted input that triggered the failure.
    pub fn public_message(&self) -> String {
        match self {
            FileError::EmptyInput => "No file provided".to_string(),
            FileError::SizeExceeded { max, .. } => {
                format!("File too large (max {max} bytes)")
            }
            FileError::DisallowedExtension { .. } => "File type not allowed".to_string(),
            FileError::SignatureMismatch { .. } => {
                "File content does not match its extension".to_string()
            }
            FileError::CorruptImage { .. } => "Image is corrupt or unsupported".to_string(),
            FileError::Rejected { .. } => "File rejected".to_string(),
            FileError::PathEscape { .. } => "Upload rejected".to_string(),
            FileError::NotFound { .. } => "File not found".to_string(),
            FileError::Cancelled => "Upload cancelled".to_string(),
            FileError::Io(_) => "Upload error".to_string(),
        }
    }

    /// Whether this error signals a broken internal invariant rather than
    /// bad input.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, FileError::PathEscape { .. })
    }
}

/// Result type alias using FileError.
pub type FileResult<T> = Result<T, FileError>;
