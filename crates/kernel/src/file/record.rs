//! Upload requests, per-stage outcomes, and stored-file records.

use std::io::{self, Cursor, Read, Seek, SeekFrom};

use serde::{Deserialize, Serialize};

use crate::error::{FailureKind, FileError};

/// A readable, rewindable byte source.
pub trait ByteSource: Read + Seek + Send {}

impl<T: Read + Seek + Send> ByteSource for T {}

/// A single upload. Owns its byte source, which is released when the
/// request is dropped on every exit path.
pub struct UploadRequest {
    pub(crate) source: Box<dyn ByteSource>,
    pub(crate) file_name: String,
    pub(crate) folder: String,
    pub(crate) length: u64,
}

impl UploadRequest {
    /// Create a request with an explicitly declared length.
    pub fn new(
        source: impl ByteSource + 'static,
        file_name: impl Into<String>,
        folder: impl Into<String>,
        length: u64,
    ) -> Self {
        Self {
            source: Box::new(source),
            file_name: file_name.into(),
            folder: folder.into(),
            length,
        }
    }

    /// Create a request whose length is measured by seeking the source.
    pub fn measured(
        mut source: Box<dyn ByteSource>,
        file_name: impl Into<String>,
        folder: impl Into<String>,
    ) -> io::Result<Self> {
        let start = source.stream_position()?;
        let end = source.seek(SeekFrom::End(0))?;
        source.seek(SeekFrom::Start(start))?;
        Ok(Self {
            source,
            file_name: file_name.into(),
            folder: folder.into(),
            length: end.saturating_sub(start),
        })
    }

    /// Create a request over an in-memory buffer.
    pub fn from_bytes(
        data: impl Into<Vec<u8>>,
        file_name: impl Into<String>,
        folder: impl Into<String>,
    ) -> Self {
        let data = data.into();
        let length = data.len() as u64;
        Self::new(Cursor::new(data), file_name, folder, length)
    }

    /// Declared filename, untrusted.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Declared destination folder, untrusted.
    pub fn folder(&self) -> &str {
        &self.folder
    }

    /// Declared length in bytes.
    pub fn len(&self) -> u64 {
        self.length
    }

    /// Whether the declared length is zero.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

impl std::fmt::Debug for UploadRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadRequest")
            .field("file_name", &self.file_name)
            .field("folder", &self.folder)
            .field("length", &self.length)
            .finish()
    }
}

/// Upload pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStage {
    Received,
    SizeChecked,
    ExtensionChecked,
    SignatureChecked,
    Hashed,
    Inspected,
    Transformed,
    PathResolved,
    Written,
    Completed,
}

/// Outcome of one pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: UploadStage,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl StageResult {
    pub fn pass(stage: UploadStage) -> Self {
        Self {
            stage,
            passed: true,
            reason: None,
        }
    }

    pub fn fail(stage: UploadStage, reason: impl Into<String>) -> Self {
        Self {
            stage,
            passed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Result of an upload, returned to and persisted by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFileRecord {
    pub success: bool,
    /// Sanitized, unique on-disk name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// Extension with its leading dot, e.g. `.pdf`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    /// Path relative to the storage root, forward slashes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relative_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Hex SHA-256 of the bytes as received.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Stored size in bytes, after any transcoding.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    #[serde(default)]
    pub stages: Vec<StageResult>,
}

impl StoredFileRecord {
    /// A failed record carrying the error's safe message.
    pub fn from_error(error: &FileError, stages: Vec<StageResult>) -> Self {
        Self::failed(error.kind(), error.public_message(), stages)
    }

    /// A failed record with an explicit kind and message.
    pub fn failed(kind: FailureKind, message: impl Into<String>, stages: Vec<StageResult>) -> Self {
        Self {
            success: false,
            file_name: None,
            extension: None,
            relative_path: None,
            url: None,
            content_hash: None,
            mime_type: None,
            size: None,
            error: Some(message.into()),
            failure: Some(kind),
            stages,
        }
    }

    /// The stage at which processing stopped.
    pub fn last_stage(&self) -> Option<UploadStage> {
        self.stages.last().map(|s| s.stage)
    }
}
