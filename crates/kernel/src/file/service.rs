//! File ingestion service.
//!
//! Async façade over the blocking pipeline. Uploads and deletes run on
//! Tokio's blocking pool, bounded by a semaphore so one slow transcode
//! cannot starve other callers.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::inspect::{ContentInspector, NoopInspector};
use super::pipeline::Ingestor;
use super::record::{ByteSource, StageResult, StoredFileRecord, UploadRequest, UploadStage};
use super::signature::SignatureTable;
use super::storage::LocalFileStorage;
use crate::config::Config;
use crate::error::{FailureKind, FileError, FileResult};

/// File service for ingesting and managing stored uploads.
#[derive(Clone)]
pub struct FileService {
    ingestor: Arc<Ingestor>,
    workers: Arc<Semaphore>,
}

impl FileService {
    /// Create a new file service with the built-in signature table and no
    /// content inspector.
    pub fn new(config: &Config) -> io::Result<Self> {
        Self::with_inspector(config, Arc::new(NoopInspector))
    }

    /// Create a new file service with a content inspector.
    pub fn with_inspector(
        config: &Config,
        inspector: Arc<dyn ContentInspector>,
    ) -> io::Result<Self> {
        let ingestor = Ingestor::new(config, Arc::new(SignatureTable::standard()), inspector)?;
        Ok(Self {
            ingestor: Arc::new(ingestor),
            workers: Arc::new(Semaphore::new(config.upload_workers.max(1))),
        })
    }

    /// Upload a single file.
    pub async fn upload(&self, request: UploadRequest) -> StoredFileRecord {
        self.upload_with_cancel(request, CancellationToken::new())
            .await
    }

    /// Upload a single file, abandoning it between stages once `cancel`
    /// fires.
    pub async fn upload_with_cancel(
        &self,
        request: UploadRequest,
        cancel: CancellationToken,
    ) -> StoredFileRecord {
        let permit = tokio::select! {
            permit = Arc::clone(&self.workers).acquire_owned() => match permit {
                Ok(p) => p,
                Err(_) => {
                    error!("upload worker pool closed");
                    return StoredFileRecord::failed(FailureKind::IoFailure, "Upload error", Vec::new());
                }
            },
            () = cancel.cancelled() => {
                debug!("upload cancelled while waiting for a worker");
                return StoredFileRecord::from_error(
                    &FileError::Cancelled,
                    vec![StageResult::fail(UploadStage::Received, FileError::Cancelled.public_message())],
                );
            }
        };

        // The permit travels with the blocking task so an abandoned caller
        // does not free the worker while the upload is still running.
        let ingestor = Arc::clone(&self.ingestor);
        let result = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            ingestor.ingest(request, &cancel)
        })
        .await;

        match result {
            Ok(record) => record,
            Err(e) => {
                error!(error = %e, "upload worker panicked");
                StoredFileRecord::failed(FailureKind::IoFailure, "Upload error", Vec::new())
            }
        }
    }

    /// Upload several files into one folder, one after another.
    ///
    /// Yields one record per input, in order. A failed item does not stop
    /// the rest.
    pub async fn upload_batch(
        &self,
        files: Vec<(Box<dyn ByteSource>, String)>,
        folder: &str,
    ) -> Vec<StoredFileRecord> {
        let mut records = Vec::with_capacity(files.len());
        for (source, file_name) in files {
            let record = match UploadRequest::measured(source, file_name, folder) {
                Ok(request) => self.upload(request).await,
                Err(e) => {
                    warn!(error = %e, "failed to measure batch item");
                    StoredFileRecord::from_error(&FileError::Io(e), Vec::new())
                }
            };
            records.push(record);
        }
        debug!(
            count = records.len(),
            stored = records.iter().filter(|r| r.success).count(),
            "batch upload finished"
        );
        records
    }

    /// Securely erase a stored file.
    ///
    /// Returns `Ok(false)` if nothing exists at `relative`.
    pub async fn delete(&self, relative: &str) -> FileResult<bool> {
        let permit = Arc::clone(&self.workers)
            .acquire_owned()
            .await
            .map_err(|e| FileError::Io(io::Error::other(e)))?;

        let ingestor = Arc::clone(&self.ingestor);
        let relative = relative.to_string();
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            ingestor.storage().delete(&relative)
        })
        .await
        .map_err(|e| FileError::Io(io::Error::other(e)))?
    }

    /// Resolve `relative` inside the jail on the blocking pool.
    ///
    /// Resolution canonicalizes on disk, so it stays off the runtime thread.
    async fn resolve(&self, relative: &str) -> FileResult<PathBuf> {
        let ingestor = Arc::clone(&self.ingestor);
        let relative = relative.to_string();
        tokio::task::spawn_blocking(move || ingestor.storage().resolve(&relative))
            .await
            .map_err(|e| FileError::Io(io::Error::other(e)))?
    }

    /// Read a stored file.
    pub async fn read(&self, relative: &str) -> FileResult<Vec<u8>> {
        let path = self.resolve(relative).await?;
        match tokio::fs::read(&path).await {
            Ok(data) => {
                debug!(relative = %relative, size = data.len(), "file read");
                Ok(data)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(FileError::NotFound {
                path: relative.to_string(),
            }),
            Err(e) => Err(FileError::Io(e)),
        }
    }

    /// Public URL for a storage-relative path.
    pub fn url_for(&self, relative: &str) -> String {
        self.storage().public_url(relative)
    }

    /// Whether a regular file exists at `relative`.
    pub async fn exists(&self, relative: &str) -> bool {
        match self.resolve(relative).await {
            Ok(path) => tokio::fs::metadata(path)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Size in bytes of the file at `relative`; 0 if absent or unreadable.
    pub async fn size_of(&self, relative: &str) -> u64 {
        let Ok(path) = self.resolve(relative).await else {
            return 0;
        };
        match tokio::fs::metadata(path).await {
            Ok(m) if m.is_file() => m.len(),
            Ok(_) => 0,
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(error = %e, relative = %relative, "failed to stat stored file");
                }
                0
            }
        }
    }

    /// Get the storage backend.
    pub fn storage(&self) -> &LocalFileStorage {
        self.ingestor.storage()
    }
}

impl std::fmt::Debug for FileService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileService")
            .field("storage", self.storage())
            .field("available_workers", &self.workers.available_permits())
            .finish()
    }
}
