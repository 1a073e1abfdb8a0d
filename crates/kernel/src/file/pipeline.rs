//! Blocking upload pipeline.
//!
//! Stages run strictly in order and stop at the first failure:
//! size → extension → signature → hash → inspect → transform → resolve →
//! write → dedup marker. Every call is independent; the only shared state
//! is the filesystem.

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::hash::hash_stream;
use super::inspect::{ContentInspector, Verdict};
use super::record::{StageResult, StoredFileRecord, UploadRequest, UploadStage};
use super::sanitize::{extension_of, sanitize_filename, sanitize_folder};
use super::signature::{HEADER_LEN, SignatureTable};
use super::storage::{LocalFileStorage, SidecarMarker};
use super::transcode::{ImageTranscoder, image_format_for};
use crate::config::Config;
use crate::error::{FileError, FileResult};

/// Longest slice of untrusted input echoed into logs.
const LOG_INPUT_LIMIT: usize = 64;

/// Runs uploads end to end on the calling thread.
pub struct Ingestor {
    storage: LocalFileStorage,
    signatures: Arc<SignatureTable>,
    transcoder: ImageTranscoder,
    inspector: Arc<dyn ContentInspector>,
    allowed_extensions: Vec<String>,
    max_upload_size: u64,
}

/// Stage outcomes collected while an upload runs.
#[derive(Debug, Default)]
struct Trail {
    stages: Vec<StageResult>,
    current: Option<UploadStage>,
}

impl Trail {
    /// Enter `stage`, failing first if the caller has cancelled.
    fn enter(&mut self, stage: UploadStage, cancel: &CancellationToken) -> FileResult<()> {
        self.current = Some(stage);
        if cancel.is_cancelled() {
            return Err(FileError::Cancelled);
        }
        Ok(())
    }

    fn pass(&mut self) {
        if let Some(stage) = self.current.take() {
            debug!(stage = ?stage, "upload stage passed");
            self.stages.push(StageResult::pass(stage));
        }
    }

    fn fail(&mut self, error: &FileError) {
        if let Some(stage) = self.current.take() {
            self.stages
                .push(StageResult::fail(stage, error.public_message()));
        }
    }
}

/// What a successful run hands back to [`Ingestor::ingest`].
struct Stored {
    file_name: String,
    extension: String,
    relative_path: String,
    content_hash: String,
    mime_type: String,
    size: u64,
}

impl Ingestor {
    /// Build an ingestor from configuration.
    pub fn new(
        config: &Config,
        signatures: Arc<SignatureTable>,
        inspector: Arc<dyn ContentInspector>,
    ) -> io::Result<Self> {
        Ok(Self {
            storage: LocalFileStorage::open(&config.uploads_dir, config.files_url.clone())?,
            signatures,
            transcoder: ImageTranscoder::new(
                config.max_image_width,
                config.max_image_height,
                config.jpeg_quality,
            ),
            inspector,
            allowed_extensions: config.allowed_extensions.clone(),
            max_upload_size: config.max_upload_size,
        })
    }

    /// Storage backing this ingestor.
    pub fn storage(&self) -> &LocalFileStorage {
        &self.storage
    }

    /// Run one upload. Never panics on bad input and never returns an
    /// error: every failure becomes a failed record.
    pub fn ingest(&self, mut request: UploadRequest, cancel: &CancellationToken) -> StoredFileRecord {
        let mut trail = Trail::default();
        let declared = log_safe(&request.file_name);
        let name = sanitized_label(&request.file_name);
        let folder = sanitize_folder(&request.folder);

        match self.run(&mut request, cancel, &mut trail) {
            Ok(stored) => {
                info!(
                    file = %stored.file_name,
                    path = %stored.relative_path,
                    hash = %stored.content_hash,
                    size = stored.size,
                    "file stored"
                );
                StoredFileRecord {
                    success: true,
                    url: Some(self.storage.public_url(&stored.relative_path)),
                    file_name: Some(stored.file_name),
                    extension: Some(format!(".{}", stored.extension)),
                    relative_path: Some(stored.relative_path),
                    content_hash: Some(stored.content_hash),
                    mime_type: Some(stored.mime_type),
                    size: Some(stored.size),
                    error: None,
                    failure: None,
                    stages: trail.stages,
                }
            }
            Err(e) => {
                let stage = trail.current;
                trail.fail(&e);
                match &e {
                    FileError::PathEscape { .. } => {
                        error!(
                            error = %e,
                            stage = ?stage,
                            file = %name,
                            folder = %folder,
                            declared = %declared,
                            "storage jail violated during upload"
                        );
                    }
                    FileError::Io(_) => {
                        error!(
                            error = %e,
                            stage = ?stage,
                            file = %name,
                            folder = %folder,
                            declared = %declared,
                            "upload failed"
                        );
                    }
                    _ => {
                        warn!(
                            error = %e,
                            kind = ?e.kind(),
                            stage = ?stage,
                            file = %name,
                            folder = %folder,
                            declared = %declared,
                            "upload rejected"
                        );
                    }
                }
                StoredFileRecord::from_error(&e, trail.stages)
            }
        }
    }

    fn run(
        &self,
        request: &mut UploadRequest,
        cancel: &CancellationToken,
        trail: &mut Trail,
    ) -> FileResult<Stored> {
        trail.enter(UploadStage::Received, cancel)?;
        debug!(declared = %log_safe(&request.file_name), length = request.length, "upload received");
        trail.pass();

        trail.enter(UploadStage::SizeChecked, cancel)?;
        let actual = remaining_len(request.source.as_mut())?;
        if actual != request.length {
            warn!(declared = request.length, actual, "declared upload length differs from content");
        }
        let length = request.length.max(actual);
        if length == 0 || actual == 0 {
            return Err(FileError::EmptyInput);
        }
        if length > self.max_upload_size {
            return Err(FileError::SizeExceeded {
                size: length,
                max: self.max_upload_size,
            });
        }
        trail.pass();

        trail.enter(UploadStage::ExtensionChecked, cancel)?;
        let extension = extension_of(&request.file_name);
        if extension.is_empty() || !self.allowed_extensions.contains(&extension) {
            return Err(FileError::DisallowedExtension { extension });
        }
        trail.pass();

        trail.enter(UploadStage::SignatureChecked, cancel)?;
        let header = read_header(request.source.as_mut())?;
        if !self.signatures.matches(&extension, &header) {
            return Err(FileError::SignatureMismatch { extension });
        }
        trail.pass();

        trail.enter(UploadStage::Hashed, cancel)?;
        let content_hash = hash_stream(request.source.as_mut())?;
        debug!(hash = %content_hash, "content hashed");
        trail.pass();

        trail.enter(UploadStage::Inspected, cancel)?;
        let data = read_bounded(request.source.as_mut(), self.max_upload_size)?;
        if let Verdict::Reject(reason) = self.inspector.inspect(&extension, &content_hash, &data) {
            return Err(FileError::Rejected { reason });
        }
        trail.pass();

        trail.enter(UploadStage::Transformed, cancel)?;
        let data = match image_format_for(&extension) {
            Some(format) => {
                let transcoded = self.transcoder.transcode(format, &data)?;
                if cancel.is_cancelled() {
                    return Err(FileError::Cancelled);
                }
                transcoded.data
            }
            None => data,
        };
        let size = data.len() as u64;
        if size > self.max_upload_size {
            return Err(FileError::SizeExceeded {
                size,
                max: self.max_upload_size,
            });
        }
        trail.pass();

        trail.enter(UploadStage::PathResolved, cancel)?;
        let safe = sanitize_filename(&request.file_name);
        let file_name = safe.unique();
        let folder = sanitize_folder(&request.folder);
        let relative_path = format!("{folder}/{file_name}");
        self.storage.resolve(&relative_path)?;
        trail.pass();

        trail.enter(UploadStage::Written, cancel)?;
        self.storage.write_new(&relative_path, &data, cancel)?;
        trail.pass();

        trail.enter(UploadStage::Completed, cancel)?;
        let marker = SidecarMarker::new(content_hash.clone(), file_name.clone());
        match self.storage.write_sidecar(&folder, &marker) {
            Ok(Some(existing)) => {
                info!(hash = %content_hash, existing = %existing, file = %file_name, "duplicate content uploaded");
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, hash = %content_hash, "failed to write dedup marker");
            }
        }
        trail.pass();

        Ok(Stored {
            mime_type: mime_type_for(&extension, &data),
            file_name,
            extension,
            relative_path,
            content_hash,
            size,
        })
    }
}

/// Bytes between the current position and the end of the source.
fn remaining_len<R: Seek + ?Sized>(source: &mut R) -> io::Result<u64> {
    let start = source.stream_position()?;
    let end = source.seek(SeekFrom::End(0))?;
    source.seek(SeekFrom::Start(start))?;
    Ok(end.saturating_sub(start))
}

/// Up to [`HEADER_LEN`] leading bytes; the position is restored.
fn read_header<R: Read + Seek + ?Sized>(source: &mut R) -> io::Result<Vec<u8>> {
    let start = source.stream_position()?;
    let mut header = Vec::with_capacity(HEADER_LEN);
    (&mut *source)
        .take(HEADER_LEN as u64)
        .read_to_end(&mut header)?;
    source.seek(SeekFrom::Start(start))?;
    Ok(header)
}

/// Read the payload, refusing anything longer than `max`.
fn read_bounded<R: Read + ?Sized>(source: &mut R, max: u64) -> FileResult<Vec<u8>> {
    let mut data = Vec::new();
    source.take(max.saturating_add(1)).read_to_end(&mut data)?;
    let size = data.len() as u64;
    if size > max {
        return Err(FileError::SizeExceeded { size, max });
    }
    if data.is_empty() {
        return Err(FileError::EmptyInput);
    }
    Ok(data)
}

/// MIME type sniffed from content, falling back to the extension.
fn mime_type_for(extension: &str, data: &[u8]) -> String {
    if let Some(kind) = infer::get(data) {
        return kind.mime_type().to_string();
    }
    match extension {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        _ => "application/octet-stream",
    }
    .to_string()
}

/// Sanitized `base.ext` of a declared filename, for log fields.
fn sanitized_label(file_name: &str) -> String {
    let safe = sanitize_filename(file_name);
    if safe.extension.is_empty() {
        safe.base
    } else {
        format!("{}.{}", safe.base, safe.extension)
    }
}

/// Escape and truncate untrusted input before it reaches a log line.
fn log_safe(raw: &str) -> String {
    raw.chars()
        .take(LOG_INPUT_LIMIT)
        .flat_map(char::escape_debug)
        .collect()
}

impl std::fmt::Debug for Ingestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ingestor")
            .field("storage", &self.storage)
            .field("max_upload_size", &self.max_upload_size)
            .finish()
    }
}

#[cfg(test)]
// Tests are allowed to use unwrap/expect freely.
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::error::FailureKind;
    use crate::file::hash::hash_bytes;
    use crate::file::inspect::NoopInspector;

    const PDF: &[u8] = b"%PDF-1.7\n1 0 obj\n<<>>\nendobj\ntrailer\n%%EOF\n";

    fn ingestor(max: u64) -> (tempfile::TempDir, Ingestor) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::new(dir.path());
        config.max_upload_size = max;
        let ingestor = Ingestor::new(
            &config,
            Arc::new(SignatureTable::standard()),
            Arc::new(NoopInspector),
        )
        .unwrap();
        (dir, ingestor)
    }

    struct RejectAll;

    impl ContentInspector for RejectAll {
        fn inspect(&self, _ext: &str, _hash: &str, _data: &[u8]) -> Verdict {
            Verdict::Reject("test veto".to_string())
        }
    }

    #[test]
    fn stores_pdf_and_records_every_stage() {
        let (_dir, ingestor) = ingestor(1024);
        let record = ingestor.ingest(
            UploadRequest::from_bytes(PDF, "report.pdf", "docs"),
            &CancellationToken::new(),
        );

        assert!(record.success, "{record:?}");
        assert_eq!(record.extension.as_deref(), Some(".pdf"));
        assert_eq!(record.mime_type.as_deref(), Some("application/pdf"));
        assert_eq!(record.size, Some(PDF.len() as u64));
        assert!(record.relative_path.as_deref().unwrap().starts_with("docs/report_"));
        assert_eq!(record.stages.len(), 10);
        assert!(record.stages.iter().all(|s| s.passed));
        assert_eq!(record.last_stage(), Some(UploadStage::Completed));
    }

    #[test]
    fn lying_length_cannot_bypass_size_limit() {
        let (_dir, ingestor) = ingestor(16);
        let mut body = PDF.to_vec();
        body.resize(64, b' ');
        let request = UploadRequest::new(Cursor::new(body), "big.pdf", "docs", 8);

        let record = ingestor.ingest(request, &CancellationToken::new());
        assert_eq!(record.failure, Some(FailureKind::SizeExceeded));
        assert_eq!(record.last_stage(), Some(UploadStage::SizeChecked));
    }

    #[test]
    fn inspector_can_veto() {
        let dir = tempfile::tempdir().unwrap();
        let ingestor = Ingestor::new(
            &Config::new(dir.path()),
            Arc::new(SignatureTable::standard()),
            Arc::new(RejectAll),
        )
        .unwrap();

        let record = ingestor.ingest(
            UploadRequest::from_bytes(PDF, "report.pdf", "docs"),
            &CancellationToken::new(),
        );
        assert_eq!(record.failure, Some(FailureKind::Rejected));
        assert_eq!(record.error.as_deref(), Some("File rejected"));
        assert!(!record.error.as_deref().unwrap().contains("veto"));
    }

    #[test]
    fn cancelled_before_start_writes_nothing() {
        let (dir, ingestor) = ingestor(1024);
        let token = CancellationToken::new();
        token.cancel();

        let record = ingestor.ingest(UploadRequest::from_bytes(PDF, "report.pdf", "docs"), &token);
        assert_eq!(record.failure, Some(FailureKind::Cancelled));
        assert!(!dir.path().join("docs").exists());
    }

    /// Cancels the upload from inside the pipeline, once it is under way.
    struct CancelOnInspect(CancellationToken);

    impl ContentInspector for CancelOnInspect {
        fn inspect(&self, _ext: &str, _hash: &str, _data: &[u8]) -> Verdict {
            self.0.cancel();
            Verdict::Clean
        }
    }

    #[test]
    fn cancelled_mid_upload_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let token = CancellationToken::new();
        let ingestor = Ingestor::new(
            &Config::new(dir.path()),
            Arc::new(SignatureTable::standard()),
            Arc::new(CancelOnInspect(token.clone())),
        )
        .unwrap();

        let png = {
            let img = image::DynamicImage::ImageRgba8(image::RgbaImage::new(32, 32));
            let mut buf = Cursor::new(Vec::new());
            img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
            buf.into_inner()
        };
        let record = ingestor.ingest(UploadRequest::from_bytes(png, "photo.png", "media"), &token);

        assert_eq!(record.failure, Some(FailureKind::Cancelled));
        assert_eq!(record.last_stage(), Some(UploadStage::Transformed));
        // Every stage up to and including inspection ran.
        assert_eq!(record.stages.iter().filter(|s| s.passed).count(), 6);
        assert!(!dir.path().join("media").exists());
    }

    #[test]
    fn hash_covers_stored_bytes_when_stream_starts_mid_way() {
        let (dir, ingestor) = ingestor(1024);
        let mut body = b"JUNKPREFIX".to_vec();
        body.extend_from_slice(PDF);
        let mut cursor = Cursor::new(body);
        cursor.set_position(10);

        let request = UploadRequest::measured(Box::new(cursor), "report.pdf", "docs").unwrap();
        let record = ingestor.ingest(request, &CancellationToken::new());
        assert!(record.success, "{record:?}");

        let stored = std::fs::read(
            dir.path()
                .canonicalize()
                .unwrap()
                .join(record.relative_path.as_deref().unwrap()),
        )
        .unwrap();
        assert_eq!(stored, PDF);
        assert_eq!(record.content_hash.as_deref(), Some(hash_bytes(PDF).as_str()));
        assert_eq!(record.size, Some(PDF.len() as u64));
    }

    #[test]
    fn sanitized_label_joins_base_and_extension() {
        assert_eq!(sanitized_label("../../etc/My Report.PDF"), "My_Report.pdf");
        assert_eq!(sanitized_label("../../etc/passwd"), "passwd");
    }

    #[test]
    fn header_read_restores_position() {
        let mut cursor = Cursor::new(b"%PDF-1.7 trailing".to_vec());
        let header = read_header(&mut cursor).unwrap();
        assert_eq!(header, b"%PDF-1.7");
        assert_eq!(cursor.position(), 0);

        let mut short = Cursor::new(b"ab".to_vec());
        assert_eq!(read_header(&mut short).unwrap(), b"ab");
    }

    #[test]
    fn bounded_read_limits() {
        assert!(read_bounded(&mut Cursor::new(vec![1u8; 10]), 10).is_ok());
        assert!(matches!(
            read_bounded(&mut Cursor::new(vec![1u8; 11]), 10),
            Err(FileError::SizeExceeded { size: 11, max: 10 })
        ));
        assert!(matches!(
            read_bounded(&mut Cursor::new(Vec::new()), 10),
            Err(FileError::EmptyInput)
        ));
    }

    #[test]
    fn mime_falls_back_to_extension() {
        assert_eq!(mime_type_for("pdf", b"%PDF-1.4"), "application/pdf");
        assert_eq!(mime_type_for("doc", b"\x00\x00"), "application/msword");
        assert_eq!(mime_type_for("zzz", b"\x00"), "application/octet-stream");
    }

    #[test]
    fn log_safe_escapes_and_truncates() {
        assert_eq!(log_safe("a\nb\"c"), "a\\nb\\\"c");
        assert_eq!(log_safe(&"x".repeat(500)).len(), LOG_INPUT_LIMIT);
    }
}
