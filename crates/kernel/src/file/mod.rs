//! Secure file ingestion and storage.
//!
//! Accepts untrusted byte streams, validates and sanitizes them, transcodes
//! images, and stores the result under a jailed storage root.

pub mod erase;
pub mod hash;
pub mod inspect;
pub mod jail;
pub mod pipeline;
pub mod record;
pub mod sanitize;
pub mod service;
pub mod signature;
pub mod storage;
pub mod transcode;

pub use inspect::{ContentInspector, NoopInspector, Verdict};
pub use jail::PathJail;
pub use pipeline::Ingestor;
pub use record::{ByteSource, StageResult, StoredFileRecord, UploadRequest, UploadStage};
pub use service::FileService;
pub use signature::SignatureTable;
pub use storage::{LocalFileStorage, SidecarMarker};
pub use transcode::ImageTranscoder;
