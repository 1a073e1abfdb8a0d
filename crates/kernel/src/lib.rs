//! Intake Kernel Library
//!
//! Sandboxed ingestion of untrusted uploads. The `intake` binary is a thin
//! command-line front end over [`file::FileService`].

pub mod config;
pub mod error;
pub mod file;

pub use config::Config;
pub use error::{FailureKind, FileError, FileResult};
pub use file::{FileService, StoredFileRecord, UploadRequest};
