//! Content inspection hook.
//!
//! Runs after signature checking and hashing with the full payload. No
//! scanner ships with the kernel; deployments plug one in here.

/// Inspection verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Clean,
    /// Reject the upload. The reason is logged, never returned to callers.
    Reject(String),
}

/// Inspects payloads before they are transformed and stored.
pub trait ContentInspector: Send + Sync {
    /// `extension` is lower-cased, `content_hash` is the hex SHA-256 of `data`.
    fn inspect(&self, extension: &str, content_hash: &str, data: &[u8]) -> Verdict;
}

/// Inspector that accepts everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopInspector;

impl ContentInspector for NoopInspector {
    fn inspect(&self, _extension: &str, _content_hash: &str, _data: &[u8]) -> Verdict {
        Verdict::Clean
    }
}
