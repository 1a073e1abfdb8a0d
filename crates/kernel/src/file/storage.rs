//! Local filesystem storage under a jailed root.
//!
//! Writes are atomic and never clobber: bytes land in a temporary file in
//! the destination folder and are then linked into place only if the final
//! name is still free.

use std::fs::{self, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::erase::secure_erase;
use super::jail::PathJail;
use crate::error::{FileError, FileResult};

/// Prefix of dedup marker files.
pub const SIDECAR_PREFIX: &str = ".hash_";

/// Upper bound on a marker's content when reading it back.
const SIDECAR_MAX_LEN: u64 = 1024;

/// Dedup marker co-located with a stored file, named by content hash and
/// holding the stored file's name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidecarMarker {
    pub content_hash: String,
    pub file_name: String,
}

impl SidecarMarker {
    /// Create a marker for `file_name` with the given hex digest.
    pub fn new(content_hash: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            content_hash: content_hash.into(),
            file_name: file_name.into(),
        }
    }

    /// On-disk name of the marker.
    pub fn marker_name(&self) -> String {
        format!("{SIDECAR_PREFIX}{}", self.content_hash)
    }
}

/// Local filesystem storage.
pub struct LocalFileStorage {
    jail: PathJail,
    /// Base URL for public file access.
    base_url: String,
}

impl LocalFileStorage {
    /// Open storage rooted at `root`, creating it if needed.
    pub fn open(root: impl AsRef<Path>, base_url: impl Into<String>) -> io::Result<Self> {
        Ok(Self {
            jail: PathJail::open(root)?,
            base_url: base_url.into(),
        })
    }

    /// The canonical storage root.
    pub fn root(&self) -> &Path {
        self.jail.root()
    }

    /// Resolve a storage-relative path inside the jail.
    pub fn resolve(&self, relative: &str) -> FileResult<PathBuf> {
        self.jail.resolve(relative)
    }

    /// Write `data` to a new file at `relative`.
    ///
    /// Fails with an I/O error if the name is already taken. Cancellation is
    /// checked once more right before the file becomes visible.
    pub fn write_new(
        &self,
        relative: &str,
        data: &[u8],
        cancel: &CancellationToken,
    ) -> FileResult<PathBuf> {
        let path = self.jail.resolve(relative)?;
        let parent = path
            .parent()
            .ok_or_else(|| FileError::PathEscape { path: path.clone() })?;

        fs::create_dir_all(parent)?;
        // Re-check now that the folder chain exists on disk.
        let parent_relative = self
            .jail
            .relative_of(parent)
            .ok_or_else(|| FileError::PathEscape {
                path: parent.to_path_buf(),
            })?;
        let parent = self.jail.resolve(&parent_relative)?;

        let mut tmp = tempfile::Builder::new()
            .prefix(".upload-")
            .tempfile_in(&parent)?;
        tmp.write_all(data)?;
        tmp.as_file().sync_all()?;

        if cancel.is_cancelled() {
            // Dropping `tmp` removes the partial file.
            return Err(FileError::Cancelled);
        }

        tmp.persist_noclobber(&path).map_err(|e| FileError::Io(e.error))?;

        debug!(relative = %relative, size = data.len(), "file written");
        Ok(path)
    }

    /// Record a dedup marker next to the stored file.
    ///
    /// Returns the file name held by an already existing marker for the
    /// same content, leaving that marker untouched.
    pub fn write_sidecar(&self, folder: &str, marker: &SidecarMarker) -> FileResult<Option<String>> {
        let path = self
            .jail
            .resolve(&format!("{folder}/{}", marker.marker_name()))?;

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                file.write_all(marker.file_name.as_bytes())?;
                Ok(None)
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Ok(Some(read_marker(&path)?))
            }
            Err(e) => Err(FileError::Io(e)),
        }
    }

    /// Securely erase the file at `relative` and its dedup marker.
    ///
    /// Returns `Ok(false)` when no file exists at that path.
    pub fn delete(&self, relative: &str) -> FileResult<bool> {
        let path = self.jail.resolve(relative)?;
        if !secure_erase(&path)? {
            debug!(relative = %relative, "file not found for deletion");
            return Ok(false);
        }

        if let (Some(parent), Some(name)) = (path.parent(), path.file_name())
            && let Err(e) = remove_marker_for(parent, &name.to_string_lossy())
        {
            warn!(error = %e, relative = %relative, "failed to remove dedup marker");
        }

        info!(relative = %relative, "file securely erased");
        Ok(true)
    }

    /// Public URL for a storage-relative path.
    pub fn public_url(&self, relative: &str) -> String {
        let path = relative.replace('\\', "/");
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

fn read_marker(path: &Path) -> io::Result<String> {
    let mut content = String::new();
    fs::File::open(path)?
        .take(SIDECAR_MAX_LEN)
        .read_to_string(&mut content)?;
    Ok(content.trim().to_string())
}

/// Remove the marker in `dir` whose content names `file_name`.
fn remove_marker_for(dir: &Path, file_name: &str) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(SIDECAR_PREFIX) {
            continue;
        }
        let path = entry.path();
        if read_marker(&path)? == file_name {
            fs::remove_file(&path)?;
            debug!(marker = %name.to_string_lossy(), "dedup marker removed");
        }
    }
    Ok(())
}

impl std::fmt::Debug for LocalFileStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalFileStorage")
            .field("root", &self.jail.root())
            .field("base_url", &self.base_url)
            .finish()
    }
}
