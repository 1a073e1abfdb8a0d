//! Storage jail: confines resolved paths under the storage root.

use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::error;

use crate::error::{FileError, FileResult};

/// Resolves relative paths against a canonical storage root.
#[derive(Debug, Clone)]
pub struct PathJail {
    root: PathBuf,
}

impl PathJail {
    /// Create the root if needed and canonicalize it.
    pub fn open(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = root.as_ref();
        std::fs::create_dir_all(root)?;
        Ok(Self {
            root: root.canonicalize()?,
        })
    }

    /// The canonical storage root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `relative` to an absolute path confined under the root.
    ///
    /// Rejects absolute paths and `..` outright. The deepest existing
    /// ancestor is canonicalized so a symlink pointing outside the root is
    /// caught even when the leaf does not exist yet.
    pub fn resolve(&self, relative: &str) -> FileResult<PathBuf> {
        let escape = || FileError::PathEscape {
            path: PathBuf::from(relative),
        };

        let relative_path = Path::new(relative);
        let mut normal = PathBuf::new();
        for component in relative_path.components() {
            match component {
                Component::Normal(part) => normal.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    error!(path = ?relative, "rejected non-relative storage path");
                    return Err(escape());
                }
            }
        }

        let joined = self.root.join(&normal);
        let resolved = canonicalize_existing_prefix(&joined)?;

        if !resolved.starts_with(&self.root) {
            error!(
                path = ?relative,
                resolved = %resolved.display(),
                "storage path escaped jail"
            );
            return Err(FileError::PathEscape { path: resolved });
        }

        Ok(resolved)
    }

    /// Path relative to the root, with forward slashes.
    pub fn relative_of(&self, absolute: &Path) -> Option<String> {
        let rel = absolute.strip_prefix(&self.root).ok()?;
        let parts: Vec<&str> = rel
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<_>>()?;
        Some(parts.join("/"))
    }
}

/// Canonicalize the longest existing ancestor of `path` and re-append the
/// missing tail.
fn canonicalize_existing_prefix(path: &Path) -> FileResult<PathBuf> {
    let mut existing = path.to_path_buf();
    let mut tail = Vec::new();

    loop {
        match existing.canonicalize() {
            Ok(canonical) => {
                let mut resolved = canonical;
                for part in tail.iter().rev() {
                    resolved.push(part);
                }
                return Ok(resolved);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let Some(name) = existing.file_name().map(|n| n.to_os_string()) else {
                    return Err(FileError::Io(e));
                };
                tail.push(name);
                if !existing.pop() {
                    return Err(FileError::Io(e));
                }
            }
            Err(e) => return Err(FileError::Io(e)),
        }
    }
}
