//! Secure erase: overwrite with random bytes, then unlink.
//!
//! A single pass is best-effort only. Copy-on-write and journaled
//! filesystems, and SSD wear-leveling, can keep old blocks around.

use std::fs::{self, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::Path;

use rand::RngCore;
use rand::rngs::OsRng;

const CHUNK_SIZE: usize = 64 * 1024;

/// Overwrite `path` with random bytes and remove it.
///
/// Returns `Ok(false)` when there is nothing to erase.
pub fn secure_erase(path: &Path) -> io::Result<bool> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };

    if !metadata.is_file() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "secure erase target is not a regular file",
        ));
    }

    overwrite(path, metadata.len())?;

    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        // Lost a race with a concurrent delete.
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

fn overwrite(path: &Path, len: u64) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).open(path)?;
    file.seek(SeekFrom::Start(0))?;

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut remaining = len;
    while remaining > 0 {
        let n = remaining.min(CHUNK_SIZE as u64) as usize;
        OsRng.fill_bytes(&mut buf[..n]);
        file.write_all(&buf[..n])?;
        remaining -= n as u64;
    }

    file.sync_all()
}
