//! SHA-256 content hashing.

use std::io::{self, Read, Seek, SeekFrom};

use sha2::{Digest, Sha256};

const CHUNK_SIZE: usize = 64 * 1024;

/// Hex-encoded SHA-256 of an in-memory buffer.
pub fn hash_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Hex-encoded SHA-256 of the stream from its current position to the end.
///
/// This is the same range the pipeline sizes, checks and stores. The
/// position is restored afterwards, including when hashing fails part-way.
pub fn hash_stream<R: Read + Seek + ?Sized>(reader: &mut R) -> io::Result<String> {
    let original = reader.stream_position()?;
    let digest = digest_remaining(reader);
    reader.seek(SeekFrom::Start(original))?;
    digest
}

fn digest_remaining<R: Read + ?Sized>(reader: &mut R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
