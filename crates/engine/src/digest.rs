//! Two-tier digests: a fast CRC-32 fingerprint for per-block tamper
//! detection and a streamed SHA-256 for the authoritative whole-file gate.

use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

/// Computes the CRC-32 fingerprint of a block.
///
/// Cheap enough to run on every write attempt. Collisions are tolerable
/// here; the whole-file SHA-256 comparison is the final correctness gate.
pub fn block_fingerprint(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Computes SHA-256 of an entire file and returns the hex-encoded digest.
///
/// The file is streamed, never buffered whole in memory.
pub fn file_digest(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
