//! Content fingerprinting for uploaded images.
//!
//! Two digests per upload:
//! - **exact hash**: BLAKE3 over the full byte content, collision-resistant,
//!   the authoritative identity of an upload.
//! - **similarity hash**: a deliberately lossy SHA-256 over a fixed
//!   down-sampling of the content plus a coarse length bucket, truncated to
//!   16 hex chars. It catches re-encoded or slightly-cropped re-uploads of
//!   the same screenshot. Advisory only: it may produce false positives and
//!   is never used alone to discard data.
//!
//! Pure functions, stable across process restarts: no randomness, no
//! time-seeded salts.

use sha2::{Digest, Sha256};

use tipledger_core::defaults::{
    SIMILARITY_HASH_LEN, SIMILARITY_LENGTH_BUCKET, SIMILARITY_SAMPLE_BYTES,
};
use tipledger_core::{Error, Result};

/// The two digests and byte size of one upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// BLAKE3 of the full content, hex.
    pub exact_hash: String,
    /// Truncated coarse digest, hex.
    pub similarity_hash: String,
    pub byte_size: i64,
}

/// Fingerprint an upload's bytes.
///
/// Empty input is an error; the duplicate gate fails closed on it.
pub fn fingerprint(bytes: &[u8]) -> Result<Fingerprint> {
    if bytes.is_empty() {
        return Err(Error::InvalidInput("cannot fingerprint empty bytes".into()));
    }

    let exact_hash = blake3::hash(bytes).to_hex().to_string();

    Ok(Fingerprint {
        exact_hash,
        similarity_hash: similarity_hash(bytes),
        byte_size: bytes.len() as i64,
    })
}

/// Coarse similarity digest: length bucket + evenly spaced sample bytes.
///
/// Two images that differ only in a few bytes of metadata, or in a small
/// re-encode that keeps the size within one length bucket, usually sample
/// the same bytes and collide here. That is the point.
fn similarity_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();

    let bucket = bytes.len() / SIMILARITY_LENGTH_BUCKET;
    hasher.update(bucket.to_le_bytes());

    for i in 0..SIMILARITY_SAMPLE_BYTES {
        let idx = i * bytes.len() / SIMILARITY_SAMPLE_BYTES;
        hasher.update([bytes[idx]]);
    }

    let digest = hex::encode(hasher.finalize());
    digest[..SIMILARITY_HASH_LEN].to_string()
}
