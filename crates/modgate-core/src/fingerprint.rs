//! Content fingerprints
//!
//! Three hash families with distinct roles:
//! - SHA-256 hex for cache keys and durable lookups
//! - xxhash64 for the cheap whole-text Bloom membership probe
//! - murmur3-64 for deriving Bloom bit offsets

use std::hash::Hasher as _;

use sha2::{Digest, Sha256};
use twox_hash::XxHash64;

/// SHA-256 of a string, hex encoded. Used as the content hash of
/// normalized text and as the per-token Bloom key.
pub fn sha256_hex(text: &str) -> String {
    sha256_hex_bytes(text.as_bytes())
}

/// SHA-256 of raw bytes, hex encoded. Used as the image file hash.
pub fn sha256_hex_bytes(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Fast 64-bit fingerprint of a string as 8 little-endian bytes.
pub fn fast_hash(text: &str) -> [u8; 8] {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(text.as_bytes());
    hasher.finish().to_le_bytes()
}

/// 64-bit murmur3 of raw bytes, used for Bloom offset derivation.
pub fn bloom_hash(data: &[u8]) -> u64 {
    let mut cursor = std::io::Cursor::new(data);
    // Reading from an in-memory cursor cannot fail.
    murmur3::murmur3_x64_128(&mut cursor, 0).map_or(0, |h| h as u64)
}
