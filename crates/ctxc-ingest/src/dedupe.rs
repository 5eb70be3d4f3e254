//! Content-addressed deduplication.
//!
//! File level: the sha-256 of raw bytes gates whole documents; a hit means
//! a metadata-only update upstream. Chunk level: a 64-bit SimHash over
//! normalised chunk text catches near-duplicate chunks within one document
//! (boilerplate repeated by an exporter, for instance).

use sha2::{Digest, Sha256};

/// Hamming distance at or below which two chunk fingerprints are
/// considered duplicates.
pub const SIMHASH_MAX_DISTANCE: u32 = 3;

/// Hex sha-256 of raw bytes; the document content address.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut hex = String::with_capacity(64);
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

/// 64-bit SimHash over whitespace-normalised, case-folded tokens.
pub fn simhash(text: &str) -> u64 {
    let mut weights = [0i32; 64];
    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let token_hash = hash64(&token.to_lowercase());
        for (bit, weight) in weights.iter_mut().enumerate() {
            if token_hash >> bit & 1 == 1 {
                *weight += 1;
            } else {
                *weight -= 1;
            }
        }
    }
    let mut fingerprint = 0u64;
    for (bit, &weight) in weights.iter().enumerate() {
        if weight > 0 {
            fingerprint |= 1 << bit;
        }
    }
    fingerprint
}

/// Whether two fingerprints are near-duplicates.
pub fn is_near_duplicate(a: u64, b: u64) -> bool {
    (a ^ b).count_ones() <= SIMHASH_MAX_DISTANCE
}

fn hash64(token: &str) -> u64 {
    let digest = Sha256::digest(token.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}
