//! Authentication primitives shared by the edtech services
//!
//! Pure functions only: digests and comparison. Header extraction and
//! status-code handling live in each service's API layer.

use sha2::{Digest, Sha256};

/// Compute the SHA-256 digest of a key, hex-encoded.
///
/// Doubles as the caller identity for rate limiting, so the raw key never
/// needs to be stored or logged.
pub fn key_digest(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Compare two byte slices in constant time.
///
/// Examines every byte pair regardless of where the first mismatch occurs.
/// Length is compared up front; callers that must not leak length compare
/// fixed-length digests (see [`verify_key`]).
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Check a presented API key against the configured key.
///
/// Both sides are digested first, so the comparison always runs over
/// equal-length inputs and timing reveals neither the content nor the
/// length of the presented key.
pub fn verify_key(presented: &str, configured: &str) -> bool {
    constant_time_eq(
        key_digest(presented).as_bytes(),
        key_digest(configured).as_bytes(),
    )
}
