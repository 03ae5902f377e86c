//! Input Fingerprinting
//!
//! Content-addressed digests of the raw input text, used to decide whether a
//! saved pipeline run still matches the currently loaded text.
//!
//! Digests are plain serializable data so they survive persistence
//! round-trips unchanged.

use sha2::{Digest, Sha256};

use crate::types::RawInputDigest;

/// Compute the content digest of `text`.
///
/// SHA-256 over the raw bytes, hex-encoded, plus the byte length. The length
/// is redundant with the hash but makes mismatch checks cheap to pre-filter.
pub fn compute_digest(text: &str) -> RawInputDigest {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<String>();

    RawInputDigest {
        hash,
        length: text.len(),
    }
}

/// Equality on both fields; the length comparison short-circuits before the
/// hash comparison.
pub fn digests_match(a: &RawInputDigest, b: &RawInputDigest) -> bool {
    a.length == b.length && a.hash == b.hash
}

// =============================================================================
// Tests
// =============================================================================
