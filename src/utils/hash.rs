// src/utils/hash.rs

//! Deterministic offer identifiers.

use sha2::{Digest, Sha256};

/// SHA-256 of the lower-cased UTF-8 key as 64 lowercase hex characters.
pub fn identity_hash(key: &str) -> String {
    let digest = Sha256::digest(key.to_lowercase().as_bytes());
    hex::encode(digest)
}
