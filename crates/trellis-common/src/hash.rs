//! Stable content hashing for generated objects
//!
//! The hash-based diff engine stores a digest in a label on every generated
//! AuthorizationPolicy and compares it across reconciliation passes. The
//! digest must therefore be stable across process restarts and Rust
//! toolchain upgrades: `DefaultHasher` gives no such guarantee, so truncated
//! SHA-256 is used instead.

use serde::Serialize;

use crate::{Error, Result};

/// Compute a deterministic hash of the input string, returning a 16-char hex digest.
pub fn deterministic_hash(input: &str) -> String {
    use aws_lc_rs::digest;
    let hash = digest::digest(&digest::SHA256, input.as_bytes());
    // Take first 8 bytes (16 hex chars) for a compact label value
    hash.as_ref()[..8]
        .iter()
        .fold(String::with_capacity(16), |mut s, b| {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
            s
        })
}

/// Canonical-serialize a value and hash it.
///
/// Callers pass an explicitly enumerated subset of fields, never a whole
/// object, so adding a field to a type cannot silently change stored hashes.
pub fn hash_canonical<T: Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_string(value)
        .map_err(|e| Error::internal_with_context("hash", e.to_string()))?;
    Ok(deterministic_hash(&json))
}
