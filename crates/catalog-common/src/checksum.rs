//! Checksum utilities
//!
//! SHA-256 is used both to fingerprint input files and to derive stable
//! record identifiers when the source data has no natural key.

use crate::error::{CommonError, Result};
use sha2::{Digest, Sha256};
use std::io::Read;

/// Separator placed between parts in [`digest_parts`] so that
/// `["ab", "c"]` and `["a", "bc"]` hash differently.
const PART_SEPARATOR: u8 = 0x1f;

/// Compute the SHA-256 checksum of any readable source
pub fn compute_checksum<R: Read>(reader: &mut R) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// SHA-256 over a sequence of string parts, as lowercase hex
pub fn digest_parts(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update([PART_SEPARATOR]);
        }
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Compare an already computed checksum with the expected one (case-insensitive)
pub fn ensure_checksum(actual: &str, expected: &str) -> Result<()> {
    if actual.eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        Err(CommonError::ChecksumMismatch {
            expected: expected.trim().to_string(),
            actual: actual.to_string(),
        })
    }
}
