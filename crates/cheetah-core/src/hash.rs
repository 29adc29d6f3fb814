use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::errors::{CampError, ErrorInfo};
use crate::serde::canonical_value;

fn hex_digest(hasher: Sha256) -> String {
    format!("{:x}", hasher.finalize())
}

/// SHA-256 of the canonical JSON encoding of `value`, streamed into the hasher.
pub fn stable_hash_string<T: Serialize>(value: &T) -> Result<String, CampError> {
    let mut hasher = Sha256::new();
    serde_json::to_writer(&mut hasher, &canonical_value(value)?)
        .map_err(|err| CampError::Serde(ErrorInfo::new("hash_write", err.to_string())))?;
    Ok(hex_digest(hasher))
}

/// Hash of raw bytes, used to compare file contents.
pub fn bytes_hash_string(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_digest(hasher)
}
