//! Configuration fingerprints.
//!
//! A fingerprint is the hex SHA-256 of the JSON serialization of a
//! configuration. Struct fields serialize in declaration order and maps are
//! `BTreeMap`s, so equal configurations always produce equal fingerprints.

use crate::error::ControllerError;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Fingerprint of `value`
pub fn compute<T: Serialize>(value: &T) -> Result<String, ControllerError> {
    let bytes = serde_json::to_vec(value)?;
    Ok(digest(&bytes))
}

/// Hex SHA-256 of `bytes`
pub fn digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Whether the recorded fingerprint matches the desired one
pub fn is_up_to_date(recorded: &str, desired: &str) -> bool {
    recorded == desired
}
