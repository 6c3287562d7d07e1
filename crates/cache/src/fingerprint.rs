//! Deterministic fingerprints of computation invocations

use crate::identity::Identity;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Hex-encoded SHA-256 digest identifying a computation and its arguments
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Parse a 64-character hex digest
    pub fn from_hex(hex_digest: &str) -> Result<Self> {
        if hex_digest.len() != 64 || !hex_digest.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::serialization(format!(
                "Invalid fingerprint '{hex_digest}': expected 64 hex characters"
            )));
        }
        Ok(Self(hex_digest.to_ascii_lowercase()))
    }

    /// Full hex digest
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 16-character prefix for derived names
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..16]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::from_hex(&value)
    }
}

impl From<Fingerprint> for String {
    fn from(value: Fingerprint) -> Self {
        value.0
    }
}

/// Envelope hashed into a fingerprint
#[derive(Debug, Serialize)]
struct FingerprintEnvelope<'a> {
    identity: &'a Identity,
    args: &'a [serde_json::Value],
    kwargs: &'a BTreeMap<String, serde_json::Value>,
}

/// Compute the fingerprint of calling `identity` with `args` and `kwargs`
pub fn fingerprint(
    identity: &Identity,
    args: &[serde_json::Value],
    kwargs: &BTreeMap<String, serde_json::Value>,
) -> Result<Fingerprint> {
    let envelope = FingerprintEnvelope {
        identity,
        args,
        kwargs,
    };
    // Going through serde_json::Value sorts every nested object key
    let json = serde_json::to_value(&envelope)
        .map_err(|e| Error::serialization(format!("Failed to encode envelope: {e}")))?;
    let bytes = serde_json::to_vec(&json)
        .map_err(|e| Error::serialization(format!("Failed to serialize envelope: {e}")))?;
    Ok(Fingerprint(hex::encode(Sha256::digest(bytes))))
}
