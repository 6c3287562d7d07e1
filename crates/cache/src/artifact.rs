//! Artifact metadata committed next to every stored value

use crate::fingerprint::Fingerprint;
use crate::registry::Options;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Suffix of the JSON sidecar that commits a key
pub const SIDECAR_SUFFIX: &str = ".artifact.json";

/// Version of this crate, recorded in every artifact
pub const MEMENTO_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Metadata describing a committed cache entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Cache key
    pub key: String,
    /// Serializer used to write the value
    pub serializer: String,
    /// Options given to the serializer's `dump`
    #[serde(default)]
    pub dump_options: Options,
    /// Free-form caller metadata
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// When the value was written
    pub created_at: DateTime<Utc>,
    /// Fingerprint of the computation that produced the value, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<Fingerprint>,
    /// Version of memento that wrote the entry
    pub memento_version: String,
}

impl Artifact {
    /// New artifact stamped with the current time and crate version
    #[must_use]
    pub fn new(key: impl Into<String>, serializer: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            serializer: serializer.into(),
            dump_options: Options::new(),
            metadata: BTreeMap::new(),
            created_at: Utc::now(),
            fingerprint: None,
            memento_version: MEMENTO_VERSION.to_string(),
        }
    }

    /// Sidecar path for a key
    #[must_use]
    pub fn sidecar_path(key: &str) -> String {
        format!("{key}{SIDECAR_SUFFIX}")
    }

    /// Encode as pretty JSON
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| Error::serialization(format!("Failed to encode artifact: {e}")))
    }

    /// Decode from JSON
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::serialization(format!("Failed to parse artifact: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sidecar_path() {
        assert_eq!(Artifact::sidecar_path("foo.csv"), "foo.csv.artifact.json");
        assert_eq!(
            Artifact::sidecar_path("a/b.dataset"),
            "a/b.dataset.artifact.json"
        );
    }

    #[test]
    fn test_artifact_json_roundtrip() {
        let mut artifact = Artifact::new("bar", "generic");
        artifact.metadata.insert("owner".into(), json!("tests"));
        artifact.fingerprint = Some(Fingerprint::from_hex(&"ab".repeat(32)).unwrap());

        let bytes = artifact.to_json().unwrap();
        assert_eq!(Artifact::from_json(&bytes).unwrap(), artifact);
    }

    #[test]
    fn test_artifact_without_optional_fields() {
        let raw = json!({
            "key": "bar",
            "serializer": "json",
            "created_at": "2024-01-01T00:00:00Z",
            "memento_version": "0.1.0"
        });
        let artifact = Artifact::from_json(raw.to_string().as_bytes()).unwrap();
        assert!(artifact.fingerprint.is_none());
        assert!(artifact.dump_options.is_empty());
    }

    #[test]
    fn test_artifact_rejects_garbage() {
        assert!(matches!(
            Artifact::from_json(b"not json"),
            Err(Error::Serialization { .. })
        ));
    }
}
