//! Artifact Record - content-addressable storage for run outputs

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// What to store as an artifact.
#[derive(Debug, Clone)]
pub enum ArtifactSource {
    /// Read the bytes of a local file.
    File(PathBuf),
    /// Raw bytes, e.g. an already serialized model.
    Bytes(Vec<u8>),
    /// A JSON document, e.g. model coefficients.
    Json(serde_json::Value),
}

impl ArtifactSource {
    /// Materialize the source into bytes.
    ///
    /// # Errors
    /// Returns an IO error if a file source cannot be read
    pub(crate) fn into_bytes(self) -> Result<(ArtifactKind, Vec<u8>)> {
        match self {
            Self::File(path) => Ok((ArtifactKind::File, std::fs::read(path)?)),
            Self::Bytes(bytes) => Ok((ArtifactKind::Bytes, bytes)),
            Self::Json(value) => Ok((ArtifactKind::Json, serde_json::to_vec(&value)?)),
        }
    }
}

/// Source kind an artifact was logged from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArtifactKind {
    /// Copied from a local file.
    File,
    /// Raw bytes.
    Bytes,
    /// JSON document.
    Json,
}

/// Artifact Record represents a stored artifact from a run.
///
/// Artifacts are stored using content-addressable storage (CAS),
/// where the `cas_hash` uniquely identifies the artifact content.
///
/// ## CAS Hash Format
///
/// The `cas_hash` follows the format: `algorithm:hex_digest`, e.g.
/// `sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactRecord {
    run_id: String,
    artifact_path: String,
    kind: ArtifactKind,
    cas_hash: String,
    size_bytes: u64,
    created_at: DateTime<Utc>,
}

impl ArtifactRecord {
    /// Create a record for `bytes` stored at `artifact_path` under a run.
    #[must_use]
    pub fn new(
        run_id: impl Into<String>,
        artifact_path: impl Into<String>,
        kind: ArtifactKind,
        bytes: &[u8],
    ) -> Self {
        Self {
            run_id: run_id.into(),
            artifact_path: artifact_path.into(),
            kind,
            cas_hash: content_hash(bytes),
            size_bytes: bytes.len() as u64,
            created_at: Utc::now(),
        }
    }

    /// Get the run ID.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Get the artifact path relative to the run (e.g. "model").
    #[must_use]
    pub fn artifact_path(&self) -> &str {
        &self.artifact_path
    }

    /// Get the source kind.
    #[must_use]
    pub const fn kind(&self) -> ArtifactKind {
        self.kind
    }

    /// Get the content-addressable hash.
    #[must_use]
    pub fn cas_hash(&self) -> &str {
        &self.cas_hash
    }

    /// Get the artifact size in bytes.
    #[must_use]
    pub const fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Get the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// URI addressing this artifact: `runs:/<run_id>/<artifact_path>`
    #[must_use]
    pub fn uri(&self) -> String {
        RunArtifactUri::new(&self.run_id, &self.artifact_path).to_string()
    }
}

/// `sha256:<hex>` digest of artifact content.
#[must_use]
pub fn content_hash(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
}

/// Parsed `runs:/<run_id>/<artifact_path>` URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunArtifactUri {
    run_id: String,
    artifact_path: String,
}

impl RunArtifactUri {
    /// Scheme prefix of run artifact URIs
    pub const SCHEME: &'static str = "runs:/";

    /// Build a URI from its parts.
    #[must_use]
    pub fn new(run_id: impl Into<String>, artifact_path: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            artifact_path: artifact_path.into(),
        }
    }

    /// Run ID part
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Artifact path part
    #[must_use]
    pub fn artifact_path(&self) -> &str {
        &self.artifact_path
    }
}

impl FromStr for RunArtifactUri {
    type Err = Error;

    fn from_str(uri: &str) -> Result<Self> {
        let rest = uri.strip_prefix(Self::SCHEME).ok_or_else(|| {
            Error::InvalidInput(format!("'{uri}' is not a runs:/<run_id>/<path> URI"))
        })?;
        let (run_id, path) = rest.trim_start_matches('/').split_once('/').ok_or_else(|| {
            Error::InvalidInput(format!("'{uri}' is missing an artifact path"))
        })?;

        let path = path.trim_matches('/');
        if run_id.is_empty() || path.is_empty() {
            return Err(Error::InvalidInput(format!(
                "'{uri}' needs both a run ID and an artifact path"
            )));
        }
        Ok(Self::new(run_id, path))
    }
}

impl fmt::Display for RunArtifactUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}/{}", Self::SCHEME, self.run_id, self.artifact_path)
    }
}

/// Reject artifact paths that would escape the run's artifact directory.
pub(crate) fn validate_artifact_path(path: &str) -> Result<String> {
    let trimmed = path.trim().trim_matches('/');
    if trimmed.is_empty() {
        return Err(Error::InvalidInput("artifact path must not be empty".to_string()));
    }
    if trimmed.split('/').any(|part| part.is_empty() || part == "." || part == "..") {
        return Err(Error::InvalidInput(format!(
            "artifact path '{path}' must be a relative path without '.' or '..' segments"
        )));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_record_new() {
        let artifact = ArtifactRecord::new("run-1", "model", ArtifactKind::Bytes, b"weights");
        assert_eq!(artifact.run_id(), "run-1");
        assert_eq!(artifact.artifact_path(), "model");
        assert_eq!(artifact.size_bytes(), 7);
        assert_eq!(artifact.uri(), "runs:/run-1/model");
    }

    #[test]
    fn test_artifact_cas_hash_format() {
        let artifact = ArtifactRecord::new("run-1", "data.bin", ArtifactKind::Bytes, b"");
        assert_eq!(
            artifact.cas_hash(),
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_parse_run_uri() {
        let uri: RunArtifactUri = "runs:/abc123/log-model".parse().unwrap();
        assert_eq!(uri.run_id(), "abc123");
        assert_eq!(uri.artifact_path(), "log-model");
        assert_eq!(uri.to_string(), "runs:/abc123/log-model");

        let nested: RunArtifactUri = "runs:/abc123/model/model.json".parse().unwrap();
        assert_eq!(nested.artifact_path(), "model/model.json");
    }

    #[test]
    fn test_parse_run_uri_rejects_malformed() {
        for bad in ["models:/x/1", "runs:/abc123", "runs://model", "runs:/abc/"] {
            assert!(bad.parse::<RunArtifactUri>().is_err(), "{bad} should fail");
        }
    }

    #[test]
    fn test_validate_artifact_path() {
        assert_eq!(validate_artifact_path("/model/").unwrap(), "model");
        assert!(validate_artifact_path("../etc").is_err());
        assert!(validate_artifact_path("a//b").is_err());
        assert!(validate_artifact_path("").is_err());
    }
}
