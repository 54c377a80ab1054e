//! manifest.json: the package header, artifact index and signature

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use epi_redact::RedactionRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::artifact::{ArtifactDigest, ArtifactInfo};
use crate::session::SessionMetadata;
use crate::signing::SignatureBlock;

/// Package format version written by this library.
pub const SPEC_VERSION: &str = "1.0";

/// Content of the leading `mimetype` entry.
pub const MIMETYPE: &str = "application/vnd.epi+zip";

pub const MIMETYPE_ENTRY: &str = "mimetype";
pub const MANIFEST_ENTRY: &str = "manifest.json";
pub const STEPS_ENTRY: &str = "steps.ndjson";
pub const VIEWER_ENTRY: &str = "viewer.html";
pub const ARTIFACTS_PREFIX: &str = "artifacts/";

/// Archive path of an artifact.
pub fn artifact_entry_name(digest: &ArtifactDigest) -> String {
    format!("{}{}", ARTIFACTS_PREFIX, digest)
}

/// Package manifest
///
/// Everything except `aggregate_sha256` and `signature` is covered by the
/// aggregate digest: the header fields via [`Manifest::header_value`], the
/// artifact index directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    pub spec_version: String,

    /// When the session was closed
    pub created_at: DateTime<Utc>,

    pub session_id: String,

    pub opened_at: DateTime<Utc>,

    /// Redacted session metadata
    pub metadata: SessionMetadata,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metadata_redactions: Vec<RedactionRecord>,

    pub step_count: u64,

    /// SHA-256 of the raw steps.ndjson bytes
    pub step_log_sha256: String,

    /// Every artifact in the package, keyed by digest
    pub artifacts: BTreeMap<ArtifactDigest, ArtifactInfo>,

    /// Hex SHA-256 over the canonical encoding of header, steps and index
    pub aggregate_sha256: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<SignatureBlock>,
}

impl Manifest {
    /// The hashed header, as a JSON value.
    pub fn header_value(&self) -> Result<Value, serde_json::Error> {
        Ok(serde_json::json!({
            "spec_version": self.spec_version,
            "created_at": self.created_at,
            "session_id": self.session_id,
            "opened_at": self.opened_at,
            "metadata": serde_json::to_value(&self.metadata)?,
            "metadata_redactions": serde_json::to_value(&self.metadata_redactions)?,
            "step_count": self.step_count,
            "step_log_sha256": self.step_log_sha256,
        }))
    }

    /// Aggregate digest as raw bytes.
    ///
    /// `None` when the stored value is not 64 hex characters.
    pub fn aggregate_digest(&self) -> Option<[u8; 32]> {
        let bytes = hex::decode(&self.aggregate_sha256).ok()?;
        bytes.try_into().ok()
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    /// Canonical (JCS) JSON bytes, as written into the archive.
    pub fn to_canonical_json(&self) -> Result<Vec<u8>, String> {
        serde_json_canonicalizer::to_vec(self).map_err(|e| e.to_string())
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
