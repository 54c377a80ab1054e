//! Timeline step types

use chrono::{DateTime, Utc};
use epi_redact::RedactionRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::artifact::ArtifactDigest;

/// Kind of recorded event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepKind {
    ModelCall,
    ShellCommand,
    FileIo,
    CustomEvent,
    ArtifactReference,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::ModelCall => "model-call",
            StepKind::ShellCommand => "shell-command",
            StepKind::FileIo => "file-io",
            StepKind::CustomEvent => "custom-event",
            StepKind::ArtifactReference => "artifact-reference",
        }
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable timeline entry (one line of steps.ndjson)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Sequence number, starting at 1, gapless
    pub seq: u64,

    /// Wall-clock time of the append (informational, not an ordering key)
    pub timestamp: DateTime<Utc>,

    pub kind: StepKind,

    /// Redacted, kind-specific payload
    pub payload: Value,

    /// Digests of attached artifacts, in attachment order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<ArtifactDigest>,

    /// Redaction audit entries for this step
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub redactions: Vec<RedactionRecord>,
}

/// Raw content attached to a step, stored in the artifact store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub content: Vec<u8>,
    pub media_type: String,
    pub name: Option<String>,
}

/// Media types whose content is redacted as text before storage.
const TEXTUAL_MEDIA_TYPES: &[&str] = &[
    "application/json",
    "application/x-ndjson",
    "application/xml",
    "application/yaml",
];

impl Attachment {
    pub fn new(content: impl Into<Vec<u8>>, media_type: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            media_type: media_type.into(),
            name: None,
        }
    }

    /// UTF-8 text attachment (`text/plain`).
    pub fn text(content: impl Into<String>) -> Self {
        Self::new(content.into().into_bytes(), "text/plain")
    }

    /// Opaque binary attachment.
    pub fn binary(content: impl Into<Vec<u8>>) -> Self {
        Self::new(content, "application/octet-stream")
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Whether the declared media type carries text.
    pub fn is_textual(&self) -> bool {
        let essence = self
            .media_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        essence.starts_with("text/") || TEXTUAL_MEDIA_TYPES.contains(&essence.as_str())
    }
}
