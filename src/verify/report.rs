//! Verification report types

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::package::Manifest;

/// Verification levels, in the order they run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationLevel {
    /// Container shape, mimetype, manifest parse
    Structural,
    /// Digests of step log, artifacts and the aggregate
    Integrity,
    /// Signature over the aggregate digest
    Authenticity,
}

impl VerificationLevel {
    pub fn number(self) -> u8 {
        match self {
            VerificationLevel::Structural => 1,
            VerificationLevel::Integrity => 2,
            VerificationLevel::Authenticity => 3,
        }
    }
}

/// Outcome of one level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelStatus {
    Passed,
    Failed,
    /// Authenticity only: the package carries no signature
    Unsigned,
    /// An earlier level failed
    NotReached,
}

/// Overall trust verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrustLevel {
    /// Intact and signed by an accepted key
    High,
    /// Intact but unsigned
    Medium,
    Failed,
}

impl fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TrustLevel::High => "HIGH",
            TrustLevel::Medium => "MEDIUM",
            TrustLevel::Failed => "FAILED",
        })
    }
}

/// Failure category, one per level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    MalformedPackage,
    IntegrityViolation,
    SignatureInvalid,
}

impl From<VerificationLevel> for FailureKind {
    fn from(level: VerificationLevel) -> Self {
        match level {
            VerificationLevel::Structural => FailureKind::MalformedPackage,
            VerificationLevel::Integrity => FailureKind::IntegrityViolation,
            VerificationLevel::Authenticity => FailureKind::SignatureInvalid,
        }
    }
}

/// A single problem found during verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "kebab-case")]
pub enum Issue {
    // Structural
    Unreadable { detail: String },
    NotAZip { detail: String },
    InvalidMimetype { detail: String },
    MissingEntry { entry: String },
    ManifestUnparseable { detail: String },
    UnsupportedSpecVersion { version: String },
    MalformedAggregate { value: String },

    // Integrity
    ContentUnreadable { entry: String, detail: String },
    StepLogDigestMismatch { expected: String, actual: String },
    StepUnparseable { line: usize, detail: String },
    SequenceGap { line: usize, found: u64 },
    StepCountMismatch { declared: u64, actual: u64 },
    DanglingArtifactReference { seq: u64, digest: String },
    MissingArtifact { digest: String },
    ArtifactSizeMismatch { digest: String, expected: u64, actual: u64 },
    ArtifactDigestMismatch { digest: String, actual: String },
    UnexpectedEntry { entry: String },
    NonCanonicalContent { detail: String },
    AggregateDigestMismatch { expected: String, actual: String },

    // Authenticity
    UnsupportedAlgorithm { algorithm: String },
    MalformedSignature { detail: String },
    FingerprintMismatch { declared: String, actual: String },
    SignatureMismatch,
}

impl Issue {
    /// Stable kebab-case reason code.
    pub fn code(&self) -> &'static str {
        match self {
            Issue::Unreadable { .. } => "unreadable",
            Issue::NotAZip { .. } => "not-a-zip",
            Issue::InvalidMimetype { .. } => "invalid-mimetype",
            Issue::MissingEntry { .. } => "missing-entry",
            Issue::ManifestUnparseable { .. } => "manifest-unparseable",
            Issue::UnsupportedSpecVersion { .. } => "unsupported-spec-version",
            Issue::MalformedAggregate { .. } => "malformed-aggregate",
            Issue::ContentUnreadable { .. } => "content-unreadable",
            Issue::StepLogDigestMismatch { .. } => "step-log-digest-mismatch",
            Issue::StepUnparseable { .. } => "step-unparseable",
            Issue::SequenceGap { .. } => "sequence-gap",
            Issue::StepCountMismatch { .. } => "step-count-mismatch",
            Issue::DanglingArtifactReference { .. } => "dangling-artifact-reference",
            Issue::MissingArtifact { .. } => "missing-artifact",
            Issue::ArtifactSizeMismatch { .. } => "artifact-size-mismatch",
            Issue::ArtifactDigestMismatch { .. } => "artifact-digest-mismatch",
            Issue::UnexpectedEntry { .. } => "unexpected-entry",
            Issue::NonCanonicalContent { .. } => "non-canonical-content",
            Issue::AggregateDigestMismatch { .. } => "aggregate-digest-mismatch",
            Issue::UnsupportedAlgorithm { .. } => "unsupported-algorithm",
            Issue::MalformedSignature { .. } => "malformed-signature",
            Issue::FingerprintMismatch { .. } => "fingerprint-mismatch",
            Issue::SignatureMismatch => "signature-mismatch",
        }
    }

    /// The level that reports this issue.
    pub fn level(&self) -> VerificationLevel {
        match self {
            Issue::Unreadable { .. }
            | Issue::NotAZip { .. }
            | Issue::InvalidMimetype { .. }
            | Issue::MissingEntry { .. }
            | Issue::ManifestUnparseable { .. }
            | Issue::UnsupportedSpecVersion { .. }
            | Issue::MalformedAggregate { .. } => VerificationLevel::Structural,
            Issue::UnsupportedAlgorithm { .. }
            | Issue::MalformedSignature { .. }
            | Issue::FingerprintMismatch { .. }
            | Issue::SignatureMismatch => VerificationLevel::Authenticity,
            _ => VerificationLevel::Integrity,
        }
    }
}

fn short(digest: &str) -> &str {
    digest.get(..12).unwrap_or(digest)
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())?;
        match self {
            Issue::Unreadable { detail }
            | Issue::NotAZip { detail }
            | Issue::InvalidMimetype { detail }
            | Issue::ManifestUnparseable { detail }
            | Issue::MalformedSignature { detail }
            | Issue::NonCanonicalContent { detail } => write!(f, ": {}", detail),
            Issue::MissingEntry { entry } | Issue::UnexpectedEntry { entry } => write!(f, ": {}", entry),
            Issue::UnsupportedSpecVersion { version } => write!(f, ": {}", version),
            Issue::MalformedAggregate { value } => write!(f, ": {}", value),
            Issue::ContentUnreadable { entry, detail } => write!(f, ": {}: {}", entry, detail),
            Issue::StepLogDigestMismatch { expected, actual }
            | Issue::AggregateDigestMismatch { expected, actual } => {
                write!(f, ": expected {}..., got {}...", short(expected), short(actual))
            }
            Issue::StepUnparseable { line, detail } => write!(f, ": line {}: {}", line, detail),
            Issue::SequenceGap { line, found } => write!(f, ": line {} has seq {}", line, found),
            Issue::StepCountMismatch { declared, actual } => {
                write!(f, ": manifest declares {}, log has {}", declared, actual)
            }
            Issue::DanglingArtifactReference { seq, digest } => {
                write!(f, ": step {} references {}...", seq, short(digest))
            }
            Issue::MissingArtifact { digest } => write!(f, ": {}...", short(digest)),
            Issue::ArtifactSizeMismatch { digest, expected, actual } => {
                write!(f, ": {}... ({} vs {} bytes)", short(digest), expected, actual)
            }
            Issue::ArtifactDigestMismatch { digest, actual } => {
                write!(f, ": {}... hashes to {}...", short(digest), short(actual))
            }
            Issue::UnsupportedAlgorithm { algorithm } => write!(f, ": {}", algorithm),
            Issue::FingerprintMismatch { declared, actual } => {
                write!(f, ": declared {}..., key is {}...", short(declared), short(actual))
            }
            Issue::SignatureMismatch => Ok(()),
        }
    }
}

/// The first failure, as reported to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationFailure {
    pub level: VerificationLevel,
    pub kind: FailureKind,
    pub reason: Issue,
}

/// Result of verifying one package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    /// Deepest level attempted
    pub level: VerificationLevel,

    pub structural: LevelStatus,
    pub integrity: LevelStatus,
    pub authenticity: LevelStatus,

    pub trust: TrustLevel,

    /// Fingerprint of the key the signature verified under
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer_fingerprint: Option<String>,

    /// Fingerprint the signature block claims
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declared_fingerprint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_count: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<VerificationFailure>,

    /// Every issue found at the failing level
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<Issue>,
}

impl VerificationReport {
    /// Failed at `level` with `issues` (non-empty).
    pub(crate) fn failed(level: VerificationLevel, issues: Vec<Issue>, manifest: Option<&Manifest>) -> Self {
        let status = |at: VerificationLevel| match at.cmp(&level) {
            std::cmp::Ordering::Less => LevelStatus::Passed,
            std::cmp::Ordering::Equal => LevelStatus::Failed,
            std::cmp::Ordering::Greater => LevelStatus::NotReached,
        };
        let failure = issues.first().map(|reason| VerificationFailure {
            level,
            kind: level.into(),
            reason: reason.clone(),
        });

        Self {
            level,
            structural: status(VerificationLevel::Structural),
            integrity: status(VerificationLevel::Integrity),
            authenticity: status(VerificationLevel::Authenticity),
            trust: TrustLevel::Failed,
            signer_fingerprint: None,
            declared_fingerprint: declared_fingerprint(manifest),
            session_id: manifest.map(|m| m.session_id.clone()),
            step_count: manifest.map(|m| m.step_count),
            failure,
            issues,
        }
    }

    pub(crate) fn unsigned(manifest: &Manifest) -> Self {
        Self {
            level: VerificationLevel::Authenticity,
            structural: LevelStatus::Passed,
            integrity: LevelStatus::Passed,
            authenticity: LevelStatus::Unsigned,
            trust: TrustLevel::Medium,
            signer_fingerprint: None,
            declared_fingerprint: None,
            session_id: Some(manifest.session_id.clone()),
            step_count: Some(manifest.step_count),
            failure: None,
            issues: Vec::new(),
        }
    }

    pub(crate) fn authenticated(manifest: &Manifest, signer: String) -> Self {
        Self {
            level: VerificationLevel::Authenticity,
            structural: LevelStatus::Passed,
            integrity: LevelStatus::Passed,
            authenticity: LevelStatus::Passed,
            trust: TrustLevel::High,
            signer_fingerprint: Some(signer),
            declared_fingerprint: declared_fingerprint(Some(manifest)),
            session_id: Some(manifest.session_id.clone()),
            step_count: Some(manifest.step_count),
            failure: None,
            issues: Vec::new(),
        }
    }

    /// Structure and integrity hold (trust HIGH or MEDIUM).
    pub fn is_intact(&self) -> bool {
        self.structural == LevelStatus::Passed && self.integrity == LevelStatus::Passed
    }

    pub fn is_trusted(&self) -> bool {
        self.trust == TrustLevel::High
    }

    /// Reason code of the failure, if any.
    pub fn reason_code(&self) -> Option<&'static str> {
        self.failure.as_ref().map(|f| f.reason.code())
    }

    /// One-line human-readable summary.
    pub fn summary(&self) -> String {
        match (&self.failure, self.trust) {
            (Some(failure), _) if self.issues.len() > 1 => format!(
                "{}: level {} failed with {} issues (first: {})",
                self.trust,
                failure.level.number(),
                self.issues.len(),
                failure.reason
            ),
            (Some(failure), _) => format!(
                "{}: level {} failed: {}",
                self.trust,
                failure.level.number(),
                failure.reason
            ),
            (None, TrustLevel::High) => format!(
                "{}: signed by {}",
                self.trust,
                self.signer_fingerprint.as_deref().unwrap_or("unknown")
            ),
            (None, _) => format!("{}: intact, unsigned", self.trust),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

fn declared_fingerprint(manifest: Option<&Manifest>) -> Option<String> {
    manifest
        .and_then(|m| m.signature.as_ref())
        .map(|s| s.key_fingerprint.clone())
}
