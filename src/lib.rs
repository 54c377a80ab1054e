//! EPI evidence packages
//!
//! Records what an AI-driven workflow did (model calls, shell commands,
//! file I/O, custom events and the artifacts they produced) into an
//! append-only session, then seals it into a portable `.epi` package whose
//! integrity and origin any third party can check offline.
//!
//! ```text
//! Recorder ──open_session──▶ RecordingSession ──close──▶ ClosedSession
//!                                                          │ assemble
//!                                                          ▼
//!           verify_package ◀── .epi ◀── write_to ◀── EvidencePackage ◀── sign_package
//! ```

pub mod artifact;
pub mod config;
pub mod package;
pub mod recorder;
pub mod session;
pub mod signing;
pub mod verify;

pub use artifact::{ArtifactDigest, ArtifactStore, StoreError};
pub use config::{ConfigError, EffectiveConfig, RecorderConfig};
pub use package::{assemble, read_package, AssembleError, EvidencePackage, Manifest, PackageError, PackageReader};
pub use recorder::{Recorder, RecorderError};
pub use session::{
    Attachment, ClosedSession, SessionError, SessionHandle, SessionMetadata, Step, StepKind,
};
pub use signing::{sign_package, SignatureBlock, SigningError, TrustStore};
pub use verify::{verify_package, TrustLevel, VerificationReport};

pub use epi_canonical::{CanonicalError, CanonicalValue};
pub use epi_redact::{RedactionConfig, RedactionRecord, RedactionRule, Redactor};
