//! Package assembly from a closed session
//!
//! Assembly is a pure function of the closed session and the artifact
//! store: it collects the referenced artifacts, writes the step log as one
//! JCS line per step and computes the aggregate digest over
//!
//! ```text
//! canonical({ "metadata": header, "steps": [step...], "artifacts": index })
//! ```
//!
//! The verifier recomputes the same value from the archive with
//! [`compute_aggregate_digest`].

use std::collections::BTreeMap;

use epi_canonical::{CanonicalError, CanonicalValue};
use serde_json::Value;
use thiserror::Error;

use super::container::EvidencePackage;
use super::manifest::{Manifest, SPEC_VERSION};
use crate::artifact::{ArtifactDigest, ArtifactInfo, ArtifactStore, StoreError};
use crate::session::ClosedSession;

/// Errors from package assembly
#[derive(Debug, Error)]
pub enum AssembleError {
    #[error("step {seq} references artifact {digest} which is not in the store")]
    DanglingArtifactReference { seq: u64, digest: ArtifactDigest },

    #[error("an assembly of this session is already in progress")]
    AssemblyInProgress,

    #[error(transparent)]
    Canonical(#[from] CanonicalError),

    #[error("artifact store error: {0}")]
    Store(#[from] StoreError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("JCS canonicalization error: {0}")]
    Jcs(String),
}

/// Aggregate digest of a manifest header, parsed step lines and index.
///
/// `manifest.aggregate_sha256` and `manifest.signature` are ignored.
pub fn compute_aggregate_digest(manifest: &Manifest, steps: &[Value]) -> Result<[u8; 32], CanonicalError> {
    let header = manifest
        .header_value()
        .map_err(|e| CanonicalError::Serialize(e.to_string()))?;

    let steps = steps
        .iter()
        .map(CanonicalValue::from_json_interop)
        .collect::<Result<Vec<_>, _>>()?;

    let mut root = CanonicalValue::map();
    root.insert("metadata", CanonicalValue::from_json_interop(&header)?);
    root.insert("steps", CanonicalValue::Seq(steps));
    root.insert("artifacts", CanonicalValue::from_serialize(&manifest.artifacts)?);
    Ok(epi_canonical::digest(&root))
}

/// Assemble an unsigned package.
///
/// Fails with [`AssembleError::AssemblyInProgress`] if another thread is
/// assembling the same session, and with
/// [`AssembleError::DanglingArtifactReference`] if a step references an
/// artifact the store does not hold.
pub fn assemble(session: &ClosedSession, store: &ArtifactStore) -> Result<EvidencePackage, AssembleError> {
    let _guard = session
        .try_begin_assembly()
        .ok_or(AssembleError::AssemblyInProgress)?;

    let mut index: BTreeMap<ArtifactDigest, ArtifactInfo> = BTreeMap::new();
    let mut artifacts: BTreeMap<ArtifactDigest, Vec<u8>> = BTreeMap::new();
    let mut step_log = Vec::new();
    let mut step_values = Vec::with_capacity(session.steps.len());

    for step in &session.steps {
        for digest in &step.artifacts {
            if index.contains_key(digest) {
                continue;
            }
            let artifact = match store.get_artifact(digest) {
                Ok(artifact) => artifact,
                Err(StoreError::NotFound(_)) => {
                    return Err(AssembleError::DanglingArtifactReference {
                        seq: step.seq,
                        digest: digest.clone(),
                    })
                }
                Err(e) => return Err(e.into()),
            };
            index.insert(
                digest.clone(),
                ArtifactInfo {
                    size: artifact.bytes.len() as u64,
                    media_type: artifact.media_type,
                    name: artifact.name,
                },
            );
            artifacts.insert(digest.clone(), artifact.bytes);
        }

        let line = serde_json_canonicalizer::to_vec(step).map_err(|e| AssembleError::Jcs(e.to_string()))?;
        // Hash what a reader will parse, not the in-memory value.
        step_values.push(serde_json::from_slice::<Value>(&line)?);
        step_log.extend_from_slice(&line);
        step_log.push(b'\n');
    }

    let mut manifest = Manifest {
        spec_version: SPEC_VERSION.to_string(),
        created_at: session.closed_at,
        session_id: session.session_id.clone(),
        opened_at: session.opened_at,
        metadata: session.metadata.clone(),
        metadata_redactions: session.metadata_redactions.clone(),
        step_count: session.steps.len() as u64,
        step_log_sha256: epi_canonical::sha256_hex(&step_log),
        artifacts: index,
        aggregate_sha256: String::new(),
        signature: None,
    };
    let digest = compute_aggregate_digest(&manifest, &step_values)?;
    manifest.aggregate_sha256 = hex::encode(digest);

    tracing::info!(
        session_id = %manifest.session_id,
        steps = manifest.step_count,
        artifacts = manifest.artifacts.len(),
        aggregate = %manifest.aggregate_sha256,
        "package assembled"
    );

    Ok(EvidencePackage::new(manifest, step_log, artifacts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Attachment, RecordingSession, SessionMetadata, StepKind};
    use epi_redact::Redactor;
    use serde_json::json;
    use std::sync::Arc;

    fn session_with_store() -> (RecordingSession, Arc<ArtifactStore>) {
        let store = Arc::new(ArtifactStore::in_memory());
        let session = RecordingSession::open(
            SessionMetadata::new("assemble"),
            Arc::clone(&store),
            Arc::new(Redactor::default()),
        );
        (session, store)
    }

    #[test]
    fn test_assembly_is_deterministic() {
        let (session, store) = session_with_store();
        session
            .log_step(StepKind::ModelCall, json!({"model": "x", "prompt": "hi"}), vec![])
            .unwrap();
        session
            .log_step(
                StepKind::FileIo,
                json!({"path": "a.bin"}),
                vec![Attachment::binary(vec![1u8, 2, 3])],
            )
            .unwrap();
        let closed = session.close();

        let first = assemble(&closed, &store).unwrap();
        let second = assemble(&closed, &store).unwrap();
        assert_eq!(first.manifest(), second.manifest());
        assert_eq!(first.step_log(), second.step_log());
        assert_eq!(first.manifest().step_count, 2);
        assert_eq!(first.manifest().artifacts.len(), 1);
    }

    #[test]
    fn test_step_log_is_one_line_per_step() {
        let (session, store) = session_with_store();
        for i in 0..3 {
            session.log_step(StepKind::CustomEvent, json!({ "i": i }), vec![]).unwrap();
        }
        let package = assemble(&session.close(), &store).unwrap();

        let text = std::str::from_utf8(package.step_log()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        for (i, line) in lines.iter().enumerate() {
            let value: Value = serde_json::from_str(line).unwrap();
            assert_eq!(value["seq"], i as u64 + 1);
        }
    }

    #[test]
    fn test_aggregate_recomputes_from_parsed_lines() {
        let (session, store) = session_with_store();
        session
            .log_step(StepKind::ShellCommand, json!({"cmd": "ls", "exit": 0}), vec![])
            .unwrap();
        let package = assemble(&session.close(), &store).unwrap();

        let values: Vec<Value> = std::str::from_utf8(package.step_log())
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        let digest = compute_aggregate_digest(package.manifest(), &values).unwrap();
        assert_eq!(hex::encode(digest), package.manifest().aggregate_sha256);
    }

    #[test]
    fn test_metadata_change_changes_aggregate() {
        let (session, store) = session_with_store();
        let package = assemble(&session.close(), &store).unwrap();

        let mut manifest = package.manifest().clone();
        let before = compute_aggregate_digest(&manifest, &[]).unwrap();
        manifest.metadata.approved = true;
        let after = compute_aggregate_digest(&manifest, &[]).unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn test_dangling_reference_fails() {
        let (session, _store) = session_with_store();
        session
            .log_step(
                StepKind::ArtifactReference,
                json!({}),
                vec![Attachment::binary(b"kept".to_vec())],
            )
            .unwrap();
        let closed = session.close();

        let empty = ArtifactStore::in_memory();
        let err = assemble(&closed, &empty).unwrap_err();
        assert!(matches!(
            err,
            AssembleError::DanglingArtifactReference { seq: 1, .. }
        ));
    }

    #[test]
    fn test_concurrent_assembly_rejected() {
        let (session, store) = session_with_store();
        let closed = session.close();

        let guard = closed.try_begin_assembly().unwrap();
        let err = assemble(&closed, &store).unwrap_err();
        assert!(matches!(err, AssembleError::AssemblyInProgress));
        drop(guard);

        assert!(assemble(&closed, &store).is_ok());
    }
}
