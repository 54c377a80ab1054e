//! Three-level package verification
//!
//! 1. Structural: the archive opens, `mimetype` is the first entry with the
//!    right content and no compression, the manifest parses and the step
//!    log is present.
//! 2. Integrity: the step log, every artifact and the aggregate digest all
//!    recompute to the values in the manifest. Every problem at this level
//!    is collected, not just the first.
//! 3. Authenticity: the signature, if present, verifies over the aggregate
//!    digest under an accepted key.
//!
//! A level runs only if the previous one passed. Verification never
//! returns an error; every outcome is a [`VerificationReport`].

mod report;

pub use report::{FailureKind, Issue, LevelStatus, TrustLevel, VerificationFailure, VerificationLevel, VerificationReport};

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{Cursor, Read, Seek};
use std::path::Path;

use serde_json::Value;
use zip::{CompressionMethod, ZipArchive};

use crate::artifact::ArtifactDigest;
use crate::package::{
    artifact_entry_name, compute_aggregate_digest, read_entry, Manifest, PackageError, ARTIFACTS_PREFIX,
    MANIFEST_ENTRY, MIMETYPE, MIMETYPE_ENTRY, STEPS_ENTRY, VIEWER_ENTRY,
};
use crate::session::Step;
use crate::signing::{compute_key_fingerprint, SigningError, TrustStore};

/// Major format version this verifier understands.
const SUPPORTED_MAJOR_VERSION: &str = "1";

/// Verify the package at `path`.
///
/// With `trusted`, the signature must verify under one of its keys. Without
/// it, the key declared in the signature block is used, after checking its
/// fingerprint.
pub fn verify_package(path: &Path, trusted: Option<&TrustStore>) -> VerificationReport {
    let report = match File::open(path) {
        Ok(file) => verify_reader(file, trusted),
        Err(e) => VerificationReport::failed(
            VerificationLevel::Structural,
            vec![Issue::Unreadable { detail: e.to_string() }],
            None,
        ),
    };

    match report.failure.as_ref() {
        None => tracing::info!(path = %path.display(), trust = %report.trust, "package verified"),
        Some(failure) => tracing::warn!(
            path = %path.display(),
            level = failure.level.number(),
            reason = %failure.reason,
            "package verification failed"
        ),
    }
    report
}

/// Verify package bytes held in memory.
pub fn verify_bytes(bytes: &[u8], trusted: Option<&TrustStore>) -> VerificationReport {
    verify_reader(Cursor::new(bytes), trusted)
}

/// Verify a package from any seekable reader.
pub fn verify_reader<R: Read + Seek>(reader: R, trusted: Option<&TrustStore>) -> VerificationReport {
    let mut archive = match ZipArchive::new(reader) {
        Ok(archive) => archive,
        Err(e) => {
            return VerificationReport::failed(
                VerificationLevel::Structural,
                vec![Issue::NotAZip { detail: e.to_string() }],
                None,
            )
        }
    };

    let manifest = match check_structure(&mut archive) {
        Ok(manifest) => manifest,
        Err(issue) => return VerificationReport::failed(VerificationLevel::Structural, vec![issue], None),
    };

    let issues = check_integrity(&mut archive, &manifest);
    if !issues.is_empty() {
        return VerificationReport::failed(VerificationLevel::Integrity, issues, Some(&manifest));
    }

    check_authenticity(&manifest, trusted)
}

fn check_structure<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<Manifest, Issue> {
    if archive.len() == 0 {
        return Err(Issue::MissingEntry {
            entry: MIMETYPE_ENTRY.to_string(),
        });
    }

    {
        let mut first = archive.by_index(0).map_err(|e| Issue::NotAZip { detail: e.to_string() })?;
        if first.name() != MIMETYPE_ENTRY {
            return Err(Issue::InvalidMimetype {
                detail: format!("first entry is {}", first.name()),
            });
        }
        if first.compression() != CompressionMethod::Stored {
            return Err(Issue::InvalidMimetype {
                detail: "mimetype entry is compressed".to_string(),
            });
        }
        let mut content = Vec::new();
        first
            .read_to_end(&mut content)
            .map_err(|e| Issue::InvalidMimetype { detail: e.to_string() })?;
        if content != MIMETYPE.as_bytes() {
            return Err(Issue::InvalidMimetype {
                detail: format!("content is {:?}", String::from_utf8_lossy(&content)),
            });
        }
    }

    let manifest_bytes = read_entry(archive, MANIFEST_ENTRY).map_err(|e| match e {
        PackageError::MissingEntry(entry) => Issue::MissingEntry { entry },
        other => Issue::ManifestUnparseable { detail: other.to_string() },
    })?;
    let manifest: Manifest =
        serde_json::from_slice(&manifest_bytes).map_err(|e| Issue::ManifestUnparseable { detail: e.to_string() })?;

    if !archive.file_names().any(|name| name == STEPS_ENTRY) {
        return Err(Issue::MissingEntry {
            entry: STEPS_ENTRY.to_string(),
        });
    }

    if manifest.spec_version.split('.').next() != Some(SUPPORTED_MAJOR_VERSION) {
        return Err(Issue::UnsupportedSpecVersion {
            version: manifest.spec_version.clone(),
        });
    }

    if manifest.aggregate_digest().is_none() {
        return Err(Issue::MalformedAggregate {
            value: manifest.aggregate_sha256.clone(),
        });
    }

    Ok(manifest)
}

fn check_integrity<R: Read + Seek>(archive: &mut ZipArchive<R>, manifest: &Manifest) -> Vec<Issue> {
    let mut issues = Vec::new();

    match read_entry(archive, STEPS_ENTRY) {
        Ok(bytes) => {
            let actual = epi_canonical::sha256_hex(&bytes);
            if actual != manifest.step_log_sha256 {
                issues.push(Issue::StepLogDigestMismatch {
                    expected: manifest.step_log_sha256.clone(),
                    actual,
                });
            }

            if let Some(values) = check_step_log(&bytes, manifest, &mut issues) {
                match compute_aggregate_digest(manifest, &values) {
                    Ok(digest) => {
                        let actual = hex::encode(digest);
                        if actual != manifest.aggregate_sha256 {
                            issues.push(Issue::AggregateDigestMismatch {
                                expected: manifest.aggregate_sha256.clone(),
                                actual,
                            });
                        }
                    }
                    Err(e) => issues.push(Issue::NonCanonicalContent { detail: e.to_string() }),
                }
            }
        }
        Err(e) => issues.push(Issue::ContentUnreadable {
            entry: STEPS_ENTRY.to_string(),
            detail: e.to_string(),
        }),
    }

    for (digest, info) in &manifest.artifacts {
        let entry = artifact_entry_name(digest);
        match read_entry(archive, &entry) {
            Ok(bytes) => {
                if bytes.len() as u64 != info.size {
                    issues.push(Issue::ArtifactSizeMismatch {
                        digest: digest.to_string(),
                        expected: info.size,
                        actual: bytes.len() as u64,
                    });
                }
                let actual = ArtifactDigest::of(&bytes);
                if &actual != digest {
                    issues.push(Issue::ArtifactDigestMismatch {
                        digest: digest.to_string(),
                        actual: actual.to_string(),
                    });
                }
            }
            Err(PackageError::MissingEntry(_)) => issues.push(Issue::MissingArtifact {
                digest: digest.to_string(),
            }),
            Err(e) => issues.push(Issue::ContentUnreadable {
                entry,
                detail: e.to_string(),
            }),
        }
    }

    let indexed: BTreeSet<String> = manifest.artifacts.keys().map(artifact_entry_name).collect();
    for name in archive.file_names() {
        let known = matches!(name, MIMETYPE_ENTRY | MANIFEST_ENTRY | STEPS_ENTRY | VIEWER_ENTRY)
            || (name.starts_with(ARTIFACTS_PREFIX) && indexed.contains(name));
        if !known {
            issues.push(Issue::UnexpectedEntry { entry: name.to_string() });
        }
    }

    issues
}

/// Parse and check every step line.
///
/// Returns the parsed line values when every line is valid JSON, so the
/// aggregate can be recomputed from exactly what the file holds.
fn check_step_log(bytes: &[u8], manifest: &Manifest, issues: &mut Vec<Issue>) -> Option<Vec<Value>> {
    let body = bytes.strip_suffix(b"\n").unwrap_or(bytes);
    let lines: Vec<&[u8]> = if body.is_empty() {
        Vec::new()
    } else {
        body.split(|b| *b == b'\n').collect()
    };

    let mut values = Vec::with_capacity(lines.len());
    let mut all_parsed = true;
    for (i, line) in lines.iter().enumerate() {
        let line_no = i + 1;
        let value: Value = match serde_json::from_slice(line) {
            Ok(value) => value,
            Err(e) => {
                issues.push(Issue::StepUnparseable {
                    line: line_no,
                    detail: e.to_string(),
                });
                all_parsed = false;
                continue;
            }
        };

        match serde_json::from_value::<Step>(value.clone()) {
            Ok(step) => {
                if step.seq != line_no as u64 {
                    issues.push(Issue::SequenceGap {
                        line: line_no,
                        found: step.seq,
                    });
                }
                for digest in &step.artifacts {
                    if !manifest.artifacts.contains_key(digest) {
                        issues.push(Issue::DanglingArtifactReference {
                            seq: step.seq,
                            digest: digest.to_string(),
                        });
                    }
                }
            }
            Err(e) => issues.push(Issue::StepUnparseable {
                line: line_no,
                detail: e.to_string(),
            }),
        }
        values.push(value);
    }

    if lines.len() as u64 != manifest.step_count {
        issues.push(Issue::StepCountMismatch {
            declared: manifest.step_count,
            actual: lines.len() as u64,
        });
    }

    all_parsed.then_some(values)
}

fn check_authenticity(manifest: &Manifest, trusted: Option<&TrustStore>) -> VerificationReport {
    let Some(block) = &manifest.signature else {
        return VerificationReport::unsigned(manifest);
    };
    let fail = |issue: Issue| VerificationReport::failed(VerificationLevel::Authenticity, vec![issue], Some(manifest));

    let Some(digest) = manifest.aggregate_digest() else {
        return fail(Issue::MalformedAggregate {
            value: manifest.aggregate_sha256.clone(),
        });
    };
    if let Err(e) = block.decoded_signature() {
        return fail(signing_issue(e));
    }

    match trusted {
        Some(trust) => {
            let signer = trust
                .iter()
                .find(|(_, key)| block.verify(&digest, key).unwrap_or(false))
                .map(|(fingerprint, _)| fingerprint.to_string());
            match signer {
                Some(fingerprint) => VerificationReport::authenticated(manifest, fingerprint),
                None => fail(Issue::SignatureMismatch),
            }
        }
        None => match block.declared_key() {
            Ok(key) if block.verify(&digest, &key).unwrap_or(false) => {
                VerificationReport::authenticated(manifest, compute_key_fingerprint(&key))
            }
            Ok(_) => fail(Issue::SignatureMismatch),
            Err(e) => fail(signing_issue(e)),
        },
    }
}

fn signing_issue(error: SigningError) -> Issue {
    match error {
        SigningError::UnsupportedAlgorithm(algorithm) => Issue::UnsupportedAlgorithm { algorithm },
        SigningError::FingerprintMismatch { expected, actual } => Issue::FingerprintMismatch {
            declared: expected,
            actual,
        },
        other => Issue::MalformedSignature {
            detail: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactStore;
    use crate::package::{assemble, Compression, EvidencePackage};
    use crate::session::{Attachment, RecordingSession, SessionMetadata, StepKind};
    use crate::signing::sign_package;
    use ed25519_dalek::SigningKey;
    use epi_redact::Redactor;
    use serde_json::json;
    use std::io::Write;
    use std::sync::Arc;
    use zip::write::SimpleFileOptions;

    fn keypair() -> SigningKey {
        SigningKey::generate(&mut rand::thread_rng())
    }

    fn sample_package() -> EvidencePackage {
        let store = Arc::new(ArtifactStore::in_memory());
        let session = RecordingSession::open(
            SessionMetadata::new("verify"),
            Arc::clone(&store),
            Arc::new(Redactor::default()),
        );
        session
            .log_step(StepKind::ModelCall, json!({"model": "m", "prompt": "p"}), vec![])
            .unwrap();
        session
            .log_step(
                StepKind::FileIo,
                json!({"path": "report.txt"}),
                vec![Attachment::text("report body")],
            )
            .unwrap();
        assemble(&session.close(), &store).unwrap()
    }

    /// Rebuild an archive with entries transformed by `edit`; `None` drops.
    fn rewrite(bytes: &[u8], edit: impl Fn(&str, Vec<u8>) -> Option<Vec<u8>>) -> Vec<u8> {
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut out = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i).unwrap();
            let name = entry.name().to_string();
            let mut content = Vec::new();
            entry.read_to_end(&mut content).unwrap();
            if let Some(content) = edit(&name, content) {
                out.start_file(name, options).unwrap();
                out.write_all(&content).unwrap();
            }
        }
        out.finish().unwrap().into_inner()
    }

    #[test]
    fn test_unsigned_is_medium() {
        let bytes = sample_package().to_bytes().unwrap();
        let report = verify_bytes(&bytes, None);
        assert_eq!(report.trust, TrustLevel::Medium);
        assert_eq!(report.authenticity, LevelStatus::Unsigned);
        assert!(report.is_intact());
        assert!(report.failure.is_none());
    }

    #[test]
    fn test_signed_with_declared_key_is_high() {
        let key = keypair();
        let signed = sign_package(&sample_package(), &key).unwrap();
        let report = verify_bytes(&signed.to_bytes().unwrap(), None);

        assert_eq!(report.trust, TrustLevel::High);
        assert_eq!(
            report.signer_fingerprint.as_deref(),
            Some(compute_key_fingerprint(&key.verifying_key()).as_str())
        );
    }

    #[test]
    fn test_untrusted_signer_fails() {
        let signed = sign_package(&sample_package(), &keypair()).unwrap();
        let trust = TrustStore::new().with_key(keypair().verifying_key());
        let report = verify_bytes(&signed.to_bytes().unwrap(), Some(&trust));

        assert_eq!(report.trust, TrustLevel::Failed);
        assert_eq!(report.level, VerificationLevel::Authenticity);
        assert_eq!(report.reason_code(), Some("signature-mismatch"));
        assert!(report.declared_fingerprint.is_some());
    }

    #[test]
    fn test_not_a_zip() {
        let report = verify_bytes(b"definitely not a zip", None);
        assert_eq!(report.structural, LevelStatus::Failed);
        assert_eq!(report.integrity, LevelStatus::NotReached);
        assert_eq!(report.failure.unwrap().kind, FailureKind::MalformedPackage);
    }

    #[test]
    fn test_wrong_mimetype() {
        let bytes = rewrite(&sample_package().to_bytes().unwrap(), |name, content| {
            if name == MIMETYPE_ENTRY {
                Some(b"application/zip".to_vec())
            } else {
                Some(content)
            }
        });
        let report = verify_bytes(&bytes, None);
        assert_eq!(report.reason_code(), Some("invalid-mimetype"));
    }

    #[test]
    fn test_unhashed_manifest_fields_rejected() {
        let key = keypair();
        let signed = sign_package(&sample_package(), &key).unwrap();
        let trust = TrustStore::new().with_key(key.verifying_key());

        let inject = |edit: fn(&mut Value)| {
            rewrite(&signed.to_bytes().unwrap(), |name, content| {
                if name != MANIFEST_ENTRY {
                    return Some(content);
                }
                let mut manifest: Value = serde_json::from_slice(&content).unwrap();
                edit(&mut manifest);
                Some(serde_json::to_vec(&manifest).unwrap())
            })
        };

        for bytes in [
            inject(|m| m["metadata"]["approved_by_auditor"] = json!("mallory")),
            inject(|m| m["compliance_attestation"] = json!("passed")),
            inject(|m| m["signature"]["countersigned_by"] = json!("mallory")),
            inject(|m| {
                let artifacts = m["artifacts"].as_object_mut().unwrap();
                let info = artifacts.values_mut().next().unwrap();
                info["origin"] = json!("trusted-scanner");
            }),
        ] {
            let report = verify_bytes(&bytes, Some(&trust));
            assert_eq!(report.level, VerificationLevel::Structural);
            assert_eq!(report.trust, TrustLevel::Failed);
            assert_eq!(report.reason_code(), Some("manifest-unparseable"));
        }
    }

    #[test]
    fn test_missing_manifest() {
        let bytes = rewrite(&sample_package().to_bytes().unwrap(), |name, content| {
            (name != MANIFEST_ENTRY).then_some(content)
        });
        let report = verify_bytes(&bytes, None);
        assert_eq!(report.reason_code(), Some("missing-entry"));
        assert_eq!(report.level, VerificationLevel::Structural);
    }

    #[test]
    fn test_edited_step_is_integrity_violation() {
        let signed = sign_package(&sample_package(), &keypair()).unwrap();
        let bytes = rewrite(&signed.to_bytes().unwrap(), |name, content| {
            if name == STEPS_ENTRY {
                let text = String::from_utf8(content).unwrap().replace("\"p\"", "\"q\"");
                Some(text.into_bytes())
            } else {
                Some(content)
            }
        });

        let report = verify_bytes(&bytes, None);
        assert_eq!(report.integrity, LevelStatus::Failed);
        assert_eq!(report.authenticity, LevelStatus::NotReached);
        assert_eq!(report.trust, TrustLevel::Failed);
        let codes: Vec<&str> = report.issues.iter().map(Issue::code).collect();
        assert!(codes.contains(&"step-log-digest-mismatch"));
        assert!(codes.contains(&"aggregate-digest-mismatch"));
    }

    #[test]
    fn test_edited_artifact_detected() {
        let bytes = rewrite(&sample_package().to_bytes().unwrap(), |name, content| {
            if name.starts_with(ARTIFACTS_PREFIX) {
                let mut content = content;
                content[0] ^= 0x01;
                Some(content)
            } else {
                Some(content)
            }
        });
        let report = verify_bytes(&bytes, None);
        assert_eq!(report.reason_code(), Some("artifact-digest-mismatch"));
    }

    #[test]
    fn test_extra_entry_detected() {
        let bytes = sample_package().to_bytes().unwrap();
        let mut archive = zip::ZipWriter::new_append(Cursor::new(bytes)).unwrap();
        archive
            .start_file("artifacts/smuggled", SimpleFileOptions::default())
            .unwrap();
        archive.write_all(b"x").unwrap();
        let bytes = archive.finish().unwrap().into_inner();

        let report = verify_bytes(&bytes, None);
        assert_eq!(report.reason_code(), Some("unexpected-entry"));
    }

    #[test]
    fn test_byte_flip_in_stored_archive() {
        let package = sample_package().with_compression(Compression::Stored);
        let mut bytes = package.to_bytes().unwrap();
        let needle = b"report body";
        let pos = bytes.windows(needle.len()).position(|w| w == needle).unwrap();
        bytes[pos] ^= 0x20;

        let report = verify_bytes(&bytes, None);
        assert_eq!(report.integrity, LevelStatus::Failed);
        assert_eq!(report.failure.unwrap().kind, FailureKind::IntegrityViolation);
    }

    #[test]
    fn test_manifest_metadata_edit_detected() {
        let bytes = rewrite(&sample_package().to_bytes().unwrap(), |name, content| {
            if name == MANIFEST_ENTRY {
                let mut manifest: Manifest = serde_json::from_slice(&content).unwrap();
                manifest.metadata.approved = true;
                Some(serde_json::to_vec(&manifest).unwrap())
            } else {
                Some(content)
            }
        });
        let report = verify_bytes(&bytes, None);
        assert_eq!(report.reason_code(), Some("aggregate-digest-mismatch"));
    }

    #[test]
    fn test_missing_file() {
        let report = verify_package(Path::new("/nonexistent/run.epi"), None);
        assert_eq!(report.reason_code(), Some("unreadable"));
    }
}
