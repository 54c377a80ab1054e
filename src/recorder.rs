//! Recorder: the entry point for collaborators
//!
//! A [`Recorder`] owns the artifact store and redactor built from a
//! [`RecorderConfig`] and hands out sessions that share them.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use ed25519_dalek::SigningKey;
use epi_redact::Redactor;
use thiserror::Error;

use crate::artifact::{ArtifactStore, StoreError};
use crate::config::{ConfigError, RecorderConfig, StoreBackend};
use crate::package::{self, default_package_path, AssembleError, EvidencePackage, PackageError};
use crate::session::{RecordingSession, SessionHandle, SessionMetadata};
use crate::signing::{self, KeyStore, SigningError, TrustStore};
use crate::verify::{self, VerificationReport};

/// Errors from recorder operations
#[derive(Debug, Error)]
pub enum RecorderError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Assemble(#[from] AssembleError),

    #[error(transparent)]
    Signing(#[from] SigningError),

    #[error(transparent)]
    Package(#[from] PackageError),

    #[error("cannot read viewer asset {path}: {source}")]
    Viewer {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no signing key directory configured")]
    NoKeyDir,
}

/// Session factory and package pipeline
#[derive(Debug)]
pub struct Recorder {
    config: RecorderConfig,
    store: Arc<ArtifactStore>,
    redactor: Arc<Redactor>,
}

impl Recorder {
    /// Build the store and redactor described by `config`.
    pub fn new(config: RecorderConfig) -> Result<Self, RecorderError> {
        config.validate()?;

        let store = match (config.store.backend, config.store.path.as_ref()) {
            (StoreBackend::Directory, Some(path)) => ArtifactStore::open_directory(path)?,
            (StoreBackend::Directory, None) => {
                return Err(ConfigError::Invalid("store.path is required".to_string()).into())
            }
            (StoreBackend::Memory, _) => ArtifactStore::in_memory(),
        };

        let redactor = Redactor::new(&config.redaction.rule_set());
        if redactor.broken_rules() > 0 {
            tracing::warn!(
                broken = redactor.broken_rules(),
                "redaction rules failed to compile; affected strings are masked in full"
            );
        }

        Ok(Self {
            config,
            store: Arc::new(store),
            redactor: Arc::new(redactor),
        })
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    /// Open a new session sharing this recorder's store and redactor.
    pub fn open_session(&self, metadata: SessionMetadata) -> SessionHandle {
        Arc::new(RecordingSession::open(
            metadata,
            Arc::clone(&self.store),
            Arc::clone(&self.redactor),
        ))
    }

    /// Close `session` and assemble its package.
    ///
    /// The configured viewer and compression are applied. The package is
    /// unsigned and not yet written.
    pub fn close_session(&self, session: &RecordingSession) -> Result<EvidencePackage, RecorderError> {
        let closed = session.close();
        let mut package = package::assemble(&closed, &self.store)?.with_compression(self.config.package.compression);

        if let Some(path) = &self.config.package.viewer {
            let html = fs::read(path).map_err(|source| RecorderError::Viewer {
                path: path.clone(),
                source,
            })?;
            package = package.with_viewer(html);
        }
        Ok(package)
    }

    /// Signing key named in the configuration.
    pub fn signing_key(&self) -> Result<SigningKey, RecorderError> {
        let dir = self.config.signing.key_dir.as_ref().ok_or(RecorderError::NoKeyDir)?;
        Ok(KeyStore::new(dir).load_signing_key(&self.config.signing.key_name)?)
    }

    /// Trusted keys from `signing.trusted_key_dir`, if configured.
    pub fn trust_store(&self) -> Result<Option<TrustStore>, RecorderError> {
        match &self.config.signing.trusted_key_dir {
            Some(dir) => Ok(Some(TrustStore::from_dir(dir)?)),
            None => Ok(None),
        }
    }

    pub fn sign_package(&self, package: &EvidencePackage, key: &SigningKey) -> Result<EvidencePackage, RecorderError> {
        Ok(signing::sign_package(package, key)?)
    }

    /// Write `package` to `<output_dir>/<stem>_<timestamp>.epi`.
    pub fn persist(&self, package: &EvidencePackage, stem: &str) -> Result<PathBuf, RecorderError> {
        let path = default_package_path(&self.config.output_dir, stem, Utc::now());
        package.write_to(&path)?;
        Ok(path)
    }

    /// Verify against the configured trust store, if any.
    pub fn verify_package(&self, path: &Path) -> Result<VerificationReport, RecorderError> {
        let trust = self.trust_store()?;
        Ok(verify::verify_package(path, trust.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Attachment, StepKind};
    use crate::verify::TrustLevel;
    use serde_json::json;
    use tempfile::TempDir;

    fn config_in(dir: &Path) -> RecorderConfig {
        RecorderConfig {
            output_dir: dir.join("out"),
            ..RecorderConfig::default()
        }
    }

    #[test]
    fn test_record_persist_verify() {
        let dir = TempDir::new().unwrap();
        let recorder = Recorder::new(config_in(dir.path())).unwrap();

        let session = recorder.open_session(SessionMetadata::new("facade"));
        session
            .log_step(StepKind::ShellCommand, json!({"cmd": "make"}), vec![Attachment::text("ok")])
            .unwrap();
        let package = recorder.close_session(&session).unwrap();

        let path = recorder.persist(&package, "facade").unwrap();
        assert!(path.starts_with(dir.path().join("out")));
        assert_eq!(path.extension().unwrap(), "epi");

        let report = recorder.verify_package(&path).unwrap();
        assert_eq!(report.trust, TrustLevel::Medium);
    }

    #[test]
    fn test_signing_with_configured_keys() {
        let dir = TempDir::new().unwrap();
        let key = SigningKey::generate(&mut rand::thread_rng());
        KeyStore::new(dir.path().join("keys")).save("default", &key).unwrap();

        let mut config = config_in(dir.path());
        config.signing.key_dir = Some(dir.path().join("keys"));
        config.signing.trusted_key_dir = Some(dir.path().join("keys"));
        let recorder = Recorder::new(config).unwrap();

        let session = recorder.open_session(SessionMetadata::new("signed"));
        session.log_step(StepKind::CustomEvent, json!({"event": "x"}), vec![]).unwrap();
        let package = recorder.close_session(&session).unwrap();
        let signed = recorder.sign_package(&package, &recorder.signing_key().unwrap()).unwrap();
        let path = recorder.persist(&signed, "signed").unwrap();

        let report = recorder.verify_package(&path).unwrap();
        assert_eq!(report.trust, TrustLevel::High);
    }

    #[test]
    fn test_no_key_dir() {
        let dir = TempDir::new().unwrap();
        let recorder = Recorder::new(config_in(dir.path())).unwrap();
        assert!(matches!(recorder.signing_key(), Err(RecorderError::NoKeyDir)));
    }

    #[test]
    fn test_viewer_embedded() {
        let dir = TempDir::new().unwrap();
        let viewer = dir.path().join("viewer.html");
        fs::write(&viewer, "<html>v</html>").unwrap();

        let mut config = config_in(dir.path());
        config.package.viewer = Some(viewer);
        let recorder = Recorder::new(config).unwrap();

        let session = recorder.open_session(SessionMetadata::new("viewer"));
        let package = recorder.close_session(&session).unwrap();
        assert_eq!(package.viewer(), Some(&b"<html>v</html>"[..]));
    }

    #[test]
    fn test_directory_store() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(dir.path());
        config.store.backend = StoreBackend::Directory;
        config.store.path = Some(dir.path().join("blobs"));
        let recorder = Recorder::new(config).unwrap();

        let session = recorder.open_session(SessionMetadata::new("dir"));
        session
            .log_step(StepKind::FileIo, json!({}), vec![Attachment::binary(vec![1u8, 2])])
            .unwrap();
        let package = recorder.close_session(&session).unwrap();
        assert_eq!(package.artifacts().len(), 1);
    }
}
