//! The `.epi` ZIP container
//!
//! Entry order is fixed: `mimetype` (stored, uncompressed) first, then
//! `manifest.json`, `steps.ndjson`, `artifacts/<digest>` in digest order and
//! an optional `viewer.html`. Entry timestamps are pinned so the same
//! package always produces the same archive bytes.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::manifest::{
    artifact_entry_name, Manifest, MANIFEST_ENTRY, MIMETYPE, MIMETYPE_ENTRY, STEPS_ENTRY, VIEWER_ENTRY,
};
use crate::artifact::ArtifactDigest;
use crate::signing::SignatureBlock;

/// Errors from writing or reading package containers
#[derive(Debug, Error)]
pub enum PackageError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing entry: {0}")]
    MissingEntry(String),

    #[error("malformed package: {0}")]
    Malformed(String),
}

/// Compression applied to every entry except `mimetype`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Stored,
    #[default]
    Deflated,
}

impl Compression {
    fn method(self) -> CompressionMethod {
        match self {
            Compression::Stored => CompressionMethod::Stored,
            Compression::Deflated => CompressionMethod::Deflated,
        }
    }
}

/// An assembled package held in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidencePackage {
    manifest: Manifest,
    step_log: Vec<u8>,
    artifacts: BTreeMap<ArtifactDigest, Vec<u8>>,
    viewer: Option<Vec<u8>>,
    compression: Compression,
}

impl EvidencePackage {
    pub(crate) fn new(manifest: Manifest, step_log: Vec<u8>, artifacts: BTreeMap<ArtifactDigest, Vec<u8>>) -> Self {
        Self {
            manifest,
            step_log,
            artifacts,
            viewer: None,
            compression: Compression::default(),
        }
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Raw steps.ndjson bytes
    pub fn step_log(&self) -> &[u8] {
        &self.step_log
    }

    pub fn artifacts(&self) -> &BTreeMap<ArtifactDigest, Vec<u8>> {
        &self.artifacts
    }

    pub fn viewer(&self) -> Option<&[u8]> {
        self.viewer.as_deref()
    }

    /// Aggregate digest the signature covers.
    pub fn aggregate_digest(&self) -> Result<[u8; 32], PackageError> {
        self.manifest.aggregate_digest().ok_or_else(|| {
            PackageError::Malformed(format!(
                "aggregate_sha256 is not a SHA-256 digest: {}",
                self.manifest.aggregate_sha256
            ))
        })
    }

    pub fn is_signed(&self) -> bool {
        self.manifest.is_signed()
    }

    /// Embed a self-contained HTML viewer. Not covered by the digest.
    pub fn with_viewer(mut self, html: impl Into<Vec<u8>>) -> Self {
        self.viewer = Some(html.into());
        self
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Copy carrying `signature`; the content is untouched.
    pub(crate) fn with_signature(&self, signature: SignatureBlock) -> Self {
        let mut signed = self.clone();
        signed.manifest.signature = Some(signature);
        signed
    }

    /// Serialize to archive bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, PackageError> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let stored = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Stored)
            .last_modified_time(zip::DateTime::default());
        let packed = SimpleFileOptions::default()
            .compression_method(self.compression.method())
            .last_modified_time(zip::DateTime::default());

        zip.start_file(MIMETYPE_ENTRY, stored)?;
        zip.write_all(MIMETYPE.as_bytes())?;

        let manifest = self.manifest.to_canonical_json().map_err(PackageError::Malformed)?;
        zip.start_file(MANIFEST_ENTRY, packed)?;
        zip.write_all(&manifest)?;

        zip.start_file(STEPS_ENTRY, packed)?;
        zip.write_all(&self.step_log)?;

        for (digest, bytes) in &self.artifacts {
            zip.start_file(artifact_entry_name(digest), packed)?;
            zip.write_all(bytes)?;
        }

        if let Some(viewer) = &self.viewer {
            zip.start_file(VIEWER_ENTRY, packed)?;
            zip.write_all(viewer)?;
        }

        Ok(zip.finish()?.into_inner())
    }

    /// Write atomically to `path` (write-then-rename).
    ///
    /// A reader of `path` sees either the previous file or the complete
    /// new one.
    pub fn write_to(&self, path: &Path) -> Result<(), PackageError> {
        let bytes = self.to_bytes()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let temp_path = temp_path_for(path);
        let written = fs::File::create(&temp_path).and_then(|mut file| {
            file.write_all(&bytes)?;
            file.sync_all()
        });
        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }
        fs::rename(&temp_path, path)?;

        tracing::info!(
            path = %path.display(),
            bytes = bytes.len(),
            signed = self.is_signed(),
            "package written"
        );
        Ok(())
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(".{}.tmp", std::process::id()));
    path.with_file_name(name)
}

/// `<output_dir>/<stem>_<YYYYmmdd_HHMMSS>.epi`
pub fn default_package_path(output_dir: &Path, stem: &str, at: DateTime<Utc>) -> PathBuf {
    output_dir.join(format!("{}_{}.epi", stem, at.format("%Y%m%d_%H%M%S")))
}
