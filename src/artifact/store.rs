//! Content-addressed artifact store.
//!
//! Artifacts are keyed by the SHA-256 of their bytes. Storing the same
//! bytes twice is a no-op that returns the same digest; storing different
//! bytes under an existing digest is treated as corruption.

use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::backend::{BlobBackend, DirectoryBackend, MemoryBackend};
use super::ArtifactDigest;

/// Errors from artifact store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("artifact not found: {0}")]
    NotFound(ArtifactDigest),

    #[error("digest collision: {digest} already holds different content")]
    DigestCollision { digest: ArtifactDigest },

    #[error("invalid artifact digest: {0}")]
    InvalidDigest(String),
}

/// Index entry for a stored artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArtifactInfo {
    /// Size in bytes
    pub size: u64,

    /// Declared media type of the first store request
    pub media_type: String,

    /// Optional human-readable name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// A stored artifact with its content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub digest: ArtifactDigest,
    pub bytes: Vec<u8>,
    pub media_type: String,
    pub name: Option<String>,
}

/// Thread-safe content-addressed store.
///
/// `put` holds the index lock across the backend write, so once `put`
/// returns, every later `get` of that digest sees the bytes. Repeated puts
/// compare content outside the lock.
#[derive(Debug)]
pub struct ArtifactStore {
    index: RwLock<BTreeMap<ArtifactDigest, ArtifactInfo>>,
    backend: Box<dyn BlobBackend>,
}

impl ArtifactStore {
    /// Store backed by process memory.
    pub fn in_memory() -> Self {
        Self {
            index: RwLock::new(BTreeMap::new()),
            backend: Box::new(MemoryBackend::new()),
        }
    }

    /// Store backed by a directory, reloading anything already there.
    pub fn open_directory(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::with_backend(Box::new(DirectoryBackend::new(root)?))
    }

    /// Store over an arbitrary backend.
    pub fn with_backend(backend: Box<dyn BlobBackend>) -> Result<Self, StoreError> {
        let index: BTreeMap<_, _> = backend.load_index()?.into_iter().collect();
        Ok(Self {
            index: RwLock::new(index),
            backend,
        })
    }

    /// Store `content`, returning its digest.
    pub fn put(&self, content: &[u8], media_type: &str) -> Result<ArtifactDigest, StoreError> {
        self.put_named(content, media_type, None)
    }

    /// Store `content` with an optional display name.
    ///
    /// Media type and name are taken from the first request for a digest.
    pub fn put_named(
        &self,
        content: &[u8],
        media_type: &str,
        name: Option<&str>,
    ) -> Result<ArtifactDigest, StoreError> {
        let digest = ArtifactDigest::of(content);

        if let Some(size) = self.info(&digest).map(|info| info.size) {
            return self.confirm_duplicate(digest, content, size);
        }

        let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(size) = index.get(&digest).map(|info| info.size) {
            drop(index);
            return self.confirm_duplicate(digest, content, size);
        }

        let info = ArtifactInfo {
            size: content.len() as u64,
            media_type: media_type.to_string(),
            name: name.map(str::to_string),
        };
        self.backend.write(&digest, content, &info)?;
        index.insert(digest.clone(), info);

        tracing::debug!(digest = %digest, size = content.len(), media_type, "artifact stored");
        Ok(digest)
    }

    /// Check a repeated put against the stored bytes, without holding the
    /// index lock.
    fn confirm_duplicate(
        &self,
        digest: ArtifactDigest,
        content: &[u8],
        stored_size: u64,
    ) -> Result<ArtifactDigest, StoreError> {
        let same = stored_size == content.len() as u64
            && self.backend.read(&digest)?.as_deref() == Some(content);
        if !same {
            tracing::error!(digest = %digest, "digest collision with different content");
            return Err(StoreError::DigestCollision { digest });
        }
        Ok(digest)
    }

    /// Fetch the bytes for `digest`.
    pub fn get(&self, digest: &ArtifactDigest) -> Result<Vec<u8>, StoreError> {
        if !self.contains(digest) {
            return Err(StoreError::NotFound(digest.clone()));
        }
        self.backend
            .read(digest)?
            .ok_or_else(|| StoreError::NotFound(digest.clone()))
    }

    /// Fetch bytes and metadata for `digest`.
    pub fn get_artifact(&self, digest: &ArtifactDigest) -> Result<Artifact, StoreError> {
        let info = self
            .info(digest)
            .ok_or_else(|| StoreError::NotFound(digest.clone()))?;
        let bytes = self.get(digest)?;
        Ok(Artifact {
            digest: digest.clone(),
            bytes,
            media_type: info.media_type,
            name: info.name,
        })
    }

    pub fn info(&self, digest: &ArtifactDigest) -> Option<ArtifactInfo> {
        self.index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(digest)
            .cloned()
    }

    pub fn contains(&self, digest: &ArtifactDigest) -> bool {
        self.index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(digest)
    }

    /// Number of unique artifacts.
    pub fn len(&self) -> usize {
        self.index.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total stored bytes across unique artifacts.
    pub fn total_size(&self) -> u64 {
        self.index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|i| i.size)
            .sum()
    }
}

impl Default for ArtifactStore {
    fn default() -> Self {
        Self::in_memory()
    }
}
