//! Blob backends for the artifact store.
//!
//! Backends only move bytes. Deduplication, collision checks and
//! visibility ordering live in [`super::ArtifactStore`].

use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::SystemTime;

use walkdir::WalkDir;

use super::{ArtifactDigest, ArtifactInfo};

/// Storage for artifact bytes keyed by digest.
pub trait BlobBackend: Send + Sync + fmt::Debug {
    /// Persist `content` under `digest`. Called at most once per digest.
    fn write(&self, digest: &ArtifactDigest, content: &[u8], info: &ArtifactInfo) -> io::Result<()>;

    /// Read the bytes stored under `digest`, if any.
    fn read(&self, digest: &ArtifactDigest) -> io::Result<Option<Vec<u8>>>;

    /// Enumerate everything already stored (used to rebuild the index).
    fn load_index(&self) -> io::Result<Vec<(ArtifactDigest, ArtifactInfo)>>;
}

/// Process-local backend.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    blobs: RwLock<HashMap<ArtifactDigest, (Vec<u8>, ArtifactInfo)>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobBackend for MemoryBackend {
    fn write(&self, digest: &ArtifactDigest, content: &[u8], info: &ArtifactInfo) -> io::Result<()> {
        self.blobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(digest.clone(), (content.to_vec(), info.clone()));
        Ok(())
    }

    fn read(&self, digest: &ArtifactDigest) -> io::Result<Option<Vec<u8>>> {
        Ok(self
            .blobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(digest)
            .map(|(bytes, _)| bytes.clone()))
    }

    fn load_index(&self) -> io::Result<Vec<(ArtifactDigest, ArtifactInfo)>> {
        Ok(self
            .blobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(digest, (_, info))| (digest.clone(), info.clone()))
            .collect())
    }
}

const META_SUFFIX: &str = ".meta.json";

/// On-disk backend with two-level fan-out:
/// `<root>/<sha256[0:2]>/<sha256>` plus a `<sha256>.meta.json` sidecar.
///
/// Writes go to `<root>/.tmp` first and are renamed into place, so a
/// crash never leaves a truncated blob under its final name.
#[derive(Debug)]
pub struct DirectoryBackend {
    root: PathBuf,
    temp_counter: AtomicU64,
}

impl DirectoryBackend {
    /// Open (creating if needed) a store directory.
    pub fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(".tmp"))?;

        // Verify the store is writable
        let marker = root.join(".tmp").join(".store_test");
        File::create(&marker)?;
        fs::remove_file(&marker)?;

        Ok(Self {
            root,
            temp_counter: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, digest: &ArtifactDigest) -> PathBuf {
        self.root.join(digest.prefix()).join(digest.as_str())
    }

    fn meta_path(&self, digest: &ArtifactDigest) -> PathBuf {
        self.root
            .join(digest.prefix())
            .join(format!("{}{}", digest, META_SUFFIX))
    }

    fn temp_path(&self) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let seq = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        self.root
            .join(".tmp")
            .join(format!(".tmp.{}.{}.{}", std::process::id(), nanos, seq))
    }

    fn write_atomic(&self, final_path: &Path, content: &[u8]) -> io::Result<()> {
        let temp_path = self.temp_path();
        let result = (|| {
            let mut file = File::create(&temp_path)?;
            file.write_all(content)?;
            file.sync_all()?;
            fs::rename(&temp_path, final_path)
        })();
        if result.is_err() {
            let _ = fs::remove_file(&temp_path);
        }
        result
    }
}

impl BlobBackend for DirectoryBackend {
    fn write(&self, digest: &ArtifactDigest, content: &[u8], info: &ArtifactInfo) -> io::Result<()> {
        fs::create_dir_all(self.root.join(digest.prefix()))?;

        let meta = serde_json::to_vec(info)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("JSON error: {}", e)))?;

        // Sidecar first: a blob without metadata is never indexed.
        self.write_atomic(&self.meta_path(digest), &meta)?;
        self.write_atomic(&self.blob_path(digest), content)
    }

    fn read(&self, digest: &ArtifactDigest) -> io::Result<Option<Vec<u8>>> {
        match fs::read(self.blob_path(digest)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn load_index(&self) -> io::Result<Vec<(ArtifactDigest, ArtifactInfo)>> {
        let mut entries = Vec::new();

        for entry in WalkDir::new(&self.root)
            .min_depth(2)
            .max_depth(2)
            .sort_by(|a, b| a.file_name().cmp(b.file_name()))
        {
            let entry = entry.map_err(io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str() else {
                continue;
            };
            if name.ends_with(META_SUFFIX) || name.starts_with('.') {
                continue;
            }
            let Ok(digest) = ArtifactDigest::parse(name) else {
                continue;
            };

            let meta_path = self.meta_path(&digest);
            let info = match fs::read(&meta_path) {
                Ok(bytes) => serde_json::from_slice::<ArtifactInfo>(&bytes).map_err(|e| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("{}: {}", meta_path.display(), e),
                    )
                })?,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    tracing::warn!(digest = %digest, "blob without metadata sidecar skipped");
                    continue;
                }
                Err(e) => return Err(e),
            };
            entries.push((digest, info));
        }

        Ok(entries)
    }
}
