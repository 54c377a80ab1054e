//! Content-addressed artifact storage
//!
//! Binary and text blobs attached to steps are stored once per unique
//! content and referenced from steps by their SHA-256 digest.

mod backend;
mod digest;
mod store;

pub use backend::{BlobBackend, DirectoryBackend, MemoryBackend};
pub use digest::ArtifactDigest;
pub use store::{Artifact, ArtifactInfo, ArtifactStore, StoreError};
