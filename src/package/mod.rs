//! Evidence packages: assembly, the ZIP container and read access
//!
//! An `.epi` file is a ZIP archive holding a manifest, the step log, one
//! entry per artifact and optionally an HTML viewer. The manifest carries
//! an aggregate SHA-256 over the canonical encoding of everything except
//! the signature and the viewer; the signature covers that digest.

mod assemble;
mod container;
mod manifest;
mod reader;

pub use assemble::{assemble, compute_aggregate_digest, AssembleError};
pub use container::{default_package_path, Compression, EvidencePackage, PackageError};
pub use manifest::{
    artifact_entry_name, Manifest, ARTIFACTS_PREFIX, MANIFEST_ENTRY, MIMETYPE, MIMETYPE_ENTRY, SPEC_VERSION,
    STEPS_ENTRY, VIEWER_ENTRY,
};
pub use reader::{read_package, PackageReader};

pub(crate) use reader::read_entry;
