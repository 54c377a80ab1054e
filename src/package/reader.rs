//! Read-only access to a package on disk
//!
//! Reading does not verify. Use [`crate::verify`] before trusting content.

use std::fs::File;
use std::io::{BufRead, BufReader, Cursor, Read, Seek};
use std::path::Path;

use zip::result::ZipError;
use zip::ZipArchive;

use super::container::PackageError;
use super::manifest::{artifact_entry_name, Manifest, MANIFEST_ENTRY, STEPS_ENTRY, VIEWER_ENTRY};
use crate::artifact::ArtifactDigest;
use crate::session::Step;

/// Read one entry in full; a missing entry is [`PackageError::MissingEntry`].
pub(crate) fn read_entry<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<Vec<u8>, PackageError> {
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Err(PackageError::MissingEntry(name.to_string())),
        Err(e) => return Err(e.into()),
    };
    let mut bytes = Vec::with_capacity(entry.size() as usize);
    entry.read_to_end(&mut bytes)?;
    Ok(bytes)
}

/// An opened package
pub struct PackageReader<R> {
    archive: ZipArchive<R>,
    manifest: Manifest,
}

/// Open the package at `path`.
pub fn read_package(path: &Path) -> Result<PackageReader<File>, PackageError> {
    PackageReader::new(File::open(path)?)
}

impl PackageReader<Cursor<Vec<u8>>> {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, PackageError> {
        Self::new(Cursor::new(bytes))
    }
}

impl<R: Read + Seek> PackageReader<R> {
    pub fn new(reader: R) -> Result<Self, PackageError> {
        let mut archive = ZipArchive::new(reader)?;
        let manifest_bytes = read_entry(&mut archive, MANIFEST_ENTRY)?;
        let manifest: Manifest = serde_json::from_slice(&manifest_bytes)?;
        Ok(Self { archive, manifest })
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Steps in file order, parsed lazily.
    pub fn steps(&mut self) -> Result<impl Iterator<Item = Result<Step, PackageError>> + '_, PackageError> {
        let entry = match self.archive.by_name(STEPS_ENTRY) {
            Ok(entry) => entry,
            Err(ZipError::FileNotFound) => return Err(PackageError::MissingEntry(STEPS_ENTRY.to_string())),
            Err(e) => return Err(e.into()),
        };
        Ok(BufReader::new(entry)
            .lines()
            .filter(|line| !matches!(line, Ok(l) if l.is_empty()))
            .map(|line| -> Result<Step, PackageError> { Ok(serde_json::from_str(&line?)?) }))
    }

    /// Content of an indexed artifact.
    pub fn artifact(&mut self, digest: &ArtifactDigest) -> Result<Vec<u8>, PackageError> {
        if !self.manifest.artifacts.contains_key(digest) {
            return Err(PackageError::MissingEntry(artifact_entry_name(digest)));
        }
        read_entry(&mut self.archive, &artifact_entry_name(digest))
    }

    /// Embedded viewer, if the package has one.
    pub fn viewer_html(&mut self) -> Result<Option<Vec<u8>>, PackageError> {
        match read_entry(&mut self.archive, VIEWER_ENTRY) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(PackageError::MissingEntry(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
