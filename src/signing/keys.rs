//! On-disk key material
//!
//! A key directory holds base64 files: `<name>.key` for a signing key and
//! `<name>.pub` for its public half.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use ed25519_dalek::{SigningKey, VerifyingKey};

use super::{
    compute_key_fingerprint, decode_signing_key, decode_verifying_key, encode_signing_key, encode_verifying_key,
    SigningError, SigningResult,
};

const SECRET_EXTENSION: &str = "key";
const PUBLIC_EXTENSION: &str = "pub";

/// Named keys in a directory
#[derive(Debug, Clone)]
pub struct KeyStore {
    dir: PathBuf,
}

impl KeyStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, name: &str, extension: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", name, extension))
    }

    /// Load `<name>.key`.
    pub fn load_signing_key(&self, name: &str) -> SigningResult<SigningKey> {
        let path = self.path(name, SECRET_EXTENSION);
        let encoded = fs::read_to_string(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => SigningError::KeyNotFound(path.display().to_string()),
            _ => SigningError::Io(e),
        })?;
        decode_signing_key(&encoded)
    }

    /// Load `<name>.pub`.
    pub fn load_verifying_key(&self, name: &str) -> SigningResult<VerifyingKey> {
        let path = self.path(name, PUBLIC_EXTENSION);
        let encoded = fs::read_to_string(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => SigningError::KeyNotFound(path.display().to_string()),
            _ => SigningError::Io(e),
        })?;
        decode_verifying_key(&encoded)
    }

    /// Write both halves of `key` under `name`.
    pub fn save(&self, name: &str, key: &SigningKey) -> SigningResult<()> {
        fs::create_dir_all(&self.dir)?;
        write_secret(&self.path(name, SECRET_EXTENSION), &encode_signing_key(key))?;
        fs::write(
            self.path(name, PUBLIC_EXTENSION),
            encode_verifying_key(&key.verifying_key()),
        )?;
        Ok(())
    }
}

#[cfg(unix)]
fn write_secret(path: &Path, contents: &str) -> io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents.as_bytes())
}

#[cfg(not(unix))]
fn write_secret(path: &Path, contents: &str) -> io::Result<()> {
    fs::write(path, contents)
}

/// Public keys a verifier accepts, keyed by fingerprint
#[derive(Debug, Clone, Default)]
pub struct TrustStore {
    keys: BTreeMap<String, VerifyingKey>,
}

impl TrustStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trust `key`, returning its fingerprint.
    pub fn add(&mut self, key: VerifyingKey) -> String {
        let fingerprint = compute_key_fingerprint(&key);
        self.keys.insert(fingerprint.clone(), key);
        fingerprint
    }

    pub fn with_key(mut self, key: VerifyingKey) -> Self {
        self.add(key);
        self
    }

    /// Every `*.pub` file in `dir`.
    ///
    /// Unreadable or malformed key files are skipped with a warning.
    pub fn from_dir(dir: &Path) -> SigningResult<Self> {
        let mut store = Self::new();
        let mut entries: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == PUBLIC_EXTENSION))
            .collect();
        entries.sort();

        for path in entries {
            match fs::read_to_string(&path)
                .map_err(SigningError::from)
                .and_then(|encoded| decode_verifying_key(&encoded))
            {
                Ok(key) => {
                    let fingerprint = store.add(key);
                    tracing::debug!(path = %path.display(), %fingerprint, "trusted key loaded");
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable public key");
                }
            }
        }
        Ok(store)
    }

    pub fn contains(&self, fingerprint: &str) -> bool {
        self.keys.contains_key(fingerprint)
    }

    pub fn get(&self, fingerprint: &str) -> Option<&VerifyingKey> {
        self.keys.get(fingerprint)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &VerifyingKey)> {
        self.keys.iter().map(|(fp, key)| (fp.as_str(), key))
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn generate_keypair() -> SigningKey {
        SigningKey::generate(&mut rand::thread_rng())
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let store = KeyStore::new(dir.path());
        let key = generate_keypair();
        store.save("default", &key).unwrap();

        assert_eq!(store.load_signing_key("default").unwrap().to_bytes(), key.to_bytes());
        assert_eq!(store.load_verifying_key("default").unwrap(), key.verifying_key());
    }

    #[cfg(unix)]
    #[test]
    fn test_secret_key_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let store = KeyStore::new(dir.path());
        store.save("k", &generate_keypair()).unwrap();

        let mode = fs::metadata(dir.path().join("k.key")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_missing_key() {
        let dir = TempDir::new().unwrap();
        let err = KeyStore::new(dir.path()).load_signing_key("nope").unwrap_err();
        assert!(matches!(err, SigningError::KeyNotFound(_)));
    }

    #[test]
    fn test_trust_store_from_dir() {
        let dir = TempDir::new().unwrap();
        let keys = KeyStore::new(dir.path());
        let a = generate_keypair();
        let b = generate_keypair();
        keys.save("a", &a).unwrap();
        keys.save("b", &b).unwrap();
        fs::write(dir.path().join("broken.pub"), "not base64!").unwrap();

        let trust = TrustStore::from_dir(dir.path()).unwrap();
        assert_eq!(trust.len(), 2);
        assert!(trust.contains(&compute_key_fingerprint(&a.verifying_key())));
        assert!(trust.contains(&compute_key_fingerprint(&b.verifying_key())));
    }
}
