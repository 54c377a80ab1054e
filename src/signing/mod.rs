//! Ed25519 signing of package aggregate digests
//!
//! The signature covers the 32-byte aggregate digest, not the archive
//! bytes. Signing therefore never changes the content the digest is
//! computed over: a signed package and its unsigned original have the
//! same `aggregate_sha256`.

mod keys;

pub use keys::{KeyStore, TrustStore};

use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io;
use thiserror::Error;

use crate::package::{EvidencePackage, PackageError};

/// Signature algorithm identifier
pub const SIGNATURE_ALGORITHM: &str = "Ed25519";

/// Errors from signing and key handling
#[derive(Debug, Error)]
pub enum SigningError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("unsupported signature algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("fingerprint mismatch: expected {expected}, got {actual}")]
    FingerprintMismatch { expected: String, actual: String },

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error(transparent)]
    Package(#[from] PackageError),
}

/// Result type for signing operations
pub type SigningResult<T> = Result<T, SigningError>;

/// The `signature` object of manifest.json
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignatureBlock {
    /// Always "Ed25519"
    pub algorithm: String,

    /// Base64 public key of the signer
    pub public_key: String,

    /// SHA-256 fingerprint of the public key (hex)
    pub key_fingerprint: String,

    /// Base64 Ed25519 signature over the aggregate digest bytes
    pub signature: String,

    pub signed_at: DateTime<Utc>,
}

impl SignatureBlock {
    /// Sign `digest` with `key`.
    pub fn create(digest: &[u8; 32], key: &SigningKey) -> Self {
        let signature = key.sign(digest);
        let verifying_key = key.verifying_key();

        Self {
            algorithm: SIGNATURE_ALGORITHM.to_string(),
            public_key: encode_verifying_key(&verifying_key),
            key_fingerprint: compute_key_fingerprint(&verifying_key),
            signature: base64::Engine::encode(&base64::engine::general_purpose::STANDARD, signature.to_bytes()),
            signed_at: Utc::now(),
        }
    }

    /// The declared public key.
    ///
    /// Fails if the key does not decode or its fingerprint differs from
    /// `key_fingerprint`.
    pub fn declared_key(&self) -> SigningResult<VerifyingKey> {
        let key = decode_verifying_key(&self.public_key)?;
        let actual = compute_key_fingerprint(&key);
        if actual != self.key_fingerprint {
            return Err(SigningError::FingerprintMismatch {
                expected: self.key_fingerprint.clone(),
                actual,
            });
        }
        Ok(key)
    }

    /// Decoded signature bytes.
    pub fn decoded_signature(&self) -> SigningResult<Signature> {
        if self.algorithm != SIGNATURE_ALGORITHM {
            return Err(SigningError::UnsupportedAlgorithm(self.algorithm.clone()));
        }
        let bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, &self.signature)?;
        Signature::from_slice(&bytes).map_err(|e| SigningError::InvalidSignature(e.to_string()))
    }

    /// Whether the signature over `digest` verifies under `key`.
    pub fn verify(&self, digest: &[u8; 32], key: &VerifyingKey) -> SigningResult<bool> {
        let signature = self.decoded_signature()?;
        Ok(key.verify_strict(digest, &signature).is_ok())
    }
}

/// Sign a package, returning a new package that carries the signature.
///
/// The input is not modified. Re-signing replaces any previous signature.
pub fn sign_package(package: &EvidencePackage, key: &SigningKey) -> SigningResult<EvidencePackage> {
    let digest = package.aggregate_digest()?;
    let block = SignatureBlock::create(&digest, key);

    tracing::info!(
        session_id = %package.manifest().session_id,
        fingerprint = %block.key_fingerprint,
        "package signed"
    );
    Ok(package.with_signature(block))
}

/// SHA-256 fingerprint of an Ed25519 public key
pub fn compute_key_fingerprint(key: &VerifyingKey) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Encode a signing key to base64 for storage
pub fn encode_signing_key(key: &SigningKey) -> String {
    base64::Engine::encode(&base64::engine::general_purpose::STANDARD, key.to_bytes())
}

/// Decode a signing key from base64
pub fn decode_signing_key(encoded: &str) -> SigningResult<SigningKey> {
    let bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, encoded.trim())?;
    let bytes_array: [u8; 32] = bytes
        .try_into()
        .map_err(|_| SigningError::InvalidKey("key must be 32 bytes".to_string()))?;
    Ok(SigningKey::from_bytes(&bytes_array))
}

/// Encode a verifying key to base64 for storage
pub fn encode_verifying_key(key: &VerifyingKey) -> String {
    base64::Engine::encode(&base64::engine::general_purpose::STANDARD, key.as_bytes())
}

/// Decode a verifying key from base64
pub fn decode_verifying_key(encoded: &str) -> SigningResult<VerifyingKey> {
    let bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, encoded.trim())?;
    let bytes_array: [u8; 32] = bytes
        .try_into()
        .map_err(|_| SigningError::InvalidKey("key must be 32 bytes".to_string()))?;
    VerifyingKey::from_bytes(&bytes_array).map_err(|e| SigningError::InvalidKey(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactStore;
    use crate::package::assemble;
    use crate::session::{RecordingSession, SessionMetadata, StepKind};
    use epi_redact::Redactor;
    use serde_json::json;
    use std::sync::Arc;

    fn generate_keypair() -> SigningKey {
        SigningKey::generate(&mut rand::thread_rng())
    }

    fn sample_package() -> EvidencePackage {
        let store = Arc::new(ArtifactStore::in_memory());
        let session = RecordingSession::open(
            SessionMetadata::new("signing"),
            Arc::clone(&store),
            Arc::new(Redactor::default()),
        );
        session
            .log_step(StepKind::ModelCall, json!({"model": "m"}), vec![])
            .unwrap();
        assemble(&session.close(), &store).unwrap()
    }

    #[test]
    fn test_sign_and_verify() {
        let key = generate_keypair();
        let digest = [7u8; 32];
        let block = SignatureBlock::create(&digest, &key);

        assert_eq!(block.algorithm, SIGNATURE_ALGORITHM);
        assert!(block.verify(&digest, &key.verifying_key()).unwrap());
        assert!(!block.verify(&[8u8; 32], &key.verifying_key()).unwrap());
    }

    #[test]
    fn test_verify_with_wrong_key() {
        let block = SignatureBlock::create(&[1u8; 32], &generate_keypair());
        let other = generate_keypair().verifying_key();
        assert!(!block.verify(&[1u8; 32], &other).unwrap());
    }

    #[test]
    fn test_declared_key_fingerprint_checked() {
        let key = generate_keypair();
        let mut block = SignatureBlock::create(&[1u8; 32], &key);
        assert_eq!(block.declared_key().unwrap(), key.verifying_key());

        block.key_fingerprint = "00".repeat(32);
        assert!(matches!(
            block.declared_key(),
            Err(SigningError::FingerprintMismatch { .. })
        ));
    }

    #[test]
    fn test_unsupported_algorithm() {
        let key = generate_keypair();
        let mut block = SignatureBlock::create(&[1u8; 32], &key);
        block.algorithm = "RSA".to_string();
        assert!(matches!(
            block.verify(&[1u8; 32], &key.verifying_key()),
            Err(SigningError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_sign_package_keeps_content() {
        let package = sample_package();
        let signed = sign_package(&package, &generate_keypair()).unwrap();

        assert!(!package.is_signed());
        assert!(signed.is_signed());
        assert_eq!(signed.manifest().aggregate_sha256, package.manifest().aggregate_sha256);
        assert_eq!(signed.step_log(), package.step_log());
    }

    #[test]
    fn test_resign_replaces_signature() {
        let package = sample_package();
        let first = sign_package(&package, &generate_keypair()).unwrap();
        let second_key = generate_keypair();
        let second = sign_package(&first, &second_key).unwrap();

        let block = second.manifest().signature.as_ref().unwrap();
        assert_eq!(block.key_fingerprint, compute_key_fingerprint(&second_key.verifying_key()));
    }

    #[test]
    fn test_key_encoding() {
        let keypair = generate_keypair();

        let encoded = encode_signing_key(&keypair);
        let decoded = decode_signing_key(&encoded).unwrap();
        assert_eq!(keypair.to_bytes(), decoded.to_bytes());

        let verifying = keypair.verifying_key();
        let encoded = encode_verifying_key(&verifying);
        let decoded = decode_verifying_key(&format!("{}\n", encoded)).unwrap();
        assert_eq!(verifying.as_bytes(), decoded.as_bytes());
    }

    #[test]
    fn test_key_fingerprint() {
        let verifying_key = generate_keypair().verifying_key();
        let fp = compute_key_fingerprint(&verifying_key);
        assert_eq!(fp, compute_key_fingerprint(&verifying_key));
        assert_eq!(fp.len(), 64);
    }

    #[test]
    fn test_short_key_rejected() {
        let encoded = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, [0u8; 8]);
        assert!(matches!(decode_signing_key(&encoded), Err(SigningError::InvalidKey(_))));
    }
}
