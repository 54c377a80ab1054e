//! Canonical encoding for evidence hashing.
//!
//! Every digest in an evidence package is computed over the output of
//! [`encode`]. Two values that are equal as data encode to identical bytes
//! regardless of how they were built or which platform built them.

mod encode;
mod value;

pub use encode::{encode, encode_into};
pub use value::{CanonicalError, CanonicalValue, MAX_SAFE_INTEGER};

use sha2::{Digest, Sha256};

/// SHA-256 of raw bytes as a lowercase hex string.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// SHA-256 of raw bytes.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-256 over the canonical encoding of a value.
pub fn digest(value: &CanonicalValue) -> [u8; 32] {
    sha256(&encode(value))
}

/// Canonically encode any `Serialize` type and hash it.
///
/// Fails with [`CanonicalError::NonCanonicalValue`] if the value contains a
/// float anywhere in its JSON data model.
pub fn digest_serialize<T: serde::Serialize + ?Sized>(value: &T) -> Result<[u8; 32], CanonicalError> {
    Ok(digest(&CanonicalValue::from_serialize(value)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_digest_is_pure() {
        let value = CanonicalValue::try_from(&json!({"model": "x", "n": 3})).unwrap();
        assert_eq!(encode(&value), encode(&value));
        assert_eq!(digest(&value), digest(&value));
    }

    #[test]
    fn test_digest_serialize_rejects_float() {
        let err = digest_serialize(&json!({"latency": 0.21})).unwrap_err();
        assert!(matches!(err, CanonicalError::NonCanonicalValue { .. }));
    }
}
