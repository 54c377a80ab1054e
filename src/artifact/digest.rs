//! Content digest identifying an artifact.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::StoreError;

/// Lowercase hex SHA-256 of an artifact's bytes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArtifactDigest(String);

impl ArtifactDigest {
    /// Digest of the given content.
    pub fn of(content: &[u8]) -> Self {
        Self(epi_canonical::sha256_hex(content))
    }

    /// Parse a hex digest, rejecting anything but 64 lowercase hex chars.
    pub fn parse(hex: &str) -> Result<Self, StoreError> {
        if hex.len() == 64 && hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            Ok(Self(hex.to_string()))
        } else {
            Err(StoreError::InvalidDigest(hex.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Two-character fan-out prefix used by on-disk layouts.
    pub fn prefix(&self) -> &str {
        &self.0[..2]
    }
}

impl fmt::Display for ArtifactDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ArtifactDigest {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for ArtifactDigest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for ArtifactDigest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ArtifactDigest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}
