//! Built-in recorder defaults (layer 1)

use serde::{Deserialize, Serialize};

/// Built-in default configuration values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinDefaults {
    /// Directory packages are written to (default: "epi-recordings")
    pub output_dir: String,

    /// Artifact store backend (default: "memory")
    pub store_backend: String,

    /// Entry compression (default: "deflated")
    pub compression: String,

    /// Signing key name inside the key directory (default: "default")
    pub key_name: String,

    /// Replacement token for redacted spans
    pub redaction_replacement: String,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            output_dir: "epi-recordings".to_string(),
            store_backend: "memory".to_string(),
            compression: "deflated".to_string(),
            key_name: "default".to_string(),
            redaction_replacement: epi_redact::DEFAULT_REPLACEMENT.to_string(),
        }
    }
}

impl BuiltinDefaults {
    /// Convert to JSON Value for merging
    ///
    /// Redaction rules are left out: a missing `redaction.rules`
    /// deserializes to the built-in rule set.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "output_dir": self.output_dir,
            "store": {
                "backend": self.store_backend
            },
            "package": {
                "compression": self.compression
            },
            "signing": {
                "key_name": self.key_name
            },
            "redaction": {
                "replacement": self.redaction_replacement
            }
        })
    }
}
