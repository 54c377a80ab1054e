//! Typed recorder configuration

use std::path::PathBuf;

use epi_redact::{RedactionConfig, RedactionRule};
use serde::{Deserialize, Serialize};

use super::effective::ConfigError;
use crate::package::Compression;

/// Artifact store backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Directory,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSettings {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Root directory for the `directory` backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSettings {
    #[serde(default)]
    pub compression: Compression,

    /// HTML file embedded as viewer.html
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewer: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningSettings {
    /// Directory holding `<key_name>.key`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_dir: Option<PathBuf>,

    #[serde(default = "default_key_name")]
    pub key_name: String,

    /// Directory of trusted `*.pub` files used by verification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trusted_key_dir: Option<PathBuf>,
}

impl Default for SigningSettings {
    fn default() -> Self {
        Self {
            key_dir: None,
            key_name: default_key_name(),
            trusted_key_dir: None,
        }
    }
}

fn default_key_name() -> String {
    "default".to_string()
}

/// Redaction settings: the rule set plus rules appended after it.
///
/// `extra_rules` lets a project add patterns without restating the
/// built-in list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactionSettings {
    #[serde(flatten)]
    pub base: RedactionConfig,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_rules: Vec<RedactionRule>,
}

impl RedactionSettings {
    /// The effective rule set, in priority order.
    pub fn rule_set(&self) -> RedactionConfig {
        let mut config = self.base.clone();
        for rule in &self.extra_rules {
            config.push(rule.clone());
        }
        config
    }
}

/// Recorder configuration after merging every layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecorderConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default)]
    pub redaction: RedactionSettings,

    #[serde(default)]
    pub store: StoreSettings,

    #[serde(default)]
    pub package: PackageSettings,

    #[serde(default)]
    pub signing: SigningSettings,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            redaction: RedactionSettings::default(),
            store: StoreSettings::default(),
            package: PackageSettings::default(),
            signing: SigningSettings::default(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("epi-recordings")
}

impl RecorderConfig {
    /// Deserialize from a merged value and validate.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ConfigError> {
        let config: RecorderConfig =
            serde_json::from_value(value).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.backend == StoreBackend::Directory && self.store.path.is_none() {
            return Err(ConfigError::Invalid(
                "store.backend = \"directory\" requires store.path".to_string(),
            ));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("output_dir must not be empty".to_string()));
        }
        if self.signing.key_name.trim().is_empty() {
            return Err(ConfigError::Invalid("signing.key_name must not be empty".to_string()));
        }
        Ok(())
    }
}
