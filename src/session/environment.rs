//! Execution environment snapshot
//!
//! The snapshot is recorded as an ordinary `custom-event` step, so it goes
//! through redaction and canonical encoding like any other payload.

use std::collections::BTreeMap;
use std::env;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event name used in the snapshot step payload.
pub const ENVIRONMENT_EVENT: &str = "environment.snapshot";

/// Variables captured when no explicit allowlist is configured.
pub const DEFAULT_ENV_ALLOWLIST: &[&str] = &[
    "CI", "HOME", "LANG", "PATH", "PWD", "SHELL", "TERM", "USER", "VIRTUAL_ENV",
];

/// What to capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvCapture {
    /// Capture every variable instead of the allowlist.
    #[serde(default)]
    pub include_all_vars: bool,

    #[serde(default = "default_allowlist")]
    pub allowlist: Vec<String>,
}

impl Default for EnvCapture {
    fn default() -> Self {
        Self {
            include_all_vars: false,
            allowlist: default_allowlist(),
        }
    }
}

fn default_allowlist() -> Vec<String> {
    DEFAULT_ENV_ALLOWLIST.iter().map(|s| s.to_string()).collect()
}

/// Host facts at recording time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    pub os: String,
    pub os_family: String,
    pub arch: String,
    pub recorder_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    pub variables: BTreeMap<String, String>,
}

impl EnvironmentSnapshot {
    /// Capture from the current process.
    pub fn capture(capture: &EnvCapture) -> Self {
        let variables = if capture.include_all_vars {
            env::vars_os()
                .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
                .collect()
        } else {
            capture
                .allowlist
                .iter()
                .filter_map(|name| env::var(name).ok().map(|v| (name.clone(), v)))
                .collect()
        };

        Self::from_parts(
            variables,
            env::current_dir().ok().map(|p| p.display().to_string()),
        )
    }

    /// Build a snapshot from explicit variables.
    pub fn from_parts(variables: BTreeMap<String, String>, working_dir: Option<String>) -> Self {
        Self {
            os: env::consts::OS.to_string(),
            os_family: env::consts::FAMILY.to_string(),
            arch: env::consts::ARCH.to_string(),
            recorder_version: env!("CARGO_PKG_VERSION").to_string(),
            working_dir,
            variables,
        }
    }

    /// Step payload for this snapshot.
    pub fn to_payload(&self) -> Value {
        serde_json::json!({
            "event": ENVIRONMENT_EVENT,
            "os": self.os,
            "os_family": self.os_family,
            "arch": self.arch,
            "recorder_version": self.recorder_version,
            "working_dir": self.working_dir,
            "variables": self.variables,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowlist_only() {
        let capture = EnvCapture {
            include_all_vars: false,
            allowlist: vec!["EPI_TEST_SURELY_UNSET_VARIABLE".to_string()],
        };
        let snapshot = EnvironmentSnapshot::capture(&capture);
        assert!(snapshot.variables.is_empty());
        assert_eq!(snapshot.os, env::consts::OS);
    }

    #[test]
    fn test_payload_shape() {
        let mut vars = BTreeMap::new();
        vars.insert("LANG".to_string(), "C".to_string());
        let snapshot = EnvironmentSnapshot::from_parts(vars, None);
        let payload = snapshot.to_payload();

        assert_eq!(payload["event"], ENVIRONMENT_EVENT);
        assert_eq!(payload["variables"]["LANG"], "C");
        assert!(payload["working_dir"].is_null());
        assert!(epi_canonical::digest_serialize(&payload).is_ok());
    }
}
