//! Session metadata carried into the package manifest

use std::collections::{BTreeMap, BTreeSet};

use epi_redact::{RedactionRecord, Redactor};
use serde::{Deserialize, Serialize};

/// A recorded metric value.
///
/// Floats are not canonical, so fractional measurements are kept as the
/// decimal text the caller supplied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Integer(i64),
    Text(String),
}

impl MetricValue {
    /// Integer if the text is one, otherwise the text as given.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().parse::<i64>() {
            Ok(i) => MetricValue::Integer(i),
            Err(_) => MetricValue::Text(raw.to_string()),
        }
    }
}

impl From<i64> for MetricValue {
    fn from(i: i64) -> Self {
        MetricValue::Integer(i)
    }
}

impl From<&str> for MetricValue {
    fn from(s: &str) -> Self {
        MetricValue::Text(s.to_string())
    }
}

/// Parse a `key=value` metric argument.
pub fn parse_metric(arg: &str) -> Option<(String, MetricValue)> {
    let (key, value) = arg.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), MetricValue::parse(value)))
}

/// Free-form description of the recorded workflow
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionMetadata {
    pub workflow_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    #[serde(default)]
    pub metrics: BTreeMap<String, MetricValue>,

    #[serde(default)]
    pub tags: BTreeSet<String>,

    #[serde(default)]
    pub approved: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,

    /// Command line that produced the recording, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cli_command: Option<String>,
}

impl SessionMetadata {
    pub fn new(workflow_name: impl Into<String>) -> Self {
        Self {
            workflow_name: workflow_name.into(),
            ..Self::default()
        }
    }

    pub fn with_goal(mut self, goal: impl Into<String>) -> Self {
        self.goal = Some(goal.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_metric(mut self, key: impl Into<String>, value: impl Into<MetricValue>) -> Self {
        self.metrics.insert(key.into(), value.into());
        self
    }

    pub fn with_cli_command(mut self, command: impl Into<String>) -> Self {
        self.cli_command = Some(command.into());
        self
    }

    /// Copy with every field passed through `redactor`, field rules included.
    ///
    /// If redaction leaves the metadata unrepresentable (a field rule
    /// replaced a typed field such as `approved`), the whole metadata is
    /// masked instead.
    pub fn redacted(&self, redactor: &Redactor) -> (SessionMetadata, Vec<RedactionRecord>) {
        let value = match serde_json::to_value(self) {
            Ok(value) => value,
            Err(_) => return masked_metadata(redactor),
        };
        let out = redactor.redact(&value);
        match serde_json::from_value(out.value) {
            Ok(metadata) => (metadata, out.records),
            Err(_) => masked_metadata(redactor),
        }
    }
}

/// Audit reason recorded when redacted metadata no longer fits its schema.
pub const UNREPRESENTABLE_REASON: &str = "unrepresentable_metadata";

fn masked_metadata(redactor: &Redactor) -> (SessionMetadata, Vec<RedactionRecord>) {
    let masked = redactor.mask(UNREPRESENTABLE_REASON, "");
    (SessionMetadata::new(masked.value), masked.records)
}
