//! Redaction rule set configuration.

use serde::{Deserialize, Serialize};

/// Default replacement token written over redacted spans.
pub const DEFAULT_REPLACEMENT: &str = "***REDACTED***";

/// How a rule selects what to redact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleMatcher {
    /// Regex applied to every string value; each match is replaced.
    Pattern { pattern: String },

    /// Regex applied to object keys; the whole value under a matching key
    /// is replaced, whatever its type.
    Field { pattern: String },
}

impl RuleMatcher {
    /// The regex source for this matcher.
    pub fn pattern(&self) -> &str {
        match self {
            RuleMatcher::Pattern { pattern } | RuleMatcher::Field { pattern } => pattern,
        }
    }
}

/// A named redaction rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactionRule {
    /// Name recorded in audit entries.
    pub name: String,

    #[serde(flatten)]
    pub matcher: RuleMatcher,

    /// Per-rule replacement; falls back to the set's replacement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement: Option<String>,
}

impl RedactionRule {
    pub fn pattern(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            matcher: RuleMatcher::Pattern {
                pattern: pattern.into(),
            },
            replacement: None,
        }
    }

    pub fn field(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            matcher: RuleMatcher::Field {
                pattern: pattern.into(),
            },
            replacement: None,
        }
    }

    pub fn with_replacement(mut self, replacement: impl Into<String>) -> Self {
        self.replacement = Some(replacement.into());
        self
    }
}

/// Ordered rule set. Earlier rules take priority over overlapping spans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactionConfig {
    #[serde(default = "default_replacement")]
    pub replacement: String,

    #[serde(default = "builtin_rules")]
    pub rules: Vec<RedactionRule>,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            replacement: default_replacement(),
            rules: builtin_rules(),
        }
    }
}

/// A rule that failed to compile.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("rule '{rule}' is malformed: {message}")]
pub struct RuleError {
    pub rule: String,
    pub message: String,
}

impl RedactionConfig {
    /// Rule set with no rules at all.
    pub fn empty() -> Self {
        Self {
            replacement: default_replacement(),
            rules: Vec::new(),
        }
    }

    /// Append a rule at the lowest priority.
    pub fn push(&mut self, rule: RedactionRule) {
        self.rules.push(rule);
    }

    /// Compile every rule and report the ones that fail.
    pub fn validate(&self) -> Vec<RuleError> {
        self.rules
            .iter()
            .filter_map(|rule| {
                regex_lite::Regex::new(rule.matcher.pattern())
                    .err()
                    .map(|e| RuleError {
                        rule: rule.name.clone(),
                        message: e.to_string(),
                    })
            })
            .collect()
    }
}

fn default_replacement() -> String {
    DEFAULT_REPLACEMENT.to_string()
}

/// Built-in rules for common credential formats.
pub fn builtin_rules() -> Vec<RedactionRule> {
    vec![
        RedactionRule::pattern(
            "private_key_block",
            r"-----BEGIN [A-Z ]*PRIVATE KEY-----[\s\S]*?-----END [A-Z ]*PRIVATE KEY-----",
        ),
        RedactionRule::pattern("anthropic_api_key", r"sk-ant-[A-Za-z0-9_-]{20,}"),
        RedactionRule::pattern("openai_api_key", r"sk-(?:proj-)?[A-Za-z0-9_-]{20,}"),
        RedactionRule::pattern("aws_access_key_id", r"\b(?:AKIA|ASIA)[0-9A-Z]{16}\b"),
        RedactionRule::pattern("github_token", r"\bgh[pousr]_[A-Za-z0-9]{36,}\b"),
        RedactionRule::pattern("google_api_key", r"\bAIza[0-9A-Za-z_-]{35}\b"),
        RedactionRule::pattern("slack_token", r"\bxox[abposr]-[A-Za-z0-9-]{10,}"),
        RedactionRule::pattern(
            "jwt",
            r"\beyJ[A-Za-z0-9_-]{10,}\.[A-Za-z0-9_-]{10,}\.[A-Za-z0-9_-]{10,}",
        ),
        RedactionRule::pattern("bearer_token", r"Bearer [A-Za-z0-9._~+/-]{8,}=*"),
        RedactionRule::field(
            "secret_field",
            r"(?i)(^|[_-])(api[_-]?key|secret|client[_-]?secret|password|passwd|access[_-]?token|auth[_-]?token|token|private[_-]?key|credentials?)$",
        ),
    ]
}
