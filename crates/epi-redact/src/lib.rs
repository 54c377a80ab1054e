//! Redaction of captured event payloads.
//!
//! A [`Redactor`] applies an ordered list of named rules to every string in
//! a payload before the payload becomes part of the tamper-evident record.
//! Each change is reported as a [`RedactionRecord`] naming the rule and the
//! field, never the matched text.

mod engine;
mod rule;

pub use engine::{Redacted, RedactionAction, RedactionRecord, Redactor};
pub use rule::{
    builtin_rules, RedactionConfig, RedactionRule, RuleError, RuleMatcher, DEFAULT_REPLACEMENT,
};
