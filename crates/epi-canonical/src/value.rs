//! The value model accepted by the canonical encoder.
//!
//! Floating-point numbers have no representation here; converting a JSON
//! document that contains one fails with [`CanonicalError::NonCanonicalValue`].

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

/// Largest integer a JSON consumer using IEEE-754 doubles reads exactly.
pub const MAX_SAFE_INTEGER: i64 = 9_007_199_254_740_991;

/// Errors produced while building or encoding canonical values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CanonicalError {
    #[error("non-canonical value at {path}: {reason}")]
    NonCanonicalValue { path: String, reason: String },

    #[error("serialization error: {0}")]
    Serialize(String),
}

/// A structured value eligible for hashing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanonicalValue {
    Null,
    Bool(bool),
    Integer(i64),
    Bytes(Vec<u8>),
    String(String),
    Seq(Vec<CanonicalValue>),
    Map(BTreeMap<String, CanonicalValue>),
}

impl CanonicalValue {
    /// Build an empty map value.
    pub fn map() -> Self {
        CanonicalValue::Map(BTreeMap::new())
    }

    /// Wrap raw bytes.
    pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
        CanonicalValue::Bytes(data.into())
    }

    /// Insert into a map value, returning the previous entry.
    ///
    /// Returns `None` without inserting when `self` is not a map.
    pub fn insert(&mut self, key: impl Into<String>, value: CanonicalValue) -> Option<CanonicalValue> {
        match self {
            CanonicalValue::Map(map) => map.insert(key.into(), value),
            _ => None,
        }
    }

    /// Convert any `Serialize` type through its JSON data model.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self, CanonicalError> {
        let json = serde_json::to_value(value).map_err(|e| CanonicalError::Serialize(e.to_string()))?;
        Self::try_from(&json)
    }

    /// Like `try_from`, but also rejects integers outside
    /// `±MAX_SAFE_INTEGER` so the value survives any JSON round trip.
    pub fn from_json_interop(value: &Value) -> Result<Self, CanonicalError> {
        let mut path = String::new();
        Self::from_json_at(value, &mut path, true)
    }

    fn from_json_at(value: &Value, path: &mut String, interop: bool) -> Result<Self, CanonicalError> {
        match value {
            Value::Null => Ok(CanonicalValue::Null),
            Value::Bool(b) => Ok(CanonicalValue::Bool(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    if interop && !(-MAX_SAFE_INTEGER..=MAX_SAFE_INTEGER).contains(&i) {
                        return Err(CanonicalError::NonCanonicalValue {
                            path: display_path(path),
                            reason: format!("integer {} is outside the JSON-safe range", i),
                        });
                    }
                    Ok(CanonicalValue::Integer(i))
                } else if n.is_u64() {
                    Err(CanonicalError::NonCanonicalValue {
                        path: display_path(path),
                        reason: format!("integer {} exceeds the signed 64-bit range", n),
                    })
                } else {
                    Err(CanonicalError::NonCanonicalValue {
                        path: display_path(path),
                        reason: format!("floating-point number {} is not permitted", n),
                    })
                }
            }
            Value::String(s) => Ok(CanonicalValue::String(s.clone())),
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    let len = path.len();
                    path.push('/');
                    path.push_str(&i.to_string());
                    let converted = Self::from_json_at(item, path, interop);
                    path.truncate(len);
                    out.push(converted?);
                }
                Ok(CanonicalValue::Seq(out))
            }
            Value::Object(map) => {
                let mut out = BTreeMap::new();
                for (key, item) in map {
                    let len = path.len();
                    path.push('/');
                    path.push_str(&escape_pointer(key));
                    let converted = Self::from_json_at(item, path, interop);
                    path.truncate(len);
                    out.insert(key.clone(), converted?);
                }
                Ok(CanonicalValue::Map(out))
            }
        }
    }
}

impl TryFrom<&Value> for CanonicalValue {
    type Error = CanonicalError;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        let mut path = String::new();
        Self::from_json_at(value, &mut path, false)
    }
}

impl From<bool> for CanonicalValue {
    fn from(b: bool) -> Self {
        CanonicalValue::Bool(b)
    }
}

impl From<i64> for CanonicalValue {
    fn from(i: i64) -> Self {
        CanonicalValue::Integer(i)
    }
}

impl From<&str> for CanonicalValue {
    fn from(s: &str) -> Self {
        CanonicalValue::String(s.to_string())
    }
}

impl From<String> for CanonicalValue {
    fn from(s: String) -> Self {
        CanonicalValue::String(s)
    }
}

impl From<Vec<CanonicalValue>> for CanonicalValue {
    fn from(items: Vec<CanonicalValue>) -> Self {
        CanonicalValue::Seq(items)
    }
}

impl From<BTreeMap<String, CanonicalValue>> for CanonicalValue {
    fn from(map: BTreeMap<String, CanonicalValue>) -> Self {
        CanonicalValue::Map(map)
    }
}

fn display_path(path: &str) -> String {
    if path.is_empty() {
        "/".to_string()
    } else {
        path.to_string()
    }
}

/// RFC 6901 escaping for a single reference token.
fn escape_pointer(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_converts_nested_json() {
        let value = json!({"model": "x", "args": [1, true, null]});
        let canonical = CanonicalValue::try_from(&value).unwrap();

        let CanonicalValue::Map(map) = canonical else {
            panic!("expected map");
        };
        assert_eq!(map["model"], CanonicalValue::String("x".to_string()));
        assert_eq!(
            map["args"],
            CanonicalValue::Seq(vec![
                CanonicalValue::Integer(1),
                CanonicalValue::Bool(true),
                CanonicalValue::Null
            ])
        );
    }

    #[test]
    fn test_float_rejected_with_path() {
        let value = json!({"params": {"temperature": 0.7}});
        let err = CanonicalValue::try_from(&value).unwrap_err();
        assert_eq!(
            err,
            CanonicalError::NonCanonicalValue {
                path: "/params/temperature".to_string(),
                reason: "floating-point number 0.7 is not permitted".to_string(),
            }
        );
    }

    #[test]
    fn test_float_in_array_reports_index() {
        let value = json!({"scores": [1, 2.5]});
        let err = CanonicalValue::try_from(&value).unwrap_err();
        assert!(matches!(
            err,
            CanonicalError::NonCanonicalValue { ref path, .. } if path == "/scores/1"
        ));
    }

    #[test]
    fn test_large_unsigned_rejected() {
        let value = json!(u64::MAX);
        assert!(CanonicalValue::try_from(&value).is_err());
    }

    #[test]
    fn test_interop_bounds() {
        let safe = json!({"n": MAX_SAFE_INTEGER});
        assert!(CanonicalValue::from_json_interop(&safe).is_ok());

        let unsafe_int = json!({"n": MAX_SAFE_INTEGER + 1});
        assert!(CanonicalValue::try_from(&unsafe_int).is_ok());
        assert!(CanonicalValue::from_json_interop(&unsafe_int).is_err());
    }

    #[test]
    fn test_pointer_escaping() {
        let value = json!({"a/b": {"c~d": 1.5}});
        let err = CanonicalValue::try_from(&value).unwrap_err();
        assert!(matches!(
            err,
            CanonicalError::NonCanonicalValue { ref path, .. } if path == "/a~1b/c~0d"
        ));
    }

    #[test]
    fn test_from_serialize() {
        #[derive(Serialize)]
        struct Sample {
            name: &'static str,
            count: u32,
        }

        let value = CanonicalValue::from_serialize(&Sample { name: "n", count: 3 }).unwrap();
        let mut expected = CanonicalValue::map();
        expected.insert("name", "n".into());
        expected.insert("count", 3i64.into());
        assert_eq!(value, expected);
    }
}
