//! Tag-length-value byte encoding.
//!
//! Layout (all lengths and integers big-endian):
//!
//! | tag    | value                                              |
//! |--------|----------------------------------------------------|
//! | `0x00` | null                                               |
//! | `0x01` | false                                              |
//! | `0x02` | true                                               |
//! | `0x03` | integer: 8-byte two's complement                   |
//! | `0x04` | byte string: `u64` length, raw bytes               |
//! | `0x05` | text: `u64` length, UTF-8 bytes                    |
//! | `0x06` | sequence: `u64` count, items in order              |
//! | `0x07` | map: `u64` count, entries sorted by encoded key    |

use std::collections::BTreeMap;

use crate::CanonicalValue;

const TAG_NULL: u8 = 0x00;
const TAG_FALSE: u8 = 0x01;
const TAG_TRUE: u8 = 0x02;
const TAG_INTEGER: u8 = 0x03;
const TAG_BYTES: u8 = 0x04;
const TAG_TEXT: u8 = 0x05;
const TAG_SEQ: u8 = 0x06;
const TAG_MAP: u8 = 0x07;

/// Encode a value into its canonical byte form.
pub fn encode(value: &CanonicalValue) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(value, &mut out);
    out
}

/// Append the canonical encoding of `value` to `out`.
pub fn encode_into(value: &CanonicalValue, out: &mut Vec<u8>) {
    match value {
        CanonicalValue::Null => out.push(TAG_NULL),
        CanonicalValue::Bool(false) => out.push(TAG_FALSE),
        CanonicalValue::Bool(true) => out.push(TAG_TRUE),
        CanonicalValue::Integer(i) => {
            out.push(TAG_INTEGER);
            out.extend_from_slice(&i.to_be_bytes());
        }
        CanonicalValue::Bytes(bytes) => {
            out.push(TAG_BYTES);
            push_len(bytes.len(), out);
            out.extend_from_slice(bytes);
        }
        CanonicalValue::String(text) => encode_text(text, out),
        CanonicalValue::Seq(items) => {
            out.push(TAG_SEQ);
            push_len(items.len(), out);
            for item in items {
                encode_into(item, out);
            }
        }
        CanonicalValue::Map(map) => encode_map(map, out),
    }
}

fn encode_text(text: &str, out: &mut Vec<u8>) {
    out.push(TAG_TEXT);
    push_len(text.len(), out);
    out.extend_from_slice(text.as_bytes());
}

fn encode_map(map: &BTreeMap<String, CanonicalValue>, out: &mut Vec<u8>) {
    // Order comes from the encoded key bytes, not from the host map.
    let mut entries: Vec<(Vec<u8>, &CanonicalValue)> = map
        .iter()
        .map(|(key, value)| {
            let mut encoded_key = Vec::with_capacity(key.len() + 9);
            encode_text(key, &mut encoded_key);
            (encoded_key, value)
        })
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    out.push(TAG_MAP);
    push_len(entries.len(), out);
    for (encoded_key, value) in entries {
        out.extend_from_slice(&encoded_key);
        encode_into(value, out);
    }
}

fn push_len(len: usize, out: &mut Vec<u8>) {
    out.extend_from_slice(&(len as u64).to_be_bytes());
}
