//! Canonical JSON serialisation and content hashing.
//!
//! Canonical form sorts object keys lexicographically at every depth and emits
//! no insignificant whitespace, so equal values always produce equal bytes
//! regardless of how the source document ordered its keys.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Serialises `value` in canonical form.
#[must_use]
pub fn to_canonical_string(value: &Value) -> String {
    let mut out = String::new();
    write_value(value, &mut out);
    out
}

/// Returns the lowercase hex SHA-256 digest of the canonical form of `value`.
#[must_use]
pub fn content_hash(value: &Value) -> String {
    let digest = Sha256::digest(to_canonical_string(value).as_bytes());
    hex::encode(digest)
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|(left, _), (right, _)| left.cmp(right));
            out.push('{');
            for (position, (key, child)) in entries.into_iter().enumerate() {
                if position > 0 {
                    out.push(',');
                }
                write_scalar(&Value::String(key.clone()), out);
                out.push(':');
                write_value(child, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (position, child) in items.iter().enumerate() {
                if position > 0 {
                    out.push(',');
                }
                write_value(child, out);
            }
            out.push(']');
        }
        scalar => write_scalar(scalar, out),
    }
}

fn write_scalar(value: &Value, out: &mut String) {
    // Scalars have a single serde_json rendering, so `Display` is canonical.
    out.push_str(&value.to_string());
}
