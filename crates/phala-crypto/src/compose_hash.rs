//! Compose hash: SHA-256 over the canonical JSON form of an app-compose
//! manifest.
//!
//! Canonical form: object keys sorted by byte order at every depth, no
//! insignificant whitespace, strings escaped as serde_json escapes them. The
//! key order of the caller's input never affects the hash.

use phala_types::ComposeFile;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{CryptoError, CryptoResult};

/// Render `value` as canonical JSON.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Serializing a String into JSON cannot fail.
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Lowercase hex SHA-256 of the canonical JSON of `value`.
pub fn compose_hash<T: Serialize>(value: &T) -> CryptoResult<String> {
    let value = serde_json::to_value(value)
        .map_err(|e| CryptoError::SerializationError(e.to_string()))?;
    let digest = Sha256::digest(canonical_json(&value).as_bytes());
    Ok(hex::encode(digest))
}

/// Compose hash of an app-compose manifest.
pub fn compose_hash_of(compose: &ComposeFile) -> CryptoResult<String> {
    compose_hash(compose)
}
