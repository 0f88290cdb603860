//! Configuration and image-list fingerprints.
//!
//! Objects are serialized with keys sorted by code point and integer-valued
//! floats written as integers, then hashed with SHA-256. Two logically equal
//! documents hash the same whatever order their keys were inserted in.

use crate::config::ValidatedConfig;
use crate::error::{HepscoreError, Result};
use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                if let Some(v) = map.get(key) {
                    sorted.insert(key.clone(), sort_keys(v));
                }
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

fn normalize_numbers(value: &Value) -> Result<Value> {
    match value {
        Value::Object(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                out.insert(k.clone(), normalize_numbers(v)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => items
            .iter()
            .map(normalize_numbers)
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Number(n) if n.is_f64() => {
            let f = n.as_f64().unwrap_or(f64::NAN);
            if !f.is_finite() {
                return Err(HepscoreError::Serialize(
                    "non-finite number in fingerprinted document".to_string(),
                ));
            }
            if f.fract() == 0.0 && f.abs() < 9.0e15 {
                Ok(Value::Number(Number::from(f as i64)))
            } else {
                Ok(value.clone())
            }
        }
        other => Ok(other.clone()),
    }
}

/// Deterministic compact JSON text of `value`.
pub fn canonical_json(value: &Value) -> Result<String> {
    let normalized = normalize_numbers(value)?;
    Ok(serde_json::to_string(&sort_keys(&normalized))?)
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// SHA-256 hex digest of the canonical JSON of `value`.
pub fn compute_digest(value: &Value) -> Result<String> {
    Ok(sha256_hex(canonical_json(value)?.as_bytes()))
}

/// Fingerprint of a validated configuration. Run options are not part of it.
pub fn config_fingerprint(config: &ValidatedConfig) -> Result<String> {
    compute_digest(&config.to_document()?)
}

/// Digest of an image list, order-insensitive.
///
/// The sorted list is rendered as `["a", "b"]` (comma plus space), which is
/// the byte layout of manifests already published next to image archives.
pub fn image_list_digest(images: &[String]) -> Result<String> {
    let mut sorted: Vec<&String> = images.iter().collect();
    sorted.sort();
    let items = sorted
        .iter()
        .map(|s| serde_json::to_string(s))
        .collect::<serde_json::Result<Vec<_>>>()?;
    Ok(sha256_hex(format!("[{}]", items.join(", ")).as_bytes()))
}
