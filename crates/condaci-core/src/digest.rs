//! Canonical JSON and SHA-256 digests.
//!
//! Object keys are sorted by UTF-16 code units, integer-valued floats are
//! written as integers, and the result is compact JSON. Two values that differ
//! only in key order hash identically.

use sha2::{Digest, Sha256};

/// Errors raised while canonicalising a value.
#[derive(Debug, thiserror::Error)]
pub enum DigestError {
    #[error("NaN/Infinity not permitted in canonical JSON")]
    NonFiniteNumber,

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn sort_keys_utf16(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().collect();
            keys.sort_by(|a, b| a.encode_utf16().cmp(b.encode_utf16()));

            let mut sorted = serde_json::Map::new();
            for key in keys {
                if let Some(v) = map.get(key) {
                    sorted.insert(key.to_string(), sort_keys_utf16(v));
                }
            }
            serde_json::Value::Object(sorted)
        }
        serde_json::Value::Array(arr) => {
            serde_json::Value::Array(arr.iter().map(sort_keys_utf16).collect())
        }
        other => other.clone(),
    }
}

fn normalize_value(value: &serde_json::Value) -> Result<serde_json::Value, DigestError> {
    match value {
        serde_json::Value::Object(map) => {
            let mut normalized = serde_json::Map::new();
            for (k, v) in map.iter() {
                normalized.insert(k.clone(), normalize_value(v)?);
            }
            Ok(serde_json::Value::Object(normalized))
        }
        serde_json::Value::Array(arr) => Ok(serde_json::Value::Array(
            arr.iter().map(normalize_value).collect::<Result<_, _>>()?,
        )),
        serde_json::Value::Number(n) if n.is_f64() => {
            let f = n.as_f64().ok_or(DigestError::NonFiniteNumber)?;
            if !f.is_finite() {
                return Err(DigestError::NonFiniteNumber);
            }
            if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                Ok(serde_json::Value::Number(serde_json::Number::from(f as i64)))
            } else {
                Ok(value.clone())
            }
        }
        other => Ok(other.clone()),
    }
}

/// Canonical compact JSON for `value`.
pub fn canonical_json(value: &serde_json::Value) -> Result<String, DigestError> {
    let normalized = normalize_value(value)?;
    Ok(serde_json::to_string(&sort_keys_utf16(&normalized))?)
}

/// SHA-256 hex digest of the canonical JSON of `value`.
pub fn compute_digest(value: &serde_json::Value) -> Result<String, DigestError> {
    let canonical = canonical_json(value)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Digest of any serialisable value.
pub fn digest_of<T: serde::Serialize>(value: &T) -> Result<String, DigestError> {
    compute_digest(&serde_json::to_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_json_integer_float() {
        let input = serde_json::json!({ "value": 1.0 });
        assert_eq!(canonical_json(&input).unwrap(), r#"{"value":1}"#);
    }

    #[test]
    fn test_canonical_json_fractional_float() {
        let input = serde_json::json!({ "value": 1.5 });
        assert_eq!(canonical_json(&input).unwrap(), r#"{"value":1.5}"#);
    }

    #[test]
    fn test_canonical_json_nested_field_order_invariant() {
        let a = serde_json::json!({ "outer": { "z": 1, "y": 2 }, "b": [3, 1] });
        let b = serde_json::json!({ "b": [3, 1], "outer": { "y": 2, "z": 1 } });
        assert_eq!(canonical_json(&a).unwrap(), canonical_json(&b).unwrap());
        assert_eq!(
            canonical_json(&a).unwrap(),
            r#"{"b":[3,1],"outer":{"y":2,"z":1}}"#
        );
    }

    #[test]
    fn test_array_order_changes_digest() {
        let a = serde_json::json!({ "matrix": ["3.7", "3.8"] });
        let b = serde_json::json!({ "matrix": ["3.8", "3.7"] });
        assert_ne!(compute_digest(&a).unwrap(), compute_digest(&b).unwrap());
    }

    #[test]
    fn test_digest_is_sha256_hex() {
        let d = compute_digest(&serde_json::json!({})).unwrap();
        assert_eq!(d.len(), 64);
        assert!(d.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
