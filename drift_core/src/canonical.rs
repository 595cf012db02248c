use sha2::{Digest, Sha256};

use crate::error::CoreError;

/// Re-serializes `value` with object keys sorted and no insignificant
/// whitespace, so semantically identical documents always produce the same
/// bytes regardless of the order fields arrived in.
pub fn canonicalize(value: &serde_json::Value) -> serde_json::Value {
  match value {
    serde_json::Value::Object(map) => {
      let mut sorted: Vec<(&String, &serde_json::Value)> = map.iter().collect();
      sorted.sort_by(|a, b| a.0.cmp(b.0));
      let mut out = serde_json::Map::new();
      for (k, v) in sorted {
        out.insert(k.clone(), canonicalize(v));
      }
      serde_json::Value::Object(out)
    }
    serde_json::Value::Array(items) => {
      serde_json::Value::Array(items.iter().map(canonicalize).collect())
    }
    other => other.clone(),
  }
}

/// Canonicalizes then hashes a configuration document with SHA-256,
/// returning the digest as lowercase hex. Independent of input key order or
/// whitespace (testable property 4, spec §8).
pub fn canonical_hash(value: &serde_json::Value) -> Result<String, CoreError> {
  let canonical = canonicalize(value);
  let bytes = serde_json::to_vec(&canonical)?;
  let mut hasher = Sha256::new();
  hasher.update(&bytes);
  Ok(hex::encode(hasher.finalize()))
}

/// Hashes an already-canonical string (used by the config hash client's mock
/// strategies, which synthesize a value rather than a document).
pub fn hash_str(s: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(s.as_bytes());
  hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn canonical_hash_is_independent_of_key_order() {
    let a = json!({"b": 1, "a": {"y": 2, "x": 1}});
    let b = json!({"a": {"x": 1, "y": 2}, "b": 1});
    assert_eq!(canonical_hash(&a).unwrap(), canonical_hash(&b).unwrap());
  }

  #[test]
  fn canonical_hash_differs_on_value_change() {
    let a = json!({"a": 1});
    let b = json!({"a": 2});
    assert_ne!(canonical_hash(&a).unwrap(), canonical_hash(&b).unwrap());
  }

  #[test]
  fn canonical_hash_is_deterministic() {
    let doc = json!({"service": "svc-a", "env": "prod", "flags": [1, 2, 3]});
    let h1 = canonical_hash(&doc).unwrap();
    let h2 = canonical_hash(&doc).unwrap();
    assert_eq!(h1, h2);
    assert_eq!(h1.len(), 64);
  }
}
