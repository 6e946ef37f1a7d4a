//! Fingerprints - SHA-256 over canonical JSON
//!
//! Two builds of the same plan with the same outcome fingerprint equally,
//! whatever the key order in the plan file.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::manifest::ManifestEntry;
use crate::plan::BuildPlan;

pub fn sha256_hex(data: &[u8]) -> String {
    Sha256::digest(data)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Serialize with object keys sorted and no whitespace.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let v = serde_json::to_value(value)?;
    serde_json::to_string(&sorted(v))
}

fn sorted(v: Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut pairs: Vec<(String, Value)> = map.into_iter().collect();
            pairs.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(pairs.into_iter().map(|(k, v)| (k, sorted(v))).collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sorted).collect()),
        other => other,
    }
}

pub fn plan_fingerprint(plan: &BuildPlan) -> Result<String, serde_json::Error> {
    Ok(sha256_hex(canonical_json(plan)?.as_bytes()))
}

/// Order-sensitive: entries are a log, not a set.
pub fn manifest_fingerprint(entries: &[ManifestEntry]) -> Result<String, serde_json::Error> {
    Ok(sha256_hex(canonical_json(&entries)?.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_json_sorts_nested_keys() {
        let obj = json!({"z": 1, "a": {"y": 2, "b": 3}});
        assert_eq!(canonical_json(&obj).unwrap(), r#"{"a":{"b":3,"y":2},"z":1}"#);
    }

    #[test]
    fn test_plan_fingerprint_ignores_key_order() {
        let a: BuildPlan = serde_json::from_value(json!({
            "page": 4,
            "actions": [{"group": "Product_01", "hero": 1,
                         "data": {"nazev_01A": "X", "cena_01A": "9"}}]
        }))
        .unwrap();
        let b: BuildPlan = serde_json::from_value(json!({
            "actions": [{"data": {"cena_01A": "9", "nazev_01A": "X"},
                         "hero": 1, "group": "Product_01"}],
            "page": 4
        }))
        .unwrap();
        assert_eq!(plan_fingerprint(&a).unwrap(), plan_fingerprint(&b).unwrap());
    }

    #[test]
    fn test_sha256_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
