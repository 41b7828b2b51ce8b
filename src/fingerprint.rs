//! Stable fingerprints for query text and parameters.
//!
//! Both the result cache and the plan table key their maps with xxh64
//! digests computed here, so the two agree on what "the same query" means
//! without depending on each other.

use std::hash::Hasher;

use serde_json::Value;
use xxhash_rust::xxh64::Xxh64;

const SEED: u64 = 0x5147_4154_4531;

/// Trims the query and collapses every whitespace run outside
/// single-quoted literals to one space. Literal contents are kept as is.
pub fn normalize_query(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    let mut in_literal = false;
    let mut pending_space = false;
    for ch in query.chars() {
        if !in_literal && ch.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        if ch == '\'' {
            in_literal = !in_literal;
        }
        out.push(ch);
    }
    out
}

/// Digest of normalized text plus the parameter values.
pub fn value_fingerprint(normalized: &str, params: &[Value]) -> u64 {
    let mut hasher = Xxh64::new(SEED);
    hasher.write(normalized.as_bytes());
    hasher.write_u8(0);
    for param in params {
        // serde_json keeps object keys sorted, so encoding is deterministic.
        let encoded = serde_json::to_string(param).unwrap_or_default();
        hasher.write_u64(encoded.len() as u64);
        hasher.write(encoded.as_bytes());
    }
    hasher.finish()
}

/// Digest of normalized text plus the parameter types only.
pub fn shape_fingerprint(normalized: &str, params: &[Value]) -> u64 {
    let mut hasher = Xxh64::new(SEED);
    hasher.write(normalized.as_bytes());
    hasher.write_u8(0);
    hasher.write_u64(params.len() as u64);
    for param in params {
        hasher.write_u8(type_tag(param));
    }
    hasher.finish()
}

fn type_tag(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalization_ignores_layout() {
        assert_eq!(
            normalize_query("  SELECT  *\n\tFROM t   WHERE a = ? "),
            "SELECT * FROM t WHERE a = ?"
        );
    }

    #[test]
    fn normalization_keeps_literal_whitespace() {
        assert_eq!(
            normalize_query("SELECT  id FROM t WHERE note = 'a  b'\n"),
            "SELECT id FROM t WHERE note = 'a  b'"
        );
        assert_ne!(
            normalize_query("SELECT 'a  b'"),
            normalize_query("SELECT 'a b'")
        );
        assert_eq!(normalize_query("SELECT 'it''s'  "), "SELECT 'it''s'");
    }

    #[test]
    fn value_fingerprint_distinguishes_values() {
        let q = normalize_query("SELECT * FROM t WHERE a = ?");
        assert_eq!(
            value_fingerprint(&q, &[json!("u1")]),
            value_fingerprint(&q, &[json!("u1")])
        );
        assert_ne!(
            value_fingerprint(&q, &[json!("u1")]),
            value_fingerprint(&q, &[json!("u2")])
        );
    }

    #[test]
    fn shape_fingerprint_ignores_values_but_not_types() {
        let q = normalize_query("SELECT * FROM t WHERE a = ?");
        assert_eq!(
            shape_fingerprint(&q, &[json!("u1")]),
            shape_fingerprint(&q, &[json!("u2")])
        );
        assert_ne!(
            shape_fingerprint(&q, &[json!("u1")]),
            shape_fingerprint(&q, &[json!(1)])
        );
    }
}
