//! Canonical JSON and record-set hashing.
//!
//! Object keys are written in sorted order with no insignificant whitespace,
//! so two devices serialising the same record always produce the same bytes.

use crate::record::BookRecord;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Append the canonical form of `value` to `out`.
pub fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (idx, key) in keys.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
    }
}

fn write_string(s: &str, out: &mut String) {
    // Display on a JSON string value yields the escaped, quoted form.
    out.push_str(&Value::String(s.to_string()).to_string());
}

/// Canonical form of a single value.
pub fn to_canonical_string(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

/// SHA-256 over canonical lines of `values`, sorted by `id`.
///
/// Values without a string `id` sort first, ordered by their canonical text.
pub fn checksum_values<'a, I>(values: I) -> String
where
    I: IntoIterator<Item = &'a Value>,
{
    let mut lines: Vec<(String, String)> = values
        .into_iter()
        .map(|v| {
            let id = v.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
            (id, to_canonical_string(v))
        })
        .collect();
    lines.sort();

    let mut hasher = Sha256::new();
    for (idx, (_, line)) in lines.iter().enumerate() {
        if idx > 0 {
            hasher.update(b"\n");
        }
        hasher.update(line.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Checksum of a record set. Independent of input order.
pub fn checksum<'a, I>(records: I) -> String
where
    I: IntoIterator<Item = &'a BookRecord>,
{
    let values: Vec<Value> = records.into_iter().map(BookRecord::to_json).collect();
    checksum_values(&values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_are_sorted_and_compact() {
        let value = json!({"b": 1, "a": {"d": [1, 2], "c": "x y"}});
        assert_eq!(to_canonical_string(&value), r#"{"a":{"c":"x y","d":[1,2]},"b":1}"#);
    }

    #[test]
    fn strings_are_escaped() {
        let value = json!({"notes": "line\n\"quoted\""});
        assert_eq!(to_canonical_string(&value), r#"{"notes":"line\n\"quoted\""}"#);
    }

    #[test]
    fn checksum_ignores_order() {
        let a = BookRecord::new("a", "Dune", "Herbert", "2024-01-01T00:00:00Z");
        let b = BookRecord::new("b", "Emma", "Austen", "2024-01-01T00:00:00Z");

        assert_eq!(checksum([&a, &b]), checksum([&b, &a]));
        assert_eq!(checksum([&a, &b]).len(), 64);
    }

    #[test]
    fn checksum_sees_field_changes() {
        let a = BookRecord::new("a", "Dune", "Herbert", "2024-01-01T00:00:00Z");
        let changed = a.clone().with_progress(1);
        assert_ne!(checksum([&a]), checksum([&changed]));
    }

    #[test]
    fn empty_set_has_stable_checksum() {
        let empty: [&BookRecord; 0] = [];
        assert_eq!(
            checksum(empty),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
