//! Canonical JSON encoding used for confirmation-token request hashing.
//!
//! The encoding recursively sorts object keys lexicographically and
//! preserves array order, so two submissions of the same request hash
//! identically regardless of key order. Number formatting is serde_json's:
//! `1` and `1.0` are distinct canonical forms and deliberately do not
//! collide.

use serde_json::Value;

/// Render `value` as canonical JSON.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_value(value, &mut out);
    out
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => {
            // serde_json handles escaping; a String never fails to encode.
            out.push_str(&serde_json::to_string(s).expect("string encodes"));
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).expect("string encodes"));
                out.push(':');
                write_value(&map[*key], out);
            }
            out.push('}');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sorts_object_keys() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(canonical_json(&a), r#"{"a":2,"b":1}"#);
    }

    #[test]
    fn sorts_nested_objects() {
        let v = json!({"z": {"y": 1, "x": [{"b": 2, "a": 3}]}, "a": null});
        assert_eq!(
            canonical_json(&v),
            r#"{"a":null,"z":{"x":[{"a":3,"b":2}],"y":1}}"#
        );
    }

    #[test]
    fn preserves_array_order() {
        let v = json!([3, 1, 2]);
        assert_eq!(canonical_json(&v), "[3,1,2]");
    }

    #[test]
    fn escapes_strings() {
        let v = json!({"k": "line\nbreak \"quoted\""});
        assert_eq!(canonical_json(&v), r#"{"k":"line\nbreak \"quoted\""}"#);
    }

    #[test]
    fn integer_and_float_forms_differ() {
        let int = json!({"amount": 1});
        let float = json!({"amount": 1.0});
        assert_ne!(canonical_json(&int), canonical_json(&float));
    }

    #[test]
    fn scalar_values() {
        assert_eq!(canonical_json(&json!(true)), "true");
        assert_eq!(canonical_json(&json!(null)), "null");
        assert_eq!(canonical_json(&json!(250)), "250");
    }
}
