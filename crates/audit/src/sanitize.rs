//! Metadata sanitisation: secret-bearing keys never reach the audit table.

use serde_json::Value;

/// Key names (case-insensitive) stripped from audit metadata.
const DENYLIST: &[&str] = &[
    "access_token",
    "refresh_token",
    "client_secret",
    "api_key",
    "password",
    "cookie_value",
    "token",
    "secret",
];

fn is_denied(key: &str) -> bool {
    DENYLIST.iter().any(|d| key.eq_ignore_ascii_case(d))
}

/// Recursively remove denylisted keys from `value`. Arrays are walked,
/// scalars pass through unchanged.
pub fn sanitize_metadata(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (key, inner) in map {
                if is_denied(key) {
                    continue;
                }
                out.insert(key.clone(), sanitize_metadata(inner));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sanitize_metadata).collect()),
        other => other.clone(),
    }
}
