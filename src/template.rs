//! Recursive `{{KEY}}` substitution over JSON-like values from a secret map.

use std::collections::HashMap;

use serde_json::Value;

/// Replace every `{{KEY}}` occurrence in `value`'s string leaves with
/// `secrets[KEY]`'s string form. Missing keys are left untouched. Maps and
/// sequences are walked recursively; other scalars pass through unchanged.
/// Idempotent: resolving an already-resolved value is a no-op, since
/// substitution never introduces new `{{...}}` tokens.
pub fn resolve(value: &Value, secrets: &HashMap<String, String>) -> Value {
    match value {
        Value::String(s) => Value::String(resolve_string(s, secrets)),
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), resolve(v, secrets));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve(v, secrets)).collect()),
        other => other.clone(),
    }
}

/// Resolve templates in a plain string (used for fields typed as `String`
/// rather than `serde_json::Value`, e.g. a step's `url`).
pub fn resolve_string(s: &str, secrets: &HashMap<String, String>) -> String {
    let mut out = s.to_string();
    for (key, val) in secrets {
        let token = format!("{{{{{}}}}}", key);
        out = out.replace(&token, val);
    }
    out
}

/// Resolve templates over a `HashMap<String, String>` (headers, params).
pub fn resolve_map(
    map: &HashMap<String, String>,
    secrets: &HashMap<String, String>,
) -> HashMap<String, String> {
    map.iter()
        .map(|(k, v)| (k.clone(), resolve_string(v, secrets)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secrets() -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("TOKEN".to_string(), "abc123".to_string());
        m.insert("HOST".to_string(), "example.com".to_string());
        m
    }

    #[test]
    fn substitutes_known_key() {
        assert_eq!(
            resolve_string("https://{{HOST}}/ping?t={{TOKEN}}", &secrets()),
            "https://example.com/ping?t=abc123"
        );
    }

    #[test]
    fn leaves_unknown_key_untouched() {
        assert_eq!(resolve_string("{{NOPE}}", &secrets()), "{{NOPE}}");
    }

    #[test]
    fn recurses_through_nested_structures() {
        let value = serde_json::json!({
            "url": "{{HOST}}",
            "headers": {"Authorization": "Bearer {{TOKEN}}"},
            "tags": ["{{HOST}}", 42, null],
        });
        let resolved = resolve(&value, &secrets());
        assert_eq!(resolved["url"], "example.com");
        assert_eq!(resolved["headers"]["Authorization"], "Bearer abc123");
        assert_eq!(resolved["tags"][0], "example.com");
        assert_eq!(resolved["tags"][1], 42);
    }

    #[test]
    fn idempotent_on_already_resolved_values() {
        let value = serde_json::json!({"url": "https://example.com/ping?t=abc123"});
        let once = resolve(&value, &secrets());
        let twice = resolve(&once, &secrets());
        assert_eq!(once, twice);
    }

    #[test]
    fn non_string_scalars_pass_through() {
        let value = serde_json::json!(42);
        assert_eq!(resolve(&value, &secrets()), value);
    }
}
