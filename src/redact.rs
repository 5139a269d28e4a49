//! Secret redaction over structured payloads
//!
//! Scrubs configured sensitive keys out of arbitrarily nested JSON values
//! before they reach a storage backend. Mapping keys that are members of the
//! secret set have their values replaced by a mask token; sequences are
//! walked element by element; scalars pass through untouched. A non-mapping
//! top level (array, string, number) is never an error.

use std::collections::HashSet;

use serde_json::Value;

/// Mask token substituted for secret values in request/response payloads
pub const MASK: &str = "***";

/// Mask token substituted for secret header values
pub const HEADER_MASK: &str = "*****";

/// Maximum nesting depth the redactor will descend into.
///
/// Payload bodies are attacker-controlled, so traversal is iterative (an
/// explicit work stack, no recursion) and bounded. Levels deeper than this
/// are left as-is and a warning is emitted.
pub const MAX_DEPTH: usize = 128;

/// Replace the value of every key in `secrets` with [`MASK`], at any nesting
/// depth reachable through mappings and sequences.
///
/// Key comparison is case-sensitive. The operation is idempotent: redacting
/// an already-redacted value is a no-op.
pub fn redact(value: &mut Value, secrets: &HashSet<String>) {
    let mut stack: Vec<(&mut Value, usize)> = vec![(value, 0)];

    while let Some((node, depth)) = stack.pop() {
        if depth >= MAX_DEPTH {
            tracing::warn!(
                target: "requestlogs",
                depth,
                "payload nesting exceeds redaction depth bound; deeper levels left unredacted"
            );
            continue;
        }
        match node {
            Value::Object(map) => {
                for (key, child) in map.iter_mut() {
                    if secrets.contains(key.as_str()) {
                        *child = Value::String(MASK.to_string());
                    } else {
                        stack.push((child, depth + 1));
                    }
                }
            }
            Value::Array(items) => {
                for child in items.iter_mut() {
                    stack.push((child, depth + 1));
                }
            }
            _ => {}
        }
    }
}

/// Owned-value convenience wrapper around [`redact`]
pub fn redacted(mut value: Value, secrets: &HashSet<String>) -> Value {
    redact(&mut value, secrets);
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn secrets(keys: &[&str]) -> HashSet<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn test_redact_flat_mapping() {
        let out = redacted(
            json!({"username": "u1", "password": "hunter2"}),
            &secrets(&["password"]),
        );
        assert_eq!(out, json!({"username": "u1", "password": "***"}));
    }

    #[test]
    fn test_redact_nested_mapping_and_sequence() {
        let out = redacted(
            json!({
                "items": [
                    {"token": "abc", "name": "one"},
                    {"nested": {"token": 42}},
                ],
                "meta": {"password": {"complex": "value"}},
            }),
            &secrets(&["token", "password"]),
        );
        assert_eq!(
            out,
            json!({
                "items": [
                    {"token": "***", "name": "one"},
                    {"nested": {"token": "***"}},
                ],
                "meta": {"password": "***"},
            })
        );
    }

    #[test]
    fn test_redact_is_case_sensitive() {
        let out = redacted(json!({"Password": "x"}), &secrets(&["password"]));
        assert_eq!(out, json!({"Password": "x"}));
    }

    #[test]
    fn test_redact_non_mapping_top_level_is_noop() {
        let s = secrets(&["password"]);
        assert_eq!(redacted(json!("password"), &s), json!("password"));
        assert_eq!(redacted(json!(17), &s), json!(17));
        assert_eq!(redacted(json!(null), &s), json!(null));
        assert_eq!(redacted(json!(["password"]), &s), json!(["password"]));
    }

    #[test]
    fn test_redact_idempotent() {
        let s = secrets(&["token"]);
        let once = redacted(json!({"token": "x", "a": [{"token": 1}]}), &s);
        let twice = redacted(once.clone(), &s);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_redact_preserves_non_secret_keys() {
        let input = json!({"a": 1, "b": [true, {"c": "d"}], "e": null});
        let out = redacted(input.clone(), &secrets(&["password"]));
        assert_eq!(out, input);
    }

    #[test]
    fn test_redact_survives_adversarial_nesting() {
        // Build a value nested far beyond the depth bound.
        let mut value = json!({"password": "leaf"});
        for _ in 0..(MAX_DEPTH * 4) {
            value = json!({"wrap": value});
        }
        // Must not blow the stack; the shallow levels are still walked.
        redact(&mut value, &secrets(&["password"]));
    }

    #[test]
    fn test_redact_empty_secret_set() {
        let input = json!({"password": "kept"});
        assert_eq!(redacted(input.clone(), &HashSet::new()), input);
    }
}
