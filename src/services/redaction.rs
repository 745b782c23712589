//! Payload redaction and truncation.
//!
//! Values are redacted structurally before they are serialized, and only then
//! cut to the byte budget, so a secret can never survive because the cut
//! point happened to land inside it.

use serde_json::{Map, Value};
use std::collections::HashSet;

/// Replaces the value of every deny-listed key.
pub const REDACTION_MARKER: &str = "[REDACTED]";

/// Appended to payloads cut to the byte budget.
pub const TRUNCATION_MARKER: &str = "...[truncated]";

/// Redacts deny-listed keys and bounds serialized payload size.
#[derive(Debug, Clone)]
pub struct Redactor {
    deny_keys: HashSet<String>,
    max_bytes: usize,
}

impl Redactor {
    /// Key matching is case-insensitive. `max_bytes` is clamped so the
    /// truncation marker always fits.
    pub fn new<I, S>(deny_keys: I, max_bytes: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            deny_keys: deny_keys
                .into_iter()
                .map(|k| k.as_ref().to_lowercase())
                .collect(),
            max_bytes: max_bytes.max(TRUNCATION_MARKER.len()),
        }
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    fn is_denied(&self, key: &str) -> bool {
        self.deny_keys.contains(&key.to_lowercase())
    }

    /// Recursively replace deny-listed object values with the marker.
    pub fn redact(&self, value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let redacted: Map<String, Value> = map
                    .iter()
                    .map(|(key, inner)| {
                        let inner = if self.is_denied(key) {
                            Value::String(REDACTION_MARKER.to_string())
                        } else {
                            self.redact(inner)
                        };
                        (key.clone(), inner)
                    })
                    .collect();
                Value::Object(redacted)
            }
            Value::Array(items) => Value::Array(items.iter().map(|v| self.redact(v)).collect()),
            scalar => scalar.clone(),
        }
    }

    /// Serialize an already-redacted value and cut it to the byte budget.
    pub fn render(&self, redacted: &Value) -> String {
        let serialized = serde_json::to_string(redacted).unwrap_or_else(|_| "null".to_string());
        truncate_to_budget(serialized, self.max_bytes)
    }

    /// Redact, then render.
    pub fn redact_and_render(&self, value: &Value) -> String {
        self.render(&self.redact(value))
    }
}

/// Cut `text` so that, with the marker appended, it fits in `budget` bytes.
/// The cut never splits a UTF-8 character.
pub fn truncate_to_budget(mut text: String, budget: usize) -> String {
    if text.len() <= budget {
        return text;
    }

    let mut cut = budget.saturating_sub(TRUNCATION_MARKER.len());
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
    text.push_str(TRUNCATION_MARKER);
    text
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn key_strategy() -> impl Strategy<Value = String> {
        prop_oneof![
            "[a-z_]{1,8}",
            Just("password".to_string()),
            Just("Token".to_string()),
            Just("API_KEY".to_string()),
        ]
    }

    /// Arbitrary JSON documents a few levels deep
    fn json_strategy() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| json!(n)),
            "[a-z ]{0,12}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 32, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map(key_strategy(), inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    fn redactor(max_bytes: usize) -> Redactor {
        Redactor::new(["password", "token", "api_key"], max_bytes)
    }

    /// Every denied key anywhere in `value` maps to the marker.
    fn denied_keys_masked(value: &Value, redactor: &Redactor) -> bool {
        match value {
            Value::Object(map) => map.iter().all(|(key, inner)| {
                if redactor.is_denied(key) {
                    inner == &Value::String(REDACTION_MARKER.to_string())
                } else {
                    denied_keys_masked(inner, redactor)
                }
            }),
            Value::Array(items) => items.iter().all(|v| denied_keys_masked(v, redactor)),
            _ => true,
        }
    }

    proptest! {
        #[test]
        fn proptest_denied_keys_always_masked(value in json_strategy()) {
            let redactor = redactor(1 << 20);
            prop_assert!(denied_keys_masked(&redactor.redact(&value), &redactor));
        }

        #[test]
        fn proptest_redaction_is_idempotent(value in json_strategy()) {
            let redactor = redactor(1 << 20);
            let once = redactor.redact(&value);
            prop_assert_eq!(redactor.redact(&once), once);
        }

        #[test]
        fn proptest_secret_never_rendered(secret in "[A-Z0-9]{12,24}", noise in json_strategy()) {
            let secret = format!("S3CR3T-{secret}");
            let value = json!({"outer": {"PassWord": secret, "other": noise}, "list": [{"token": secret}]});
            let rendered = redactor(1 << 20).redact_and_render(&value);
            prop_assert!(!rendered.contains(&secret));
        }

        #[test]
        fn proptest_truncation_respects_budget(text in "\\PC{0,400}", budget in 14usize..256) {
            let original = text.clone();
            let truncated = truncate_to_budget(text, budget);
            prop_assert!(truncated.len() <= budget);
            if original.len() <= budget {
                prop_assert_eq!(truncated, original);
            } else {
                prop_assert!(truncated.ends_with(TRUNCATION_MARKER));
                let kept = &truncated[..truncated.len() - TRUNCATION_MARKER.len()];
                prop_assert!(original.starts_with(kept));
            }
        }
    }
}
