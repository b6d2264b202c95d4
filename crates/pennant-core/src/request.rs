//! Evaluation requests, responses and the request fingerprint.

use std::fmt::Write as _;
use std::io::Cursor;

use serde::{Deserialize, Serialize};

use crate::context::{UserContext, ID_KEY};
use crate::record::{Evaluation, EvaluationList};
use crate::value::Value;

/// A request to evaluate one or all flags for a user.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationRequest {
    /// Identifier of the user being evaluated; must be non-empty.
    pub user_id: String,
    /// Arbitrary contextual attributes used by targeting rules.
    #[serde(default)]
    pub user_context: UserContext,
    /// When set, caching and persistence are bypassed and the response
    /// carries an evaluation trace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<bool>,
}

impl EvaluationRequest {
    /// Creates a request for a user with an empty context.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            user_context: UserContext::new(),
            debug: None,
        }
    }

    /// Sets a context attribute, builder style.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.user_context.insert(key, value);
        self
    }

    /// Enables debug mode.
    pub fn with_debug(mut self) -> Self {
        self.debug = Some(true);
        self
    }

    /// Returns true when the request asks for a debug evaluation.
    pub fn is_debug(&self) -> bool {
        self.debug.unwrap_or(false)
    }

    /// Returns the user context with the user ID injected under the reserved
    /// `id` key, as the evaluator expects it.
    pub fn context_with_id(&self) -> UserContext {
        let mut context = self.user_context.clone();
        context.insert(ID_KEY, self.user_id.clone());
        context
    }

    /// Computes the request fingerprint.
    ///
    /// A stable hex digest over a canonical encoding of the user ID and the
    /// sorted context entries; the debug flag does not participate. Used as
    /// an evaluation cache key and to detect "context changed since last
    /// evaluation". Murmur3 x64/128 with seed 0; the choice is frozen, since
    /// changing it would invalidate every stored evaluation at once.
    pub fn fingerprint(&self) -> String {
        let mut canonical = String::new();
        write_str(&mut canonical, &self.user_id);
        for (key, value) in self.user_context.iter() {
            canonical.push('|');
            write_str(&mut canonical, key);
            canonical.push('=');
            write_value(&mut canonical, value);
        }

        let mut reader = Cursor::new(canonical.as_bytes());
        let digest = murmur3::murmur3_x64_128(&mut reader, 0).unwrap_or(0);
        format!("{digest:032x}")
    }
}

// Canonical encoding: integers as decimal, booleans as `true`/`false`,
// strings length-prefixed (so adjacent fields cannot alias), nested maps
// recursively with keys sorted.
fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Int(i) => {
            let _ = write!(out, "{i}");
        }
        Value::Float(f) => {
            let _ = write!(out, "{f}");
        }
        Value::String(s) => write_str(out, s),
        Value::Json(v) => write_json(out, v),
    }
}

fn write_json(out: &mut String, value: &serde_json::Value) {
    match value {
        serde_json::Value::Null => out.push_str("null"),
        serde_json::Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        serde_json::Value::Number(n) => {
            let _ = write!(out, "{n}");
        }
        serde_json::Value::String(s) => write_str(out, s),
        serde_json::Value::Array(items) => {
            out.push('[');
            for item in items {
                write_json(out, item);
                out.push(',');
            }
            out.push(']');
        }
        serde_json::Value::Object(entries) => {
            // Sorted explicitly; the underlying map ordering depends on
            // serde_json features.
            let mut sorted: Vec<_> = entries.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (key, item) in sorted {
                write_str(out, key);
                out.push(':');
                write_json(out, item);
                out.push(',');
            }
            out.push('}');
        }
    }
}

fn write_str(out: &mut String, s: &str) {
    let _ = write!(out, "{}:", s.len());
    out.push_str(s);
}

/// Response to a single-flag evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResponse {
    /// The decided evaluation.
    pub evaluation: Evaluation,
    /// The user context, echoed back only in debug mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_context: Option<UserContext>,
}

/// Response to an evaluate-all request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationsResponse {
    /// One evaluation per flag, in the store's canonical flag order.
    pub evaluations: EvaluationList,
    /// The user context, echoed back only in debug mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_context: Option<UserContext>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_stable() {
        let req = EvaluationRequest::new("u1").set("country", "US").set("age", 30);
        assert_eq!(req.fingerprint(), req.fingerprint());
    }

    #[test]
    fn test_fingerprint_ignores_key_order_and_debug() {
        let a = EvaluationRequest::new("u1").set("country", "US").set("plan", "pro");
        let b = EvaluationRequest::new("u1").set("plan", "pro").set("country", "US");
        assert_eq!(a.fingerprint(), b.fingerprint());

        let debug = a.clone().with_debug();
        assert_eq!(a.fingerprint(), debug.fingerprint());
    }

    #[test]
    fn test_fingerprint_changes_with_content() {
        let base = EvaluationRequest::new("u1").set("country", "US");
        let other_value = EvaluationRequest::new("u1").set("country", "CA");
        let other_user = EvaluationRequest::new("u2").set("country", "US");
        let other_type = EvaluationRequest::new("u1").set("country", true);

        assert_ne!(base.fingerprint(), other_value.fingerprint());
        assert_ne!(base.fingerprint(), other_user.fingerprint());
        assert_ne!(base.fingerprint(), other_type.fingerprint());
    }

    #[test]
    fn test_fingerprint_nested_maps_are_canonical() {
        let a = EvaluationRequest::new("u1")
            .set("prefs", Value::Json(serde_json::json!({"a": 1, "b": 2})));
        let b = EvaluationRequest::new("u1")
            .set("prefs", Value::Json(serde_json::json!({"b": 2, "a": 1})));
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_adjacent_fields_do_not_alias() {
        let a = EvaluationRequest::new("u1").set("ab", "c");
        let b = EvaluationRequest::new("u1").set("a", "bc");
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_context_with_id_injects_reserved_key() {
        let req = EvaluationRequest::new("u1").set("plan", "pro");
        let context = req.context_with_id();
        assert_eq!(context.id(), Some("u1"));
        assert!(context.has("plan"));
    }
}
