//! Evaluation records: the persisted outcome of a (user, flag) decision.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::evaluation::StackFrame;
use crate::flag::{Flag, FlagId, FlagKey};
use crate::value::Value;

/// Unique identifier for an evaluation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EvaluationId(pub Uuid);

impl EvaluationId {
    /// Creates a new random evaluation ID.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates an evaluation ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for EvaluationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EvaluationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The decided value of one flag for one user.
///
/// At most one record exists per (user, flag); the flag version and request
/// hash captured here are compared on the next request to decide whether the
/// record can be reused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    /// Unique identifier.
    pub id: EvaluationId,
    /// Flag this evaluation belongs to.
    pub flag_id: FlagId,
    /// Flag key at the time of evaluation.
    pub flag_key: FlagKey,
    /// Flag version this evaluation was computed against.
    pub flag_version: i64,
    /// The decided variant value; null when no variant resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Error message when the evaluation failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Debug trace; only populated for debug requests, never persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<Vec<StackFrame>>,
    /// Fingerprint of the request that produced this evaluation.
    pub request_hash: String,
    /// Set on every upsert.
    #[serde(rename = "timestamp")]
    pub updated_at: DateTime<Utc>,
}

impl Evaluation {
    /// Creates an empty evaluation for a flag, ready to receive an answer.
    pub fn for_flag(flag: &Flag, request_hash: impl Into<String>) -> Self {
        Self {
            id: EvaluationId::new(),
            flag_id: flag.id,
            flag_key: flag.key.clone(),
            flag_version: flag.version,
            value: None,
            error: None,
            stack_trace: None,
            request_hash: request_hash.into(),
            updated_at: Utc::now(),
        }
    }
}

/// A batch of evaluations, as produced by an evaluate-all request.
pub type EvaluationList = Vec<Evaluation>;

/// Cache key for the full result of an evaluate-all request.
pub fn list_cache_key(req_hash: &str) -> String {
    format!("eval:{req_hash}")
}

/// Cache key for a single-flag evaluation.
pub fn flag_cache_key(req_hash: &str, flag_key: &FlagKey) -> String {
    format!("eval:{req_hash}:{flag_key}")
}

/// Pattern matching every evaluation cache key.
pub const CACHE_KEY_PATTERN: &str = "eval:*";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_format() {
        let key = FlagKey::new("dark-mode");
        assert_eq!(list_cache_key("abc123"), "eval:abc123");
        assert_eq!(flag_cache_key("abc123", &key), "eval:abc123:dark-mode");
    }

    #[test]
    fn test_record_wire_shape() {
        let flag = Flag::new("dark-mode", "Dark Mode");
        let eval = Evaluation::for_flag(&flag, "abc123");
        let json = serde_json::to_value(&eval).unwrap();

        assert_eq!(json["flagKey"], "dark-mode");
        assert_eq!(json["flagVersion"], 1);
        assert_eq!(json["requestHash"], "abc123");
        assert!(json.get("timestamp").is_some());
        // Unset optionals are omitted entirely.
        assert!(json.get("value").is_none());
        assert!(json.get("error").is_none());
        assert!(json.get("stackTrace").is_none());
    }
}
