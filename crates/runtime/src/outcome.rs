//! Normalized execution outcomes.
//!
//! Every runtime target reports completion through the same shape: resolved
//! with a value, or rejected with an error. Crashes, deliberate closes and
//! malformed child output all fold into rejections, so callers never branch
//! on which runtime ran the module.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::coverage::CoverageMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Resolved,
    Rejected,
}

/// Error detail carried by a rejected outcome.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage: Option<CoverageMap>,
}

impl ExecutionOutcome {
    pub fn resolved(value: Value) -> Self {
        Self {
            status: ExecutionStatus::Resolved,
            value: Some(value),
            error: None,
            coverage: None,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Rejected,
            value: None,
            error: Some(ExecutionError {
                message: message.into(),
                stack: None,
            }),
            coverage: None,
        }
    }

    /// Decodes an outcome from a result envelope payload. A payload that
    /// does not match the outcome shape becomes a rejection rather than an
    /// error, same as any other misbehaving child.
    pub fn from_payload(payload: Value) -> Self {
        match serde_json::from_value::<Self>(payload) {
            Ok(outcome) => outcome,
            Err(e) => Self::rejected(format!("malformed result payload: {e}")),
        }
    }

    /// Decodes an error envelope payload, falling back to quoting the raw
    /// payload when it does not carry a usable message.
    pub fn from_error_payload(payload: Value) -> Self {
        match serde_json::from_value::<ExecutionError>(payload.clone()) {
            Ok(error) if !error.message.is_empty() => Self {
                status: ExecutionStatus::Rejected,
                value: None,
                error: Some(error),
                coverage: None,
            },
            _ => Self::rejected(format!("runtime reported an error: {payload}")),
        }
    }

    pub fn is_rejected(&self) -> bool {
        self.status == ExecutionStatus::Rejected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_serializes_lowercase() {
        let outcome = ExecutionOutcome::resolved(json!(42));
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value, json!({"status": "resolved", "value": 42}));
    }

    #[test]
    fn payload_decoding_normalizes_garbage_into_a_rejection() {
        let outcome = ExecutionOutcome::from_payload(json!({"status": "sideways"}));
        assert!(outcome.is_rejected());
        let error = outcome.error.unwrap();
        assert!(error.message.contains("malformed result payload"));
    }

    #[test]
    fn error_payload_decoding_prefers_the_carried_message() {
        let outcome =
            ExecutionOutcome::from_error_payload(json!({"message": "cannot import", "stack": "x"}));
        assert_eq!(outcome.error.as_ref().unwrap().message, "cannot import");

        let fallback = ExecutionOutcome::from_error_payload(json!("import failed"));
        assert!(fallback
            .error
            .unwrap()
            .message
            .contains("runtime reported an error"));
    }

    #[test]
    fn payload_decoding_keeps_coverage_and_stack() {
        let outcome = ExecutionOutcome::from_payload(json!({
            "status": "rejected",
            "error": {"message": "boom", "stack": "at src/app.js:3"},
            "coverage": {
                "src/app.js": {"path": "src/app.js", "s": {"0": 1}, "b": {}}
            }
        }));

        assert!(outcome.is_rejected());
        assert_eq!(outcome.error.as_ref().unwrap().stack.as_deref(), Some("at src/app.js:3"));
        let coverage = outcome.coverage.unwrap();
        assert_eq!(coverage["src/app.js"].statements["0"], 1);
    }
}
