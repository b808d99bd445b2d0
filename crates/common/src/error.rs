//! Error types for Waypoint

use serde_json::Value;
use thiserror::Error;

use crate::trace::{MatchAttempt, StepTrace};

/// Result type alias using Waypoint Error
pub type Result<T> = std::result::Result<T, Error>;

/// Error codes shared with the automation backends.
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;

    pub const SCOPE_NOT_FOUND: i64 = 1000;
    pub const ELEMENT_NOT_FOUND: i64 = 1001;
    pub const AMBIGUOUS_MATCH: i64 = 1002;
    pub const ACTION_FAILED: i64 = 1003;
    pub const ASSERTION_FAILED: i64 = 1004;
    pub const TIMEOUT: i64 = 1005;
    pub const OCR_FAILED: i64 = 1006;
}

/// Error payload of a JSON-RPC `error` response.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RpcErrorPayload {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Waypoint error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // Transport
    #[error("Request timed out: {method} after {timeout_ms}ms")]
    RequestTimeout { method: String, timeout_ms: u64 },

    #[error("Backend exited with code {}", code.map(|c| c.to_string()).unwrap_or_else(|| "unknown".to_string()))]
    ProcessExited { code: Option<i32> },

    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(RpcErrorPayload),

    #[error("{0} is not started")]
    NotStarted(String),

    #[error("Failed to spawn backend: {0}")]
    Spawn(String),

    // Resolution
    #[error("Scope mismatch: {0}")]
    ScopeMismatch(String),

    #[error("No selector rung resolved to a unique element ({} attempts)", attempts.len())]
    LadderExhausted { attempts: Vec<MatchAttempt> },

    // Assertions
    #[error("Assertion {kind} failed: {message}")]
    AssertionFailed { kind: String, message: String },

    // Validation
    #[error("Missing target for step {0}")]
    MissingTarget(String),

    #[error("Missing input for step {0}")]
    MissingInput(String),

    #[error("Missing input variable: {0}")]
    UndefinedVariable(String),

    #[error("Unsupported {driver} action: {action}")]
    UnsupportedAction { driver: String, action: String },

    #[error("Unsupported driver: {0}")]
    UnsupportedDriver(String),

    #[error("Invalid decision: {0}")]
    InvalidDecision(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid workflow: {0}")]
    InvalidWorkflow(String),

    // Step
    #[error("Step {step_id} timed out after {timeout_ms}ms")]
    StepTimeout { step_id: String, timeout_ms: u64 },

    #[error("Step {step_id} failed: {message}")]
    StepFailed {
        step_id: String,
        message: String,
        trace: Box<StepTrace>,
    },

    #[error("Action failed: {0}")]
    ActionFailed(String),
}

impl Error {
    /// Numeric code, aligned with the backend's code space.
    pub fn code(&self) -> i64 {
        match self {
            Error::Rpc(payload) => payload.code,
            Error::ScopeMismatch(_) => codes::SCOPE_NOT_FOUND,
            Error::LadderExhausted { .. } => codes::ELEMENT_NOT_FOUND,
            Error::AssertionFailed { .. } => codes::ASSERTION_FAILED,
            Error::RequestTimeout { .. } | Error::StepTimeout { .. } => codes::TIMEOUT,
            Error::MissingTarget(_)
            | Error::MissingInput(_)
            | Error::UndefinedVariable(_)
            | Error::InvalidDecision(_)
            | Error::InvalidConfig(_)
            | Error::InvalidWorkflow(_) => codes::INVALID_PARAMS,
            Error::UnsupportedAction { .. } | Error::UnsupportedDriver(_) => {
                codes::METHOD_NOT_FOUND
            }
            Error::StepFailed { trace, .. } => trace.error_code.unwrap_or(codes::ACTION_FAILED),
            Error::ActionFailed(_) => codes::ACTION_FAILED,
            _ => codes::INTERNAL_ERROR,
        }
    }

    /// Match attempts recorded before the failure, if any.
    pub fn match_attempts(&self) -> &[MatchAttempt] {
        match self {
            Error::LadderExhausted { attempts } => attempts,
            _ => &[],
        }
    }

    /// Partial trace carried by the failure, either in an RPC error's
    /// `data.trace` or by a failed step.
    pub fn partial_trace(&self) -> Option<StepTrace> {
        match self {
            Error::Rpc(RpcErrorPayload {
                data: Some(data), ..
            }) => data
                .get("trace")
                .and_then(|trace| serde_json::from_value(trace.clone()).ok()),
            Error::StepFailed { trace, .. } => Some(trace.as_ref().clone()),
            _ => None,
        }
    }

    /// True for failures raised by the transport rather than the backend.
    /// RPC errors count only inside the reserved JSON-RPC protocol range;
    /// backend action and assertion codes do not.
    pub fn is_transport(&self) -> bool {
        match self {
            Error::Rpc(payload) => (-32768..=-32000).contains(&payload.code),
            Error::RequestTimeout { .. }
            | Error::ProcessExited { .. }
            | Error::NotStarted(_)
            | Error::Spawn(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    #[test]
    fn rpc_error_exposes_code_and_message() {
        let err = Error::Rpc(RpcErrorPayload {
            code: codes::ASSERTION_FAILED,
            message: "Assertion failed".to_string(),
            data: None,
        });
        assert_eq!(err.code(), 1004);
        assert_eq!(err.to_string(), "RPC error 1004: Assertion failed");
        assert!(!err.is_transport());
    }

    #[test_case(codes::PARSE_ERROR, true ; "parse error")]
    #[test_case(codes::METHOD_NOT_FOUND, true ; "unroutable method")]
    #[test_case(codes::ACTION_FAILED, false ; "backend action failure")]
    #[test_case(codes::ELEMENT_NOT_FOUND, false ; "backend resolution failure")]
    fn only_protocol_rpc_errors_are_transport(code: i64, transport: bool) {
        let err = Error::Rpc(RpcErrorPayload {
            code,
            message: "failure".to_string(),
            data: None,
        });
        assert_eq!(err.is_transport(), transport);
    }

    #[test]
    fn transport_errors_are_classified() {
        assert!(Error::RequestTimeout {
            method: "system.ping".to_string(),
            timeout_ms: 10,
        }
        .is_transport());
        assert!(!Error::ActionFailed("boom".to_string()).is_transport());
    }

    #[test]
    fn partial_trace_is_read_from_rpc_data() {
        let err = Error::Rpc(RpcErrorPayload {
            code: codes::ACTION_FAILED,
            message: "Action failed".to_string(),
            data: Some(json!({
                "trace": {
                    "run_id": "run-1",
                    "step_id": "s1",
                    "started_at": "2024-01-01T00:00:00Z",
                    "ended_at": "2024-01-01T00:00:01+00:00",
                    "ok": false,
                    "match_attempts": [],
                    "error": "boom"
                }
            })),
        });
        let trace = err.partial_trace().expect("trace in data");
        assert_eq!(trace.step_id, "s1");
        assert!(!trace.ok);
        assert_eq!(trace.error.as_deref(), Some("boom"));
    }

    #[test]
    fn partial_trace_absent_without_data() {
        let err = Error::RequestTimeout {
            method: "action.click".to_string(),
            timeout_ms: 10,
        };
        assert!(err.partial_trace().is_none());
        assert_eq!(err.code(), codes::TIMEOUT);
    }
}
