//! Step traces and resolution records
//!
//! A [`StepTrace`] is produced exactly once per driver call. Drivers open a
//! [`TraceContext`] when the call starts and close it with the finished
//! [`ActionOutcome`], so no partially built trace can escape an early return.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

use crate::error::Error;

/// One resolution try against a single rung.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchAttempt {
    pub rung_index: usize,
    pub kind: String,
    pub matched_count: usize,
    pub duration_ms: u64,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The rung that resolved to a unique element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedElement {
    pub rung_index: usize,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<Value>,
    /// Backend-specific description of the matched element.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element: Option<Value>,
}

/// Record of one driver call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepTrace {
    pub run_id: String,
    pub step_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub ok: bool,
    #[serde(default)]
    pub match_attempts: Vec<MatchAttempt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved: Option<ResolvedElement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_screenshot_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_screenshot_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<i64>,
}

impl StepTrace {
    /// Screenshot paths recorded on this trace, before first.
    pub fn screenshots(&self) -> impl Iterator<Item = &PathBuf> {
        self.before_screenshot_path
            .iter()
            .chain(self.after_screenshot_path.iter())
    }
}

/// Everything a driver call produced, gathered before the trace is sealed.
#[derive(Debug, Clone, Default)]
pub struct ActionOutcome {
    pub match_attempts: Vec<MatchAttempt>,
    pub resolved: Option<ResolvedElement>,
    pub value: Option<Value>,
    pub before_screenshot_path: Option<PathBuf>,
    pub after_screenshot_path: Option<PathBuf>,
}

impl ActionOutcome {
    pub fn with_attempts(match_attempts: Vec<MatchAttempt>) -> Self {
        Self {
            match_attempts,
            ..Default::default()
        }
    }

    /// Append the attempts and resolution of a later resolution call.
    pub fn merge(mut self, other: ActionOutcome) -> Self {
        self.match_attempts.extend(other.match_attempts);
        self.resolved = other.resolved.or(self.resolved);
        self.value = other.value.or(self.value);
        self.before_screenshot_path = self.before_screenshot_path.or(other.before_screenshot_path);
        self.after_screenshot_path = other.after_screenshot_path.or(self.after_screenshot_path);
        self
    }
}

/// Identity and start time of an in-flight driver call.
#[derive(Debug, Clone)]
pub struct TraceContext {
    run_id: String,
    step_id: String,
    started_at: DateTime<Utc>,
}

impl TraceContext {
    pub fn begin(run_id: impl Into<String>, step_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            step_id: step_id.into(),
            started_at: Utc::now(),
        }
    }

    pub fn step_id(&self) -> &str {
        &self.step_id
    }

    /// Seal a successful call.
    pub fn succeeded(self, outcome: ActionOutcome) -> StepTrace {
        self.seal(outcome, None)
    }

    /// Seal a failed call. Attempts carried by the error are appended after
    /// the ones already in the outcome.
    pub fn failed(self, outcome: ActionOutcome, error: &Error) -> StepTrace {
        let outcome = outcome.merge(ActionOutcome::with_attempts(error.match_attempts().to_vec()));
        self.seal(outcome, Some(error))
    }

    /// Seal from a result, keeping the outcome gathered so far on failure.
    pub fn finish(self, result: Result<ActionOutcome, (ActionOutcome, Error)>) -> StepTrace {
        match result {
            Ok(outcome) => self.succeeded(outcome),
            Err((outcome, error)) => self.failed(outcome, &error),
        }
    }

    fn seal(self, outcome: ActionOutcome, error: Option<&Error>) -> StepTrace {
        StepTrace {
            run_id: self.run_id,
            step_id: self.step_id,
            started_at: self.started_at,
            ended_at: Utc::now(),
            ok: error.is_none(),
            match_attempts: outcome.match_attempts,
            resolved: outcome.resolved,
            before_screenshot_path: outcome.before_screenshot_path,
            after_screenshot_path: outcome.after_screenshot_path,
            value: outcome.value,
            error: error.map(|e| e.to_string()),
            error_code: error.map(Error::code),
        }
    }
}
