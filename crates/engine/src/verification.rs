//! Verification mode
//!
//! Runs a workflow one step at a time, pausing after each step for a human
//! decision. Everything written for a step (explain block, trace, value,
//! screenshots, decision) stays on disk even when a later step fails.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use waypoint_common::{Assertion, Error, Result, StepTrace, WorkflowDefinition, WorkflowStep};

use crate::checkpoint::RunStatus;
use crate::engine::RuntimeEngine;
use crate::input::Inputs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Proceed,
    ProceedWithComments,
    RaiseIssueWithComments,
}

impl Decision {
    pub fn requires_comment(&self) -> bool {
        !matches!(self, Decision::Proceed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Proceed => "proceed",
            Decision::ProceedWithComments => "proceed_with_comments",
            Decision::RaiseIssueWithComments => "raise_issue_with_comments",
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of the decision log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub at: DateTime<Utc>,
    pub step_id: String,
    pub decision: Decision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl DecisionRecord {
    pub fn new(step_id: impl Into<String>, decision: Decision, comment: Option<String>) -> Self {
        Self {
            at: Utc::now(),
            step_id: step_id.into(),
            decision,
            comment,
        }
    }

    /// Commented decisions need a non-blank comment.
    pub fn validate(&self) -> Result<()> {
        let has_comment = self
            .comment
            .as_deref()
            .is_some_and(|comment| !comment.trim().is_empty());
        if self.decision.requires_comment() && !has_comment {
            return Err(Error::InvalidDecision(format!(
                "{} requires a comment (step {})",
                self.decision, self.step_id
            )));
        }
        Ok(())
    }

    /// Validate a decision answering for `step_id`.
    pub fn validate_for(&self, step_id: &str) -> Result<()> {
        if self.step_id != step_id {
            return Err(Error::InvalidDecision(format!(
                "decision for step {} given while reviewing step {}",
                self.step_id, step_id
            )));
        }
        self.validate()
    }
}

/// Source of human decisions. May block indefinitely.
#[async_trait]
pub trait DecisionProvider: Send + Sync {
    async fn decide(&self, step: &WorkflowStep) -> Result<DecisionRecord>;
}

pub struct VerificationOrchestrator<'a> {
    engine: &'a RuntimeEngine,
    decisions: &'a dyn DecisionProvider,
}

impl<'a> VerificationOrchestrator<'a> {
    pub fn new(engine: &'a RuntimeEngine, decisions: &'a dyn DecisionProvider) -> Self {
        Self { engine, decisions }
    }

    /// Verify every step of the workflow in order. The run is recorded as
    /// ended only after the last decision has been appended.
    pub async fn run(&self, workflow: &WorkflowDefinition, inputs: &Inputs) -> Result<Vec<DecisionRecord>> {
        self.engine.begin(workflow).await?;

        let mut decisions = Vec::with_capacity(workflow.steps.len());
        for step in &workflow.steps {
            match self.verify_step(step, inputs).await {
                Ok(decision) => decisions.push(decision),
                Err(e) => {
                    self.engine.finish(workflow, RunStatus::Failed).await;
                    return Err(e);
                }
            }
        }

        self.engine.finish(workflow, RunStatus::Succeeded).await;
        info!(
            "Verification of run {} complete ({} decisions)",
            self.engine.run_id(),
            decisions.len()
        );
        Ok(decisions)
    }

    async fn verify_step(&self, step: &WorkflowStep, inputs: &Inputs) -> Result<DecisionRecord> {
        let review_dir = &self.engine.run_artifacts().review_dir;
        write_explain_block(step, review_dir)?;

        let outcome = self.engine.run_step(step, inputs).await;
        // Review artifacts are written for failed steps too.
        self.write_step_artifacts(step)?;
        outcome?;

        let decision = self.decisions.decide(step).await?;
        decision.validate_for(&step.id)?;
        append_decision(&self.engine.run_artifacts().decision_log_path(), &decision)?;
        info!("Step {} decision: {}", step.id, decision.decision);
        Ok(decision)
    }

    fn write_step_artifacts(&self, step: &WorkflowStep) -> Result<()> {
        let Some(trace) = self.engine.trace_log().last_for_step(&step.id)? else {
            return Ok(());
        };
        write_review_artifacts(&trace, &self.engine.run_artifacts().review_dir)
    }
}

fn format_assertions(title: &str, assertions: &[Assertion]) -> String {
    if assertions.is_empty() {
        return format!("{}: none", title);
    }
    let mut block = format!("{}:", title);
    for assertion in assertions {
        let _ = write!(block, "\n- {}", assertion.summary());
    }
    block
}

pub fn explain_block(step: &WorkflowStep) -> String {
    let explain = step
        .explain
        .clone()
        .unwrap_or_else(|| format!("{} ({})", step.action, step.driver));
    [
        format!("# Step {}", step.id),
        String::new(),
        format!("**Explain**: {}", explain),
        String::new(),
        format_assertions("Pre-assertions", &step.pre_assert),
        String::new(),
        format_assertions("Post-assertions", &step.post_assert),
        String::new(),
    ]
    .join("\n")
}

fn write_explain_block(step: &WorkflowStep, review_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(review_dir)?;
    std::fs::write(review_dir.join(format!("step_{}.md", step.id)), explain_block(step))?;
    Ok(())
}

/// Persist the step's trace, its extracted value and copies of its
/// screenshots into the review directory.
fn write_review_artifacts(trace: &StepTrace, review_dir: &Path) -> Result<()> {
    let step_id = &trace.step_id;
    std::fs::write(
        review_dir.join(format!("step_{}_trace.json", step_id)),
        serde_json::to_string_pretty(trace)?,
    )?;

    if let Some(value) = &trace.value {
        std::fs::write(
            review_dir.join(format!("step_{}_value.json", step_id)),
            serde_json::to_string_pretty(&serde_json::json!({ "value": value }))?,
        )?;
    }

    for screenshot in trace.screenshots() {
        let Some(name) = screenshot.file_name() else {
            continue;
        };
        let copy: PathBuf = review_dir.join(name);
        if let Err(e) = std::fs::copy(screenshot, &copy) {
            warn!("Failed to copy screenshot {}: {}", screenshot.display(), e);
        }
    }
    Ok(())
}

fn append_decision(path: &Path, decision: &DecisionRecord) -> Result<()> {
    let line = serde_json::to_string(decision)?;
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", line)?;
    file.flush()?;
    Ok(())
}
