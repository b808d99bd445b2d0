//! Interactive decision prompt for verification mode

use async_trait::async_trait;
use dialoguer::{Input, Select};

use waypoint_common::{Error, Result, WorkflowStep};
use waypoint_engine::verification::explain_block;
use waypoint_engine::{Decision, DecisionProvider, DecisionRecord};

const CHOICES: [(&str, Decision); 3] = [
    ("Proceed", Decision::Proceed),
    ("Proceed with comments", Decision::ProceedWithComments),
    ("Raise issue with comments", Decision::RaiseIssueWithComments),
];

/// Asks the operator on the terminal after every step
pub struct TerminalDecisions;

#[async_trait]
impl DecisionProvider for TerminalDecisions {
    async fn decide(&self, step: &WorkflowStep) -> Result<DecisionRecord> {
        let step = step.clone();
        tokio::task::spawn_blocking(move || ask(&step))
            .await
            .map_err(|e| Error::InvalidDecision(format!("prompt aborted: {}", e)))?
    }
}

fn ask(step: &WorkflowStep) -> Result<DecisionRecord> {
    println!("\n{}", explain_block(step));

    let labels: Vec<&str> = CHOICES.iter().map(|(label, _)| *label).collect();
    let selection = Select::new()
        .with_prompt(format!("Step {} finished. Decision", step.id))
        .items(&labels)
        .default(0)
        .interact()
        .map_err(prompt_error)?;
    let decision = CHOICES[selection].1;

    let comment = if decision.requires_comment() {
        let text: String = Input::new()
            .with_prompt("Comment")
            .validate_with(|input: &String| -> std::result::Result<(), &str> {
                if input.trim().is_empty() {
                    Err("a comment is required for this decision")
                } else {
                    Ok(())
                }
            })
            .interact_text()
            .map_err(prompt_error)?;
        Some(text)
    } else {
        None
    };

    Ok(DecisionRecord::new(&step.id, decision, comment))
}

fn prompt_error(e: dialoguer::Error) -> Error {
    Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e))
}
