//! Verify Command

use anyhow::Result;
use clap::Args;

use waypoint_engine::{VerificationOrchestrator, WaypointConfig};

use super::{drivers_for, engine_for, prepare, with_drivers, WorkflowArgs};
use crate::output::{print_error, print_list, print_success, DecisionRow, OutputFormat};
use crate::prompt::TerminalDecisions;

#[derive(Args, Debug)]
pub struct VerifyArgs {
    #[command(flatten)]
    pub workflow: WorkflowArgs,
}

pub async fn execute(args: VerifyArgs, config: &WaypointConfig, format: OutputFormat) -> Result<()> {
    let prepared = prepare(&args.workflow, None)?;
    let drivers = drivers_for(config, &prepared.workflow);
    let engine = engine_for(config, prepared.run, drivers.clone());
    let decisions = TerminalDecisions;

    let result = with_drivers(&drivers, async {
        Ok(VerificationOrchestrator::new(&engine, &decisions)
            .run(&prepared.workflow, &prepared.inputs)
            .await?)
    })
    .await;

    let review_dir = engine.run_artifacts().review_dir.display().to_string();
    match result {
        Ok(recorded) => {
            let rows: Vec<DecisionRow> = recorded.iter().map(DecisionRow::from).collect();
            print_list(&rows, format);
            print_success(&format!("Verification complete; review material in {}", review_dir));
            Ok(())
        }
        Err(e) => {
            print_error(&format!("Verification stopped; progress kept in {}", review_dir));
            Err(e)
        }
    }
}
