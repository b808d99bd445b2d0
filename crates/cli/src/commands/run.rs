//! Run Command

use anyhow::Result;
use clap::Args;
use std::path::PathBuf;

use waypoint_engine::{CheckpointStore, WaypointConfig};

use super::{drivers_for, engine_for, prepare, with_drivers, WorkflowArgs};
use crate::output::{print_error, print_info, print_list, print_success, step_rows, OutputFormat};

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub workflow: WorkflowArgs,

    /// Resume an existing run folder after its last successful step
    #[arg(long, value_name = "RUN_DIR")]
    pub resume: Option<PathBuf>,
}

pub async fn execute(args: RunArgs, config: &WaypointConfig, format: OutputFormat) -> Result<()> {
    let prepared = prepare(&args.workflow, args.resume.as_deref())?;
    let drivers = drivers_for(config, &prepared.workflow);
    let engine = engine_for(config, prepared.run, drivers.clone());

    let result = with_drivers(&drivers, async {
        Ok(engine
            .run_workflow(&prepared.workflow, &prepared.inputs, args.resume.is_some())
            .await?)
    })
    .await;

    if let Some(record) = engine.checkpoints().load()? {
        print_list(&step_rows(&record), format);
    }

    match result {
        Ok(summary) => {
            if !summary.skipped.is_empty() {
                print_info(&format!("Skipped (already completed): {}", summary.skipped.join(", ")));
            }
            print_success(&format!(
                "Run {} succeeded; artifacts in {}",
                summary.run_id,
                engine.run_artifacts().run_dir.display()
            ));
            Ok(())
        }
        Err(e) => {
            print_error(&format!(
                "Run {} failed; resume with --resume {}",
                engine.run_id(),
                engine.run_artifacts().run_dir.display()
            ));
            Err(e)
        }
    }
}
