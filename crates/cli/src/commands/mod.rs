//! CLI Commands

pub mod probe;
pub mod run;
pub mod verify;

use anyhow::{Context, Result};
use clap::Args;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use waypoint_common::{DriverKind, WorkflowDefinition};
use waypoint_drivers::{DesktopDriver, Drivers, WebDriver};
use waypoint_engine::{
    load_inputs, run_id_from_dir, ArtifactManager, CheckpointStore, FileCheckpointStore, Inputs,
    RunArtifacts, RuntimeEngine, WaypointConfig,
};

/// Arguments shared by `run` and `verify`
#[derive(Args, Debug, Clone)]
pub struct WorkflowArgs {
    /// Workflow file (JSON or YAML)
    #[arg(short, long)]
    pub workflow: PathBuf,

    /// Inputs file (JSON object of variables)
    #[arg(short, long)]
    pub inputs: Option<PathBuf>,

    /// Base directory for run artifacts
    #[arg(short, long, default_value = "runs")]
    pub out: PathBuf,

    /// Run id (defaults to a timestamped id)
    #[arg(long)]
    pub run_id: Option<String>,
}

/// Everything a run needs, loaded from disk
pub struct Prepared {
    pub workflow: WorkflowDefinition,
    pub inputs: Inputs,
    pub run: RunArtifacts,
}

pub fn prepare(args: &WorkflowArgs, resume: Option<&Path>) -> Result<Prepared> {
    let workflow = WorkflowDefinition::from_file(&args.workflow)
        .with_context(|| format!("Failed to load workflow {}", args.workflow.display()))?;
    let inputs = match &args.inputs {
        Some(path) => load_inputs(path)
            .with_context(|| format!("Failed to load inputs {}", path.display()))?,
        None => Inputs::new(),
    };

    let manager = ArtifactManager::new(&args.out);
    let run = match resume {
        Some(run_dir) => {
            let run_id = resumed_run_id(run_dir)
                .with_context(|| format!("Cannot determine run id of {}", run_dir.display()))?;
            manager.load_run_folder(run_dir, &run_id)?
        }
        None => manager.create_run_folder(args.run_id.as_deref())?,
    };
    info!("Run {} writing to {}", run.run_id, run.run_dir.display());

    Ok(Prepared {
        workflow,
        inputs,
        run,
    })
}

/// Run id of an existing run folder: taken from its checkpoint, else from
/// the folder name.
fn resumed_run_id(run_dir: &Path) -> Result<String> {
    let store = FileCheckpointStore::new(run_dir.join("checkpoints.json"));
    if let Some(record) = store.load()? {
        if !record.run_id.is_empty() {
            return Ok(record.run_id);
        }
    }
    run_id_from_dir(run_dir).context("run folder name has no run id")
}

/// Engine over the prepared run, with the configured default timeout
pub fn engine_for(config: &WaypointConfig, run: RunArtifacts, drivers: Drivers) -> RuntimeEngine {
    RuntimeEngine::new(run, drivers).with_default_timeout(config.runtime.default_timeout())
}

/// Drivers for exactly the surfaces the workflow uses
pub fn drivers_for(config: &WaypointConfig, workflow: &WorkflowDefinition) -> Drivers {
    let mut drivers = Drivers::new();
    if workflow.uses_driver(&DriverKind::Desktop) {
        drivers.insert(Arc::new(DesktopDriver::new(config.desktop.clone())));
    }
    if workflow.uses_driver(&DriverKind::Web) {
        drivers.insert(Arc::new(WebDriver::new(config.web.clone())));
    }
    drivers
}

/// Start the drivers, run `body`, then stop the drivers on every path,
/// including Ctrl-C.
pub async fn with_drivers<T, F>(drivers: &Drivers, body: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    drivers.start_all().await.context("Failed to start drivers")?;

    let result = tokio::select! {
        result = body => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, stopping drivers");
            Err(anyhow::anyhow!("interrupted"))
        }
    };

    drivers.stop_all().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_workflow(dir: &Path) -> PathBuf {
        let path = dir.join("flow.yaml");
        std::fs::write(
            &path,
            "id: flow\nsteps:\n  - id: open\n    driver: web\n    action: navigate\n    input: https://example.test\n",
        )
        .unwrap();
        path
    }

    #[test]
    fn test_drivers_follow_workflow() {
        let dir = tempfile::tempdir().unwrap();
        let workflow = WorkflowDefinition::from_file(&write_workflow(dir.path())).unwrap();

        let drivers = drivers_for(&WaypointConfig::default(), &workflow);

        let kinds: Vec<_> = drivers.kinds().cloned().collect();
        assert_eq!(kinds, vec![DriverKind::Web]);
    }

    #[test]
    fn test_prepare_and_resume_reuse_run_id() {
        let dir = tempfile::tempdir().unwrap();
        let args = WorkflowArgs {
            workflow: write_workflow(dir.path()),
            inputs: None,
            out: dir.path().join("runs"),
            run_id: Some("nightly".to_string()),
        };

        let first = prepare(&args, None).unwrap();
        FileCheckpointStore::new(first.run.checkpoint_path())
            .record_run_start("nightly")
            .unwrap();

        let resumed = prepare(&args, Some(&first.run.run_dir)).unwrap();
        assert_eq!(resumed.run.run_id, "nightly");
        assert_eq!(resumed.run.run_dir, first.run.run_dir);
    }
}
