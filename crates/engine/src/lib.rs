//! Waypoint runtime engine
//!
//! Drives workflows step by step over the registered drivers, keeps the run's
//! checkpoint and trace log, and wraps execution with human verification.

pub mod artifacts;
pub mod checkpoint;
pub mod config;
pub mod engine;
pub mod input;
pub mod trace_log;
pub mod verification;

pub use artifacts::{run_id_from_dir, ArtifactManager, RunArtifacts};
pub use checkpoint::{
    CheckpointRecord, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore, RunStatus,
    StepCheckpoint,
};
pub use config::{RuntimeConfig, WaypointConfig};
pub use engine::{RunSummary, RuntimeEngine, DEFAULT_STEP_TIMEOUT};
pub use input::{load_inputs, resolve_input, Inputs};
pub use trace_log::TraceLog;
pub use verification::{Decision, DecisionProvider, DecisionRecord, VerificationOrchestrator};
