//! Checkpoint store
//!
//! The checkpoint is the sole source of truth for resume. It is rewritten
//! whole after every step boundary; the engine is its only writer for the
//! lifetime of a run.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use waypoint_common::Result;

/// Terminal or in-flight run status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Running,
    Succeeded,
    Failed,
}

/// Start/end of one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepCheckpoint {
    pub step_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
}

/// Per-run progress ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub run_id: String,
    pub run_started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: RunStatus,
    #[serde(default)]
    pub steps: Vec<StepCheckpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_success_step_id: Option<String>,
}

impl CheckpointRecord {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            run_started_at: Utc::now(),
            run_ended_at: None,
            status: RunStatus::Running,
            steps: Vec::new(),
            last_success_step_id: None,
        }
    }

    /// Open a new entry for the step. A step re-run after resume gets a
    /// fresh entry; earlier entries stay as history.
    fn start_step(&mut self, step_id: &str) {
        self.steps.push(StepCheckpoint {
            step_id: step_id.to_string(),
            started_at: Utc::now(),
            ended_at: None,
            ok: None,
        });
    }

    fn end_step(&mut self, step_id: &str, ok: bool) {
        let now = Utc::now();
        match self
            .steps
            .iter_mut()
            .rev()
            .find(|step| step.step_id == step_id && step.ended_at.is_none())
        {
            Some(step) => {
                step.ended_at = Some(now);
                step.ok = Some(ok);
            }
            None => self.steps.push(StepCheckpoint {
                step_id: step_id.to_string(),
                started_at: now,
                ended_at: Some(now),
                ok: Some(ok),
            }),
        }
        if ok {
            self.last_success_step_id = Some(step_id.to_string());
        }
    }
}

/// Durable run progress
///
/// Every method is a whole read-modify-write of the record.
pub trait CheckpointStore: Send + Sync {
    /// Load the current record, if one was written.
    fn load(&self) -> Result<Option<CheckpointRecord>>;

    /// Mark the run as (re)started. Existing step records are kept so a
    /// restarted run can still resume.
    fn record_run_start(&self, run_id: &str) -> Result<()>;

    fn record_step_start(&self, step_id: &str) -> Result<()>;

    /// Close the step; on success it becomes the last successful step.
    fn record_step_end(&self, step_id: &str, ok: bool) -> Result<()>;

    fn record_run_end(&self, status: RunStatus) -> Result<()>;

    fn last_success_step_id(&self) -> Result<Option<String>> {
        Ok(self.load()?.and_then(|record| record.last_success_step_id))
    }
}

fn apply_run_start(current: Option<CheckpointRecord>, run_id: &str) -> CheckpointRecord {
    match current {
        Some(mut record) => {
            record.run_id = run_id.to_string();
            record.run_started_at = Utc::now();
            record.run_ended_at = None;
            record.status = RunStatus::Running;
            record
        }
        None => CheckpointRecord::new(run_id),
    }
}

fn apply_run_end(record: &mut CheckpointRecord, status: RunStatus) {
    record.run_ended_at = Some(Utc::now());
    record.status = status;
}

/// Checkpoint persisted as one JSON document
pub struct FileCheckpointStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles
    lock: Mutex<()>,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Option<CheckpointRecord>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Write to a sibling temp file and rename it over the checkpoint.
    fn write(&self, record: &CheckpointRecord) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;
        let mut file = tempfile::NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(&mut file, record)?;
        file.write_all(b"\n")?;
        file.as_file().sync_all()?;
        file.persist(&self.path).map_err(|e| e.error)?;
        debug!("Checkpoint written to {}", self.path.display());
        Ok(())
    }

    fn update(&self, apply: impl FnOnce(Option<CheckpointRecord>) -> CheckpointRecord) -> Result<()> {
        let _guard = self.lock.lock();
        let record = apply(self.read()?);
        self.write(&record)
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self) -> Result<Option<CheckpointRecord>> {
        let _guard = self.lock.lock();
        self.read()
    }

    fn record_run_start(&self, run_id: &str) -> Result<()> {
        self.update(|current| apply_run_start(current, run_id))
    }

    fn record_step_start(&self, step_id: &str) -> Result<()> {
        self.update(|current| {
            let mut record = current.unwrap_or_else(|| CheckpointRecord::new(""));
            record.start_step(step_id);
            record
        })
    }

    fn record_step_end(&self, step_id: &str, ok: bool) -> Result<()> {
        self.update(|current| {
            let mut record = current.unwrap_or_else(|| CheckpointRecord::new(""));
            record.end_step(step_id, ok);
            record
        })
    }

    fn record_run_end(&self, status: RunStatus) -> Result<()> {
        self.update(|current| {
            let mut record = current.unwrap_or_else(|| CheckpointRecord::new(""));
            apply_run_end(&mut record, status);
            record
        })
    }
}

/// In-memory checkpoint, for tests and throwaway runs
#[derive(Default)]
pub struct MemoryCheckpointStore {
    record: Mutex<Option<CheckpointRecord>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store, e.g. to simulate a previous run.
    pub fn with_record(record: CheckpointRecord) -> Self {
        Self {
            record: Mutex::new(Some(record)),
        }
    }

    fn update(&self, apply: impl FnOnce(&mut CheckpointRecord)) {
        let mut slot = self.record.lock();
        let record = slot.get_or_insert_with(|| CheckpointRecord::new(""));
        apply(record);
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn load(&self) -> Result<Option<CheckpointRecord>> {
        Ok(self.record.lock().clone())
    }

    fn record_run_start(&self, run_id: &str) -> Result<()> {
        let mut slot = self.record.lock();
        *slot = Some(apply_run_start(slot.take(), run_id));
        Ok(())
    }

    fn record_step_start(&self, step_id: &str) -> Result<()> {
        self.update(|record| record.start_step(step_id));
        Ok(())
    }

    fn record_step_end(&self, step_id: &str, ok: bool) -> Result<()> {
        self.update(|record| record.end_step(step_id, ok));
        Ok(())
    }

    fn record_run_end(&self, status: RunStatus) -> Result<()> {
        self.update(|record| apply_run_end(record, status));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(store: &dyn CheckpointStore) {
        store.record_run_start("run-1").unwrap();
        store.record_step_start("a").unwrap();
        store.record_step_end("a", true).unwrap();
        store.record_step_start("b").unwrap();
        store.record_step_end("b", false).unwrap();
        store.record_run_end(RunStatus::Failed).unwrap();
    }

    #[test]
    fn test_failed_step_keeps_previous_marker() {
        let store = MemoryCheckpointStore::new();
        exercise(&store);

        let record = store.load().unwrap().unwrap();
        assert_eq!(record.last_success_step_id.as_deref(), Some("a"));
        assert_eq!(record.status, RunStatus::Failed);
        assert_eq!(record.steps.len(), 2);
        assert_eq!(record.steps[1].ok, Some(false));
        assert!(record.run_ended_at.is_some());
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoints.json");
        exercise(&FileCheckpointStore::new(&path));

        let reopened = FileCheckpointStore::new(&path);
        let record = reopened.load().unwrap().unwrap();
        assert_eq!(record.run_id, "run-1");
        assert_eq!(reopened.last_success_step_id().unwrap().as_deref(), Some("a"));

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["status"], "failed");
        assert_eq!(raw["steps"][0]["step_id"], "a");
    }

    #[test]
    fn test_run_start_preserves_steps() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("checkpoints.json"));
        exercise(&store);

        store.record_run_start("run-1").unwrap();

        let record = store.load().unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Running);
        assert!(record.run_ended_at.is_none());
        assert_eq!(record.steps.len(), 2);
        assert_eq!(record.last_success_step_id.as_deref(), Some("a"));
    }

    #[test]
    fn test_missing_file_has_no_marker() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("none.json"));
        assert!(store.load().unwrap().is_none());
        assert!(store.last_success_step_id().unwrap().is_none());
    }

    #[test]
    fn test_rerun_step_gets_new_entry() {
        let mut record = CheckpointRecord::new("run-1");
        record.start_step("a");
        record.end_step("a", false);
        record.start_step("a");
        record.end_step("a", true);

        assert_eq!(record.steps.len(), 2);
        assert_eq!(record.steps[0].ok, Some(false));
        assert_eq!(record.steps[1].ok, Some(true));
    }
}
