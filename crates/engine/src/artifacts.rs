//! Run artifact directories

use chrono::{DateTime, SecondsFormat, Utc};
use std::path::{Path, PathBuf};
use tracing::info;

use waypoint_common::Result;

const TRACE_LOG: &str = "step_traces.jsonl";
const CHECKPOINT_FILE: &str = "checkpoints.json";
const DECISION_LOG: &str = "decisions.jsonl";

/// Directory layout owned by one run
#[derive(Debug, Clone, PartialEq)]
pub struct RunArtifacts {
    pub run_id: String,
    pub run_dir: PathBuf,
    pub evidence_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub review_dir: PathBuf,
    pub created_at: DateTime<Utc>,
}

impl RunArtifacts {
    fn at(run_dir: PathBuf, run_id: String, created_at: DateTime<Utc>) -> Result<Self> {
        let artifacts = Self {
            run_id,
            evidence_dir: run_dir.join("evidence"),
            logs_dir: run_dir.join("logs"),
            review_dir: run_dir.join("review"),
            run_dir,
            created_at,
        };
        std::fs::create_dir_all(&artifacts.evidence_dir)?;
        std::fs::create_dir_all(&artifacts.logs_dir)?;
        std::fs::create_dir_all(&artifacts.review_dir)?;
        Ok(artifacts)
    }

    /// Append-only step trace log
    pub fn trace_log_path(&self) -> PathBuf {
        self.logs_dir.join(TRACE_LOG)
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.run_dir.join(CHECKPOINT_FILE)
    }

    /// Append-only decision log written in verification mode
    pub fn decision_log_path(&self) -> PathBuf {
        self.review_dir.join(DECISION_LOG)
    }
}

/// Creates and reattaches run folders under a base directory
#[derive(Debug, Clone)]
pub struct ArtifactManager {
    base_dir: PathBuf,
}

impl ArtifactManager {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Create `<base>/<timestamp>_<run_id>` with its evidence, logs and
    /// review subdirectories. The run id defaults to `run-<timestamp>`.
    pub fn create_run_folder(&self, run_id: Option<&str>) -> Result<RunArtifacts> {
        let created_at = Utc::now();
        let stamp = safe_timestamp(&created_at);
        let run_id = run_id
            .map(str::to_string)
            .unwrap_or_else(|| format!("run-{}", stamp));
        let run_dir = absolute(&self.base_dir)?.join(format!("{}_{}", stamp, run_id));

        let artifacts = RunArtifacts::at(run_dir, run_id, created_at)?;
        info!("Created run folder {}", artifacts.run_dir.display());
        Ok(artifacts)
    }

    /// Reattach to an existing run folder, recreating any missing
    /// subdirectory.
    pub fn load_run_folder(&self, run_dir: &Path, run_id: &str) -> Result<RunArtifacts> {
        RunArtifacts::at(absolute(run_dir)?, run_id.to_string(), Utc::now())
    }
}

/// RFC 3339 with millisecond precision, `:` and `.` replaced so it is safe
/// in a file name.
fn safe_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-")
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// Run id encoded in a folder name created by [`ArtifactManager`]
pub fn run_id_from_dir(run_dir: &Path) -> Option<String> {
    let name = run_dir.file_name()?.to_str()?;
    let (_, run_id) = name.split_once('_')?;
    (!run_id.is_empty()).then(|| run_id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_create_run_folder_layout() {
        let base = tempfile::tempdir().unwrap();
        let manager = ArtifactManager::new(base.path());

        let artifacts = manager.create_run_folder(Some("nightly")).unwrap();

        assert_eq!(artifacts.run_id, "nightly");
        assert!(artifacts.evidence_dir.is_dir());
        assert!(artifacts.logs_dir.is_dir());
        assert!(artifacts.review_dir.is_dir());
        assert_eq!(artifacts.trace_log_path(), artifacts.logs_dir.join("step_traces.jsonl"));
        assert_eq!(artifacts.checkpoint_path(), artifacts.run_dir.join("checkpoints.json"));
        assert_eq!(artifacts.decision_log_path(), artifacts.review_dir.join("decisions.jsonl"));
        assert_eq!(run_id_from_dir(&artifacts.run_dir).as_deref(), Some("nightly"));
    }

    #[test]
    fn test_default_run_id_uses_timestamp() {
        let base = tempfile::tempdir().unwrap();
        let artifacts = ArtifactManager::new(base.path()).create_run_folder(None).unwrap();
        assert!(artifacts.run_id.starts_with("run-"));
        assert!(!artifacts.run_id.contains(':'));
    }

    #[test]
    fn test_safe_timestamp() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(safe_timestamp(&at), "2024-03-09T14-05-07-000Z");
    }

    #[test]
    fn test_load_recreates_missing_dirs() {
        let base = tempfile::tempdir().unwrap();
        let run_dir = base.path().join("2024-03-09T14-05-07-000Z_nightly");
        std::fs::create_dir_all(run_dir.join("logs")).unwrap();

        let artifacts = ArtifactManager::new(base.path())
            .load_run_folder(&run_dir, "nightly")
            .unwrap();

        assert!(artifacts.review_dir.is_dir());
        assert_eq!(artifacts.run_dir, run_dir);
    }
}
