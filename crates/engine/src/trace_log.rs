//! Append-only step trace log
//!
//! One JSON-encoded [`StepTrace`] per line, in call order.

use parking_lot::Mutex;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

use waypoint_common::{Result, StepTrace};

pub struct TraceLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl TraceLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one trace and flush it before returning.
    pub fn append(&self, trace: &StepTrace) -> Result<()> {
        let line = serde_json::to_string(trace)?;
        let _guard = self.lock.lock();
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", line)?;
        file.flush()?;
        Ok(())
    }

    /// Every trace in the log. Lines that fail to parse are skipped.
    pub fn read_all(&self) -> Result<Vec<StepTrace>> {
        let _guard = self.lock.lock();
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(std::fs::File::open(&self.path)?);
        let mut traces = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(trace) => traces.push(trace),
                Err(e) => warn!("Skipping unreadable trace line in {}: {}", self.path.display(), e),
            }
        }
        Ok(traces)
    }

    /// Most recent trace recorded for a step
    pub fn last_for_step(&self, step_id: &str) -> Result<Option<StepTrace>> {
        Ok(self
            .read_all()?
            .into_iter()
            .rev()
            .find(|trace| trace.step_id == step_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waypoint_common::{ActionOutcome, TraceContext};

    fn trace(step: &str, ok: bool) -> StepTrace {
        let ctx = TraceContext::begin("run-1", step);
        let mut trace = ctx.succeeded(ActionOutcome::default());
        trace.ok = ok;
        trace
    }

    #[test]
    fn test_append_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = TraceLog::new(dir.path().join("logs/step_traces.jsonl"));

        log.append(&trace("a", true)).unwrap();
        log.append(&trace("b", true)).unwrap();
        log.append(&trace("a", false)).unwrap();

        let steps: Vec<_> = log.read_all().unwrap().into_iter().map(|t| t.step_id).collect();
        assert_eq!(steps, vec!["a", "b", "a"]);
        let content = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(content.lines().count(), 3);
    }

    #[test]
    fn test_last_for_step() {
        let dir = tempfile::tempdir().unwrap();
        let log = TraceLog::new(dir.path().join("traces.jsonl"));
        log.append(&trace("a", true)).unwrap();
        log.append(&trace("a", false)).unwrap();

        let last = log.last_for_step("a").unwrap().unwrap();
        assert!(!last.ok);
        assert!(log.last_for_step("missing").unwrap().is_none());
    }

    #[test]
    fn test_garbage_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("traces.jsonl");
        std::fs::write(&path, "not json\n\n").unwrap();
        let log = TraceLog::new(&path);
        log.append(&trace("a", true)).unwrap();

        assert_eq!(log.read_all().unwrap().len(), 1);
    }
}
