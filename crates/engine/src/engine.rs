//! Runtime engine
//!
//! Executes a workflow one step at a time against the registered drivers.
//! Steps run strictly in order; a step is complete only once its
//! post-assertions have run and every trace it produced is in the log.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use waypoint_common::{
    Assertion, DriverKind, Error, Result, StepTrace, WorkflowDefinition, WorkflowStep,
};
use waypoint_drivers::{ActionRequest, Driver, Drivers};

use crate::artifacts::RunArtifacts;
use crate::checkpoint::{CheckpointStore, FileCheckpointStore, RunStatus};
use crate::input::{resolve_input, Inputs};
use crate::trace_log::TraceLog;

/// Step deadline used when neither the step nor the configuration sets one
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(30);

/// What a finished run did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub run_id: String,
    pub executed: Vec<String>,
    pub skipped: Vec<String>,
}

pub struct RuntimeEngine {
    run: RunArtifacts,
    drivers: Drivers,
    checkpoints: Arc<dyn CheckpointStore>,
    trace_log: TraceLog,
    default_timeout: Duration,
}

impl RuntimeEngine {
    /// Engine writing its checkpoint and trace log into the run folder
    pub fn new(run: RunArtifacts, drivers: Drivers) -> Self {
        let checkpoints = Arc::new(FileCheckpointStore::new(run.checkpoint_path()));
        let trace_log = TraceLog::new(run.trace_log_path());
        Self {
            run,
            drivers,
            checkpoints,
            trace_log,
            default_timeout: DEFAULT_STEP_TIMEOUT,
        }
    }

    pub fn with_checkpoint_store(mut self, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = checkpoints;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn run_artifacts(&self) -> &RunArtifacts {
        &self.run
    }

    pub fn run_id(&self) -> &str {
        &self.run.run_id
    }

    pub fn checkpoints(&self) -> &dyn CheckpointStore {
        self.checkpoints.as_ref()
    }

    pub fn trace_log(&self) -> &TraceLog {
        &self.trace_log
    }

    /// Run every step in order, or only the steps after the last checkpointed
    /// success when resuming.
    pub async fn run_workflow(
        &self,
        workflow: &WorkflowDefinition,
        inputs: &Inputs,
        resume: bool,
    ) -> Result<RunSummary> {
        self.begin(workflow).await?;

        let (skipped, pending) = match self.remaining_steps(workflow, resume) {
            Ok(split) => split,
            Err(e) => {
                self.finish(workflow, RunStatus::Failed).await;
                return Err(e);
            }
        };

        let mut summary = RunSummary {
            run_id: self.run.run_id.clone(),
            skipped: skipped.iter().map(|step| step.id.clone()).collect(),
            executed: Vec::new(),
        };

        for step in pending {
            if let Err(e) = self.run_step(step, inputs).await {
                error!("Run {} failed at step {}: {}", self.run.run_id, step.id, e);
                self.finish(workflow, RunStatus::Failed).await;
                return Err(e);
            }
            summary.executed.push(step.id.clone());
        }

        self.finish(workflow, RunStatus::Succeeded).await;
        info!(
            "Run {} succeeded ({} executed, {} skipped)",
            self.run.run_id,
            summary.executed.len(),
            summary.skipped.len()
        );
        Ok(summary)
    }

    /// Record the run start and announce the run to every driver the
    /// workflow uses.
    pub async fn begin(&self, workflow: &WorkflowDefinition) -> Result<()> {
        self.checkpoints.record_run_start(&self.run.run_id)?;
        info!("Run {} started for workflow {}", self.run.run_id, workflow.id);

        for driver in self.used_drivers(workflow) {
            if let Err(e) = driver.begin_run(&self.run.run_id, &self.run.evidence_dir).await {
                self.finish(workflow, RunStatus::Failed).await;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Close the run on the drivers and record its terminal status. Driver
    /// failures here are logged, never returned.
    pub async fn finish(&self, workflow: &WorkflowDefinition, status: RunStatus) {
        for driver in self.used_drivers(workflow) {
            if let Err(e) = driver.end_run(&self.run.run_id).await {
                warn!("Failed to end run on {} driver: {}", driver.kind(), e);
            }
        }
        if let Err(e) = self.checkpoints.record_run_end(status) {
            warn!("Failed to record end of run {}: {}", self.run.run_id, e);
        }
    }

    /// Split the workflow into steps skipped by resume and steps to run.
    ///
    /// A checkpointed step id that the workflow no longer contains degrades
    /// to a full run.
    pub fn remaining_steps<'a>(
        &self,
        workflow: &'a WorkflowDefinition,
        resume: bool,
    ) -> Result<(&'a [WorkflowStep], &'a [WorkflowStep])> {
        if !resume {
            return Ok(workflow.steps.split_at(0));
        }
        let Some(last) = self.checkpoints.last_success_step_id()? else {
            info!("No checkpointed step for run {}; running all steps", self.run.run_id);
            return Ok(workflow.steps.split_at(0));
        };
        match workflow.position(&last) {
            Some(index) => {
                info!("Resuming run {} after step {}", self.run.run_id, last);
                Ok(workflow.steps.split_at(index + 1))
            }
            None => {
                warn!(
                    "Checkpointed step {} is not in workflow {}; running all steps",
                    last, workflow.id
                );
                Ok(workflow.steps.split_at(0))
            }
        }
    }

    /// Execute exactly one step under its deadline and checkpoint the outcome.
    pub async fn run_step(&self, step: &WorkflowStep, inputs: &Inputs) -> Result<()> {
        info!("Step {} ({} {}) started", step.id, step.driver, step.action);
        self.checkpoints.record_step_start(&step.id)?;

        let deadline = step
            .timeouts
            .step_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout);

        // On timeout the in-flight driver call is abandoned, not cancelled.
        let result = match tokio::time::timeout(deadline, self.execute_step(step, inputs)).await {
            Ok(result) => result,
            Err(_) => Err(Error::StepTimeout {
                step_id: step.id.clone(),
                timeout_ms: deadline.as_millis() as u64,
            }),
        };

        if let Err(e) = self.checkpoints.record_step_end(&step.id, result.is_ok()) {
            // A success that was not checkpointed cannot be resumed from.
            if result.is_ok() {
                return Err(e);
            }
            warn!("Failed to checkpoint end of step {}: {}", step.id, e);
        }
        match &result {
            Ok(()) => info!("Step {} succeeded", step.id),
            Err(e) => warn!("Step {} failed: {}", step.id, e),
        }
        result
    }

    async fn execute_step(&self, step: &WorkflowStep, inputs: &Inputs) -> Result<()> {
        let driver = self.drivers.get(&step.driver)?;
        let request = self.request_for(step);

        if !step.pre_assert.is_empty() {
            let assertions = normalize(&step.pre_assert, &step.driver);
            self.record(step, driver.assert_check(&request, &assertions).await)?;
        }

        let outcome = self.dispatch(driver.as_ref(), step, &request, inputs).await;
        self.record(step, outcome)?;

        if !step.post_assert.is_empty() {
            let assertions = normalize(&step.post_assert, &step.driver);
            self.record(step, driver.assert_check(&request, &assertions).await)?;
        }
        Ok(())
    }

    fn request_for(&self, step: &WorkflowStep) -> ActionRequest {
        ActionRequest {
            run_id: self.run.run_id.clone(),
            step_id: step.id.clone(),
            target: step.scoped_target(),
            retry: step.retry.clone(),
            timeout_ms: step.wait_timeout_ms(),
            capture_screenshots: step.params.capture_screenshots,
        }
    }

    /// Map the step's action name onto one driver call.
    async fn dispatch(
        &self,
        driver: &dyn Driver,
        step: &WorkflowStep,
        request: &ActionRequest,
        inputs: &Inputs,
    ) -> Result<StepTrace> {
        match step.action.as_str() {
            "click" => driver.click(request).await,
            "paste" => driver.paste(request, &required_input(step, inputs)?).await,
            "fill" => driver.fill(request, &required_input(step, inputs)?).await,
            "type" => driver.type_text(request, &required_input(step, inputs)?).await,
            "set_value" => driver.set_value(request, &required_input(step, inputs)?).await,
            "select" => driver.select(request, &required_input(step, inputs)?).await,
            "extract" => {
                driver
                    .extract(request, step.params.field.unwrap_or_default())
                    .await
            }
            "assert" => {
                let assertions = step.params.assertions.as_ref().unwrap_or(&step.post_assert);
                driver
                    .assert_check(request, &normalize(assertions, &step.driver))
                    .await
            }
            "screenshot" => driver.screenshot(request, step.params.name.as_deref()).await,
            "navigate" => {
                let url = match (&step.input, &step.params.url) {
                    (Some(input), _) => resolve_input(input, inputs)?,
                    (None, Some(url)) => url.clone(),
                    (None, None) => return Err(Error::MissingInput(step.id.clone())),
                };
                driver.navigate(request, &url).await
            }
            "wait" | "wait_for" => driver.wait(request, wait_duration(step, inputs)?).await,
            "focus_window" => driver.focus_window(request).await,
            other => Err(Error::UnsupportedAction {
                driver: step.driver.to_string(),
                action: other.to_string(),
            }),
        }
    }

    /// Append the trace of one driver call. A trace marked failed becomes a
    /// step failure; an error carrying a partial trace has it flushed first.
    fn record(&self, step: &WorkflowStep, result: Result<StepTrace>) -> Result<StepTrace> {
        match result {
            Ok(trace) => {
                self.trace_log.append(&trace)?;
                debug!("Trace appended for step {} (ok={})", step.id, trace.ok);
                if trace.ok {
                    return Ok(trace);
                }
                Err(Error::StepFailed {
                    step_id: step.id.clone(),
                    message: trace
                        .error
                        .clone()
                        .unwrap_or_else(|| format!("{} failed", step.action)),
                    trace: Box::new(trace),
                })
            }
            Err(e) => {
                if let Some(partial) = e.partial_trace() {
                    if let Err(log_err) = self.trace_log.append(&partial) {
                        warn!("Failed to flush partial trace for step {}: {}", step.id, log_err);
                    }
                }
                Err(e)
            }
        }
    }

    fn used_drivers(&self, workflow: &WorkflowDefinition) -> Vec<Arc<dyn Driver>> {
        let mut kinds: Vec<&DriverKind> = Vec::new();
        for step in &workflow.steps {
            if !kinds.contains(&&step.driver) {
                kinds.push(&step.driver);
            }
        }
        // Unknown drivers surface as step failures, not here.
        kinds
            .into_iter()
            .filter_map(|kind| self.drivers.get(kind).ok())
            .collect()
    }
}

fn normalize(assertions: &[Assertion], driver: &DriverKind) -> Vec<Assertion> {
    assertions.iter().map(|a| a.for_driver(driver)).collect()
}

fn required_input(step: &WorkflowStep, inputs: &Inputs) -> Result<String> {
    let input = step
        .input
        .as_ref()
        .ok_or_else(|| Error::MissingInput(step.id.clone()))?;
    resolve_input(input, inputs)
}

/// Explicit wait timeout, else the step input as milliseconds.
fn wait_duration(step: &WorkflowStep, inputs: &Inputs) -> Result<u64> {
    if let Some(ms) = step.timeouts.wait_timeout_ms {
        return Ok(ms);
    }
    let raw = required_input(step, inputs)?;
    raw.trim().parse().map_err(|_| {
        Error::InvalidWorkflow(format!(
            "step {} wait duration must be milliseconds, got {:?}",
            step.id, raw
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::ArtifactManager;
    use crate::checkpoint::{CheckpointRecord, MemoryCheckpointStore};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::path::Path;
    use waypoint_common::{ActionOutcome, ExtractField};

    /// Records every call as `<action>:<step>`; steps named `fail-*` return
    /// a failed trace.
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn trace(&self, action: &str, request: &ActionRequest) -> Result<StepTrace> {
            self.calls.lock().push(format!("{}:{}", action, request.step_id));
            let ctx = request.trace_context();
            if request.step_id.starts_with("fail") {
                return Ok(ctx.failed(
                    ActionOutcome::default(),
                    &Error::ActionFailed("button disabled".to_string()),
                ));
            }
            Ok(ctx.succeeded(ActionOutcome::default()))
        }
    }

    #[async_trait]
    impl Driver for Recorder {
        fn kind(&self) -> DriverKind {
            DriverKind::Web
        }

        async fn start(&self) -> Result<()> {
            Ok(())
        }

        async fn stop(&self) -> Result<()> {
            Ok(())
        }

        async fn ping(&self) -> Result<Value> {
            Ok(json!({"ok": true}))
        }

        async fn capabilities(&self) -> Result<Value> {
            Ok(json!({}))
        }

        async fn click(&self, request: &ActionRequest) -> Result<StepTrace> {
            request.require_target()?;
            self.trace("click", request)
        }

        async fn fill(&self, request: &ActionRequest, value: &str) -> Result<StepTrace> {
            self.trace(&format!("fill={}", value), request)
        }

        async fn navigate(&self, request: &ActionRequest, url: &str) -> Result<StepTrace> {
            self.trace(&format!("navigate={}", url), request)
        }

        async fn extract(&self, request: &ActionRequest, field: ExtractField) -> Result<StepTrace> {
            self.trace(&format!("extract={:?}", field), request)
        }

        async fn assert_check(&self, request: &ActionRequest, assertions: &[Assertion]) -> Result<StepTrace> {
            self.trace(&format!("assert{}", assertions.len()), request)
        }
    }

    fn engine(recorder: Arc<Recorder>) -> (RuntimeEngine, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let run = ArtifactManager::new(dir.path())
            .create_run_folder(Some("unit"))
            .unwrap();
        let engine = RuntimeEngine::new(run, Drivers::new().with(recorder))
            .with_checkpoint_store(Arc::new(MemoryCheckpointStore::new()));
        (engine, dir)
    }

    fn step(json: Value) -> WorkflowStep {
        serde_json::from_value(json).unwrap()
    }

    fn calls(recorder: &Recorder) -> Vec<String> {
        recorder.calls.lock().clone()
    }

    #[tokio::test]
    async fn test_fill_resolves_variable() {
        let recorder = Arc::new(Recorder::default());
        let (engine, _dir) = engine(recorder.clone());
        let inputs = HashMap::from([("user".to_string(), json!(" Alice "))]);

        engine
            .run_step(
                &step(json!({"id": "user", "driver": "web", "action": "fill",
                             "input": {"var": "user", "transform": "upper"}})),
                &inputs,
            )
            .await
            .unwrap();

        assert_eq!(calls(&recorder), vec!["fill= ALICE :user"]);
    }

    #[tokio::test]
    async fn test_missing_input_fails_before_driver() {
        let recorder = Arc::new(Recorder::default());
        let (engine, _dir) = engine(recorder.clone());

        let err = engine
            .run_step(&step(json!({"id": "x", "driver": "web", "action": "fill"})), &HashMap::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::MissingInput(_)));
        assert!(calls(&recorder).is_empty());
        let record = engine.checkpoints().load().unwrap().unwrap();
        assert_eq!(record.steps[0].ok, Some(false));
    }

    #[tokio::test]
    async fn test_navigate_falls_back_to_params_url() {
        let recorder = Arc::new(Recorder::default());
        let (engine, _dir) = engine(recorder.clone());

        engine
            .run_step(
                &step(json!({"id": "open", "driver": "web", "action": "navigate",
                             "params": {"url": "https://example.test"}})),
                &HashMap::new(),
            )
            .await
            .unwrap();

        assert_eq!(calls(&recorder), vec!["navigate=https://example.test:open"]);
    }

    #[tokio::test]
    async fn test_assert_action_uses_params_then_post_assert() {
        let recorder = Arc::new(Recorder::default());
        let (engine, _dir) = engine(recorder.clone());

        engine
            .run_step(
                &step(json!({"id": "check", "driver": "web", "action": "assert",
                             "params": {"assertions": [
                                 {"kind": "web_url_contains", "url_contains": "/a"},
                                 {"kind": "web_title_contains", "title_contains": "A"}
                             ]}})),
                &HashMap::new(),
            )
            .await
            .unwrap();
        engine
            .run_step(
                &step(json!({"id": "check2", "driver": "web", "action": "assert",
                             "post_assert": [{"kind": "web_url_contains", "url_contains": "/b"}]})),
                &HashMap::new(),
            )
            .await
            .unwrap();

        assert_eq!(
            calls(&recorder),
            vec!["assert2:check", "assert1:check2", "assert1:check2"]
        );
    }

    #[tokio::test]
    async fn test_failed_trace_fails_step_and_is_logged() {
        let recorder = Arc::new(Recorder::default());
        let (engine, _dir) = engine(recorder.clone());

        let err = engine
            .run_step(
                &step(json!({"id": "fail-extract", "driver": "web", "action": "extract"})),
                &HashMap::new(),
            )
            .await
            .unwrap_err();

        match err {
            Error::StepFailed { step_id, message, .. } => {
                assert_eq!(step_id, "fail-extract");
                assert_eq!(message, "Action failed: button disabled");
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(engine.trace_log().read_all().unwrap().len(), 1);
    }

    /// Memory store whose step-end writes always fail.
    struct UnwritableStepEnd(MemoryCheckpointStore);

    impl CheckpointStore for UnwritableStepEnd {
        fn load(&self) -> Result<Option<CheckpointRecord>> {
            self.0.load()
        }

        fn record_run_start(&self, run_id: &str) -> Result<()> {
            self.0.record_run_start(run_id)
        }

        fn record_step_start(&self, step_id: &str) -> Result<()> {
            self.0.record_step_start(step_id)
        }

        fn record_step_end(&self, _step_id: &str, _ok: bool) -> Result<()> {
            Err(Error::Io(std::io::Error::other("disk full")))
        }

        fn record_run_end(&self, status: RunStatus) -> Result<()> {
            self.0.record_run_end(status)
        }
    }

    #[tokio::test]
    async fn test_checkpoint_failure_keeps_step_error() {
        let recorder = Arc::new(Recorder::default());
        let (engine, _dir) = engine(recorder.clone());
        let engine = engine.with_checkpoint_store(Arc::new(UnwritableStepEnd(MemoryCheckpointStore::new())));

        let err = engine
            .run_step(
                &step(json!({"id": "fail-extract", "driver": "web", "action": "extract"})),
                &HashMap::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StepFailed { .. }), "{}", err);

        let err = engine
            .run_step(
                &step(json!({"id": "read", "driver": "web", "action": "extract"})),
                &HashMap::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)), "{}", err);
    }

    #[tokio::test]
    async fn test_unknown_action_and_driver() {
        let recorder = Arc::new(Recorder::default());
        let (engine, _dir) = engine(recorder.clone());

        let err = engine
            .run_step(&step(json!({"id": "a", "driver": "web", "action": "hover"})), &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedAction { ref action, .. } if action == "hover"));

        let err = engine
            .run_step(&step(json!({"id": "b", "driver": "desktop", "action": "click"})), &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedDriver(ref kind) if kind == "desktop"));
    }

    #[tokio::test]
    async fn test_wait_uses_input_milliseconds() {
        let recorder = Arc::new(Recorder::default());
        let (engine, _dir) = engine(recorder.clone());

        engine
            .run_step(&step(json!({"id": "pause", "driver": "web", "action": "wait", "input": 5})), &HashMap::new())
            .await
            .unwrap();
        let err = engine
            .run_step(&step(json!({"id": "bad", "driver": "web", "action": "wait", "input": "soon"})), &HashMap::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidWorkflow(_)));
        assert_eq!(engine.trace_log().read_all().unwrap().len(), 1);
    }

    #[test]
    fn test_remaining_steps_on_resume() {
        let dir = tempfile::tempdir().unwrap();
        let run = ArtifactManager::new(dir.path()).create_run_folder(Some("r")).unwrap();
        let mut record = CheckpointRecord::new("r");
        record.last_success_step_id = Some("b".to_string());
        let engine = RuntimeEngine::new(run, Drivers::new())
            .with_checkpoint_store(Arc::new(MemoryCheckpointStore::with_record(record)));
        let workflow = WorkflowDefinition::from_json(
            r#"{"id": "w", "steps": [
                {"id": "a", "driver": "web", "action": "click"},
                {"id": "b", "driver": "web", "action": "click"},
                {"id": "c", "driver": "web", "action": "click"}
            ]}"#,
        )
        .unwrap();

        let (skipped, pending) = engine.remaining_steps(&workflow, true).unwrap();
        assert_eq!(skipped.len(), 2);
        assert_eq!(pending[0].id, "c");

        let (skipped, pending) = engine.remaining_steps(&workflow, false).unwrap();
        assert!(skipped.is_empty());
        assert_eq!(pending.len(), 3);
    }

    #[tokio::test]
    async fn test_begin_announces_run_to_used_drivers() {
        #[derive(Default)]
        struct Lifecycle {
            seen: Mutex<Vec<String>>,
        }

        #[async_trait]
        impl Driver for Lifecycle {
            fn kind(&self) -> DriverKind {
                DriverKind::Desktop
            }
            async fn start(&self) -> Result<()> {
                Ok(())
            }
            async fn stop(&self) -> Result<()> {
                Ok(())
            }
            async fn ping(&self) -> Result<Value> {
                Ok(Value::Null)
            }
            async fn capabilities(&self) -> Result<Value> {
                Ok(Value::Null)
            }
            async fn begin_run(&self, run_id: &str, artifact_dir: &Path) -> Result<()> {
                self.seen
                    .lock()
                    .push(format!("begin {} {}", run_id, artifact_dir.ends_with("evidence")));
                Ok(())
            }
            async fn end_run(&self, run_id: &str) -> Result<()> {
                self.seen.lock().push(format!("end {}", run_id));
                Ok(())
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let run = ArtifactManager::new(dir.path()).create_run_folder(Some("life")).unwrap();
        let desktop = Arc::new(Lifecycle::default());
        let engine = RuntimeEngine::new(run, Drivers::new().with(desktop.clone()));
        let workflow = WorkflowDefinition::from_json(
            r#"{"id": "w", "steps": [{"id": "a", "driver": "desktop", "action": "hover"}]}"#,
        )
        .unwrap();

        assert!(engine.run_workflow(&workflow, &HashMap::new(), false).await.is_err());

        assert_eq!(*desktop.seen.lock(), vec!["begin life true", "end life"]);
        let record = engine.checkpoints().load().unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Failed);
    }
}
