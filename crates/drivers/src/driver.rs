//! The driver capability interface
//!
//! The engine only ever talks to `dyn Driver`. Each method returns the
//! [`StepTrace`] of exactly one call; a trace with `ok == false` is a failed
//! action, while `Err` is reserved for failures that produced no usable trace
//! (or carry a partial one, see [`Error::partial_trace`]).

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use waypoint_common::{
    ActionOutcome, Assertion, DriverKind, Error, ExtractField, Result, RetryPolicy, StepTrace,
    Target, TraceContext,
};

/// Arguments shared by every action call
#[derive(Debug, Clone, Default)]
pub struct ActionRequest {
    pub run_id: String,
    pub step_id: String,
    pub target: Option<Target>,
    pub retry: Option<RetryPolicy>,
    pub timeout_ms: Option<u64>,
    pub capture_screenshots: bool,
}

impl ActionRequest {
    pub fn new(run_id: impl Into<String>, step_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            step_id: step_id.into(),
            ..Default::default()
        }
    }

    pub fn with_target(mut self, target: Target) -> Self {
        self.target = Some(target);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// The target, or a validation failure naming the step.
    pub fn require_target(&self) -> Result<&Target> {
        self.target
            .as_ref()
            .ok_or_else(|| Error::MissingTarget(self.step_id.clone()))
    }

    pub fn trace_context(&self) -> TraceContext {
        TraceContext::begin(&self.run_id, &self.step_id)
    }
}

fn unsupported<T>(driver: DriverKind, action: &str) -> Result<T> {
    Err(Error::UnsupportedAction {
        driver: driver.to_string(),
        action: action.to_string(),
    })
}

/// A desktop or web automation surface
#[async_trait]
pub trait Driver: Send + Sync {
    fn kind(&self) -> DriverKind;

    /// Start the backing process or browser context. Idempotent.
    async fn start(&self) -> Result<()>;

    /// Tear down the backing process or browser context. Idempotent.
    async fn stop(&self) -> Result<()>;

    async fn ping(&self) -> Result<Value>;

    async fn capabilities(&self) -> Result<Value>;

    /// Announce a run and its artifact directory to the backend.
    async fn begin_run(&self, _run_id: &str, _artifact_dir: &Path) -> Result<()> {
        Ok(())
    }

    async fn end_run(&self, _run_id: &str) -> Result<()> {
        Ok(())
    }

    async fn click(&self, _request: &ActionRequest) -> Result<StepTrace> {
        unsupported(self.kind(), "click")
    }

    async fn set_value(&self, _request: &ActionRequest, _value: &str) -> Result<StepTrace> {
        unsupported(self.kind(), "set_value")
    }

    async fn paste(&self, _request: &ActionRequest, _text: &str) -> Result<StepTrace> {
        unsupported(self.kind(), "paste")
    }

    async fn fill(&self, _request: &ActionRequest, _value: &str) -> Result<StepTrace> {
        unsupported(self.kind(), "fill")
    }

    async fn type_text(&self, _request: &ActionRequest, _value: &str) -> Result<StepTrace> {
        unsupported(self.kind(), "type")
    }

    async fn select(&self, _request: &ActionRequest, _value: &str) -> Result<StepTrace> {
        unsupported(self.kind(), "select")
    }

    async fn extract(&self, _request: &ActionRequest, _field: ExtractField) -> Result<StepTrace> {
        unsupported(self.kind(), "extract")
    }

    /// Check every assertion in order and fold the result into one trace.
    async fn assert_check(&self, _request: &ActionRequest, _assertions: &[Assertion]) -> Result<StepTrace> {
        unsupported(self.kind(), "assert")
    }

    async fn screenshot(&self, _request: &ActionRequest, _name: Option<&str>) -> Result<StepTrace> {
        unsupported(self.kind(), "screenshot")
    }

    async fn navigate(&self, _request: &ActionRequest, _url: &str) -> Result<StepTrace> {
        unsupported(self.kind(), "navigate")
    }

    /// Bring the window named by the target's scope to the foreground.
    async fn focus_window(&self, _request: &ActionRequest) -> Result<StepTrace> {
        unsupported(self.kind(), "focus_window")
    }

    /// Pause for `duration_ms`.
    async fn wait(&self, request: &ActionRequest, duration_ms: u64) -> Result<StepTrace> {
        let ctx = request.trace_context();
        tokio::time::sleep(Duration::from_millis(duration_ms)).await;
        Ok(ctx.succeeded(ActionOutcome::default()))
    }
}

/// Drivers available to a run, keyed by kind
#[derive(Clone, Default)]
pub struct Drivers {
    drivers: HashMap<DriverKind, Arc<dyn Driver>>,
}

impl Drivers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, driver: Arc<dyn Driver>) -> Self {
        self.insert(driver);
        self
    }

    pub fn insert(&mut self, driver: Arc<dyn Driver>) {
        self.drivers.insert(driver.kind(), driver);
    }

    pub fn get(&self, kind: &DriverKind) -> Result<Arc<dyn Driver>> {
        self.drivers
            .get(kind)
            .cloned()
            .ok_or_else(|| Error::UnsupportedDriver(kind.to_string()))
    }

    pub fn kinds(&self) -> impl Iterator<Item = &DriverKind> {
        self.drivers.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    /// Start every driver, stopping the ones already started on failure.
    pub async fn start_all(&self) -> Result<()> {
        let mut started: Vec<&Arc<dyn Driver>> = Vec::new();
        for driver in self.drivers.values() {
            if let Err(e) = driver.start().await {
                for running in started {
                    if let Err(stop_err) = running.stop().await {
                        warn!("Failed to stop {} driver: {}", running.kind(), stop_err);
                    }
                }
                return Err(e);
            }
            info!("{} driver started", driver.kind());
            started.push(driver);
        }
        Ok(())
    }

    /// Stop every driver, logging failures instead of returning early.
    pub async fn stop_all(&self) {
        for driver in self.drivers.values() {
            if let Err(e) = driver.stop().await {
                warn!("Failed to stop {} driver: {}", driver.kind(), e);
            }
        }
    }
}
