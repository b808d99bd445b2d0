//! Desktop driver backed by an out-of-process UI automation service
//!
//! The backend does its own ladder resolution and assertion evaluation and
//! answers each action with a finished trace. Failures come back as RPC
//! errors whose `data.trace` holds the partial trace.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use waypoint_common::{
    methods, ActionOutcome, Assertion, BackendCommand, BackendProcess, DriverKind, Error,
    ExtractField, Result, RpcChannel, StepTrace, TraceContext,
};

use crate::config::DesktopDriverConfig;
use crate::driver::{ActionRequest, Driver};

/// Desktop automation driver
pub struct DesktopDriver {
    config: DesktopDriverConfig,
    process: Mutex<Option<BackendProcess>>,
    channel: RwLock<Option<Arc<RpcChannel>>>,
}

impl DesktopDriver {
    pub fn new(config: DesktopDriverConfig) -> Self {
        Self {
            config,
            process: Mutex::new(None),
            channel: RwLock::new(None),
        }
    }

    /// Driver bound to an already connected channel. `start` and `stop` do
    /// not manage any process in this mode.
    pub fn with_channel(channel: Arc<RpcChannel>) -> Self {
        Self {
            config: DesktopDriverConfig::default(),
            process: Mutex::new(None),
            channel: RwLock::new(Some(channel)),
        }
    }

    fn channel(&self) -> Result<Arc<RpcChannel>> {
        self.channel
            .read()
            .clone()
            .ok_or_else(|| Error::NotStarted("desktop backend".to_string()))
    }

    /// `python -m <module>` with the configured entries ahead of any
    /// inherited PYTHONPATH.
    fn command(&self) -> Result<BackendCommand> {
        let cwd = std::env::current_dir()?;
        let mut entries: Vec<PathBuf> = self
            .config
            .python_path
            .iter()
            .map(|entry| cwd.join(entry))
            .collect();
        if let Some(existing) = std::env::var_os("PYTHONPATH") {
            entries.extend(std::env::split_paths(&existing));
        }
        let python_path = std::env::join_paths(entries)
            .map_err(|e| Error::InvalidConfig(format!("python_path: {}", e)))?;

        Ok(BackendCommand::new(&self.config.python_executable)
            .arg("-m")
            .arg(&self.config.module)
            .env("PYTHONPATH", python_path.to_string_lossy()))
    }

    async fn call_trace(&self, request: &ActionRequest, method: &str, params: Value) -> Result<StepTrace> {
        let ctx = request.trace_context();
        let result = self.channel()?.call(method, params).await?;
        into_trace(ctx, result)
    }

    fn target_params(&self, request: &ActionRequest) -> Result<Value> {
        let target = request.require_target()?;
        Ok(json!({
            "run_id": request.run_id,
            "step_id": request.step_id,
            "target": target,
            "retry": request.retry,
            "timeout_ms": request.timeout_ms,
            "capture_screenshots": request.capture_screenshots,
        }))
    }

    async fn set_value_via(&self, request: &ActionRequest, value: &str) -> Result<StepTrace> {
        let mut params = self.target_params(request)?;
        params["value"] = json!(value);
        self.call_trace(request, methods::SET_VALUE, params).await
    }

    /// Resolve the target without acting on it.
    pub async fn resolve(&self, request: &ActionRequest) -> Result<Value> {
        let target = request.require_target()?;
        self.channel()?
            .call(
                methods::TARGET_RESOLVE,
                json!({ "target": target, "timeout_ms": request.timeout_ms }),
            )
            .await
    }
}

/// Turn a backend result into a trace. Action methods answer with a trace
/// (bare or under `trace`); utility methods answer with a plain object that
/// is kept as the trace value.
fn into_trace(ctx: TraceContext, result: Value) -> Result<StepTrace> {
    let result = match result {
        Value::Object(mut map) if map.contains_key("trace") => map.remove("trace").unwrap_or_default(),
        other => other,
    };
    if result.get("step_id").is_some() && result.get("started_at").is_some() {
        return Ok(serde_json::from_value(result)?);
    }

    let screenshot = result.get("path").and_then(Value::as_str).map(PathBuf::from);
    Ok(ctx.succeeded(ActionOutcome {
        after_screenshot_path: screenshot,
        value: Some(result),
        ..Default::default()
    }))
}

#[async_trait]
impl Driver for DesktopDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Desktop
    }

    async fn start(&self) -> Result<()> {
        if self.channel.read().is_some() {
            return Ok(());
        }
        let mut process = self.process.lock().await;
        if process.is_some() {
            return Ok(());
        }

        let command = self.command()?;
        let backend = BackendProcess::spawn("desktop", &command, self.config.request_timeout())?;
        let ready = backend
            .wait_ready(methods::PING, self.config.spawn_timeout())
            .await;
        let pong = match ready {
            Ok(pong) => pong,
            Err(e) => {
                let mut backend = backend;
                backend.stop().await;
                return Err(e);
            }
        };
        info!("Desktop backend started: {}", pong);

        *self.channel.write() = Some(backend.channel());
        *process = Some(backend);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut process = self.process.lock().await;
        if let Some(mut backend) = process.take() {
            self.channel.write().take();
            let code = backend.stop().await;
            debug!("Desktop backend stopped with code {:?}", code);
        }
        Ok(())
    }

    async fn ping(&self) -> Result<Value> {
        self.channel()?.call(methods::PING, json!({})).await
    }

    async fn capabilities(&self) -> Result<Value> {
        self.channel()?.call(methods::CAPABILITIES, json!({})).await
    }

    async fn begin_run(&self, run_id: &str, artifact_dir: &Path) -> Result<()> {
        self.channel()?
            .call(
                methods::RUN_BEGIN,
                json!({ "run_id": run_id, "artifact_dir": artifact_dir }),
            )
            .await?;
        Ok(())
    }

    async fn end_run(&self, run_id: &str) -> Result<()> {
        self.channel()?
            .call(methods::RUN_END, json!({ "run_id": run_id }))
            .await?;
        Ok(())
    }

    async fn click(&self, request: &ActionRequest) -> Result<StepTrace> {
        let params = self.target_params(request)?;
        self.call_trace(request, methods::CLICK, params).await
    }

    async fn set_value(&self, request: &ActionRequest, value: &str) -> Result<StepTrace> {
        self.set_value_via(request, value).await
    }

    async fn paste(&self, request: &ActionRequest, text: &str) -> Result<StepTrace> {
        let mut params = self.target_params(request)?;
        params["text"] = json!(text);
        self.call_trace(request, methods::PASTE_TEXT, params).await
    }

    async fn fill(&self, request: &ActionRequest, value: &str) -> Result<StepTrace> {
        self.set_value_via(request, value).await
    }

    async fn type_text(&self, request: &ActionRequest, value: &str) -> Result<StepTrace> {
        self.set_value_via(request, value).await
    }

    async fn extract(&self, request: &ActionRequest, field: ExtractField) -> Result<StepTrace> {
        let mut params = self.target_params(request)?;
        params["field"] = json!(field);
        self.call_trace(request, methods::EXTRACT_VALUE, params).await
    }

    async fn assert_check(&self, request: &ActionRequest, assertions: &[Assertion]) -> Result<StepTrace> {
        let assertions: Vec<Assertion> = assertions
            .iter()
            .map(|assertion| assertion.for_driver(&DriverKind::Desktop))
            .collect();
        let params = json!({
            "run_id": request.run_id,
            "step_id": request.step_id,
            "assertions": assertions,
        });
        self.call_trace(request, methods::ASSERT_CHECK, params).await
    }

    async fn screenshot(&self, request: &ActionRequest, name: Option<&str>) -> Result<StepTrace> {
        let params = json!({
            "run_id": request.run_id,
            "step_id": request.step_id,
            "name": name,
        });
        self.call_trace(request, methods::SCREENSHOT, params).await
    }

    async fn focus_window(&self, request: &ActionRequest) -> Result<StepTrace> {
        let scope = request
            .target
            .as_ref()
            .and_then(|target| target.scope.as_ref())
            .ok_or_else(|| Error::MissingTarget(request.step_id.clone()))?;
        let params = json!({
            "run_id": request.run_id,
            "step_id": request.step_id,
            "scope": scope,
        });
        self.call_trace(request, methods::WINDOW_FOCUS, params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_result_becomes_value() {
        let ctx = TraceContext::begin("run-1", "focus");
        let trace = into_trace(ctx, json!({"ok": true, "window": {"title": "Untitled - Notepad"}})).unwrap();
        assert!(trace.ok);
        assert_eq!(trace.value.unwrap()["window"]["title"], "Untitled - Notepad");
    }

    #[test]
    fn test_wrapped_trace_is_unwrapped() {
        let ctx = TraceContext::begin("run-1", "ignored");
        let trace = into_trace(
            ctx,
            json!({"trace": {
                "run_id": "run-1",
                "step_id": "click-save",
                "started_at": "2024-01-01T00:00:00Z",
                "ended_at": "2024-01-01T00:00:01Z",
                "ok": true,
                "match_attempts": [{"rung_index": 0, "kind": "uia", "matched_count": 1, "duration_ms": 3, "ok": true}]
            }}),
        )
        .unwrap();
        assert_eq!(trace.step_id, "click-save");
        assert_eq!(trace.match_attempts.len(), 1);
    }

    #[test]
    fn test_screenshot_path_is_recorded() {
        let ctx = TraceContext::begin("run-1", "shot");
        let trace = into_trace(ctx, json!({"path": "/tmp/shot.png"})).unwrap();
        assert_eq!(trace.after_screenshot_path, Some(PathBuf::from("/tmp/shot.png")));
    }

    #[test]
    fn test_command_prepends_python_path() {
        let driver = DesktopDriver::new(DesktopDriverConfig::default());
        let command = driver.command().unwrap();
        assert_eq!(command.program, "python");
        assert_eq!(command.args, vec!["-m", "desktop_runner.server"]);
        let (key, value) = &command.envs[0];
        assert_eq!(key, "PYTHONPATH");
        assert!(value.contains("desktop-runner"));
    }

    #[tokio::test]
    async fn test_calls_before_start_fail() {
        let driver = DesktopDriver::new(DesktopDriverConfig::default());
        let err = driver.ping().await.unwrap_err();
        assert!(matches!(err, Error::NotStarted(_)));
    }
}
