//! Web driver
//!
//! Ladder resolution runs in-process against a [`PageSession`]; the browser
//! itself lives behind the Playwright bridge. Failed actions come back as
//! traces with `ok == false` rather than as errors.

mod assert;
pub mod bridge;
pub mod page;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use waypoint_common::{
    resolve_ladder, ActionOutcome, Assertion, AssertionKind, DriverKind, Error, ExtractField,
    LocatorProbe, Resolution, Result, StepTrace, Target, TargetRung, TargetScope,
};

use crate::config::WebDriverConfig;
use crate::driver::{ActionRequest, Driver};

pub use bridge::BridgePage;
pub use page::{PageLocator, PageSession, WebLocator, SELECTOR_KINDS};

/// Answers resolution queries from a live page
struct PageProbe<'a> {
    page: &'a dyn PageSession,
}

fn frame_of(scope: Option<&TargetScope>) -> Option<String> {
    scope.and_then(|scope| scope.frame.clone())
}

#[async_trait]
impl LocatorProbe for PageProbe<'_> {
    async fn check_scope(&self, scope: &TargetScope) -> Result<()> {
        if let Some(expected) = &scope.url_contains {
            if !self.page.url().await?.contains(expected.as_str()) {
                return Err(Error::ScopeMismatch(format!("URL does not match scope: {}", expected)));
            }
        }
        if let Some(expected) = &scope.title_contains {
            if !self.page.title().await?.contains(expected.as_str()) {
                return Err(Error::ScopeMismatch(format!("Title does not match scope: {}", expected)));
            }
        }
        Ok(())
    }

    async fn count(
        &self,
        rung: &TargetRung,
        scope: Option<&TargetScope>,
        timeout: Option<Duration>,
    ) -> Result<usize> {
        let locator = PageLocator {
            frame: frame_of(scope),
            locator: WebLocator::from_rung(rung)?,
        };
        if let Some(timeout) = timeout {
            self.page.wait_attached(&locator, timeout).await?;
        }
        self.page.count(&locator).await
    }
}

/// Resolve a target on the page, returning the winning locator.
pub(crate) async fn resolve_on_page(
    page: &dyn PageSession,
    target: &Target,
    timeout: Option<Duration>,
) -> Result<(PageLocator, Resolution)> {
    let resolution = resolve_ladder(&PageProbe { page }, target, timeout).await?;
    let rung = target
        .ladder
        .get(resolution.rung_index())
        .ok_or_else(|| Error::ActionFailed("resolved rung is outside the ladder".to_string()))?;
    let locator = PageLocator {
        frame: frame_of(target.scope.as_ref()),
        locator: WebLocator::from_rung(rung)?,
    };
    Ok((locator, resolution))
}

/// Element-level actions that need a resolved target
#[derive(Debug, Clone, Copy)]
enum ElementAction<'a> {
    Click,
    Fill(&'a str),
    Type(&'a str),
    Select(&'a str),
    Extract(ExtractField),
}

impl ElementAction<'_> {
    fn name(&self) -> &'static str {
        match self {
            ElementAction::Click => "click",
            ElementAction::Fill(_) => "fill",
            ElementAction::Type(_) => "type",
            ElementAction::Select(_) => "select",
            ElementAction::Extract(_) => "extract",
        }
    }
}

type Attempted = std::result::Result<ActionOutcome, (ActionOutcome, Error)>;

/// Browser automation driver
pub struct WebDriver {
    config: WebDriverConfig,
    page: RwLock<Option<Arc<dyn PageSession>>>,
    artifact_dir: RwLock<Option<PathBuf>>,
    launch: Mutex<()>,
}

impl WebDriver {
    pub fn new(config: WebDriverConfig) -> Self {
        Self {
            config,
            page: RwLock::new(None),
            artifact_dir: RwLock::new(None),
            launch: Mutex::new(()),
        }
    }

    /// Driver bound to an existing page session
    pub fn with_page(page: Arc<dyn PageSession>) -> Self {
        let driver = Self::new(WebDriverConfig::default());
        *driver.page.write() = Some(page);
        driver
    }

    fn page(&self) -> Result<Arc<dyn PageSession>> {
        self.page
            .read()
            .clone()
            .ok_or_else(|| Error::NotStarted("web browser".to_string()))
    }

    async fn capture(&self, page: &dyn PageSession, step_id: &str, suffix: &str) -> Result<Option<PathBuf>> {
        let dir = self.artifact_dir.read().clone();
        let Some(dir) = dir else {
            return Ok(None);
        };
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(format!("{}-{}.png", step_id, suffix));
        page.screenshot(&path).await?;
        Ok(Some(path))
    }

    async fn attempt(
        &self,
        page: &dyn PageSession,
        target: &Target,
        request: &ActionRequest,
        action: ElementAction<'_>,
    ) -> Attempted {
        let timeout = request.timeout();
        let (locator, resolution) = resolve_on_page(page, target, timeout)
            .await
            .map_err(|e| (ActionOutcome::default(), e))?;
        let outcome = resolution.into_outcome();

        let performed: Result<Option<Value>> = match action {
            ElementAction::Click => page.click(&locator, timeout).await.map(|_| None),
            ElementAction::Fill(value) => page.fill(&locator, value, timeout).await.map(|_| None),
            ElementAction::Type(value) => page.type_text(&locator, value, timeout).await.map(|_| None),
            ElementAction::Select(value) => page.select_option(&locator, value, timeout).await.map(|_| None),
            ElementAction::Extract(ExtractField::Text) => page
                .text_content(&locator, timeout)
                .await
                .map(|text| Some(Value::String(text))),
            ElementAction::Extract(ExtractField::Value) => page
                .input_value(&locator, timeout)
                .await
                .map(|value| Some(Value::String(value))),
        };

        match performed {
            Ok(value) => Ok(ActionOutcome { value, ..outcome }),
            Err(e) => Err((outcome, e)),
        }
    }

    /// Run an element action under the request's retry policy. Attempts
    /// from every try are kept in order.
    async fn run_element_action(&self, request: &ActionRequest, action: ElementAction<'_>) -> Result<StepTrace> {
        let page = self.page()?;
        let target = request.require_target()?.for_driver(&DriverKind::Web);
        let ctx = request.trace_context();
        let tries = request.retry.as_ref().map_or(1, |retry| retry.total_tries());

        let mut gathered = ActionOutcome::default();
        if request.capture_screenshots {
            match self.capture(page.as_ref(), &request.step_id, "before").await {
                Ok(path) => gathered.before_screenshot_path = path,
                Err(e) => return Ok(ctx.failed(gathered, &e)),
            }
        }

        let mut tried = 0u32;
        loop {
            match self.attempt(page.as_ref(), &target, request, action).await {
                Ok(outcome) => {
                    let mut done = gathered.merge(outcome);
                    if request.capture_screenshots {
                        match self.capture(page.as_ref(), &request.step_id, "after").await {
                            Ok(path) => done.after_screenshot_path = path,
                            Err(e) => return Ok(ctx.failed(done, &e)),
                        }
                    }
                    return Ok(ctx.succeeded(done));
                }
                Err((outcome, e)) => {
                    gathered = gathered.merge(outcome);
                    tried += 1;
                    if tried >= tries || e.is_transport() {
                        debug!("{} on step {} failed: {}", action.name(), request.step_id, e);
                        return Ok(ctx.failed(gathered, &e));
                    }
                    gathered = gathered.merge(ActionOutcome::with_attempts(e.match_attempts().to_vec()));
                    let delay = request
                        .retry
                        .as_ref()
                        .map_or(Duration::ZERO, |retry| retry.delay_for(tried - 1));
                    warn!(
                        "{} on step {} failed (try {}/{}), retrying in {:?}: {}",
                        action.name(),
                        request.step_id,
                        tried,
                        tries,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[async_trait]
impl Driver for WebDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Web
    }

    async fn start(&self) -> Result<()> {
        let _launch = self.launch.lock().await;
        if self.page.read().is_some() {
            return Ok(());
        }
        let bridge = BridgePage::launch(&self.config).await?;
        *self.page.write() = Some(Arc::new(bridge));
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let _launch = self.launch.lock().await;
        let page = self.page.write().take();
        if let Some(page) = page {
            page.close().await?;
            info!("Web browser closed");
        }
        Ok(())
    }

    async fn ping(&self) -> Result<Value> {
        let url = self.page()?.url().await?;
        Ok(json!({ "ok": true, "service": "waypoint-web", "version": waypoint_common::VERSION, "url": url }))
    }

    async fn capabilities(&self) -> Result<Value> {
        let assertions: Vec<&str> = [
            AssertionKind::WebExists,
            AssertionKind::WebVisible,
            AssertionKind::WebTextEquals,
            AssertionKind::WebTextContains,
            AssertionKind::WebValueEquals,
            AssertionKind::WebValueContains,
            AssertionKind::WebUrlEquals,
            AssertionKind::WebUrlContains,
            AssertionKind::WebTitleEquals,
            AssertionKind::WebTitleContains,
            AssertionKind::Not,
        ]
        .iter()
        .map(AssertionKind::as_str)
        .collect();
        Ok(json!({
            "playwright": true,
            "browser": self.config.browser.as_str(),
            "selectors": SELECTOR_KINDS,
            "assertions": assertions,
        }))
    }

    async fn begin_run(&self, run_id: &str, artifact_dir: &Path) -> Result<()> {
        debug!("Web run {} writes screenshots to {}", run_id, artifact_dir.display());
        *self.artifact_dir.write() = Some(artifact_dir.to_path_buf());
        Ok(())
    }

    async fn end_run(&self, _run_id: &str) -> Result<()> {
        self.artifact_dir.write().take();
        Ok(())
    }

    async fn click(&self, request: &ActionRequest) -> Result<StepTrace> {
        self.run_element_action(request, ElementAction::Click).await
    }

    async fn set_value(&self, request: &ActionRequest, value: &str) -> Result<StepTrace> {
        self.run_element_action(request, ElementAction::Fill(value)).await
    }

    async fn fill(&self, request: &ActionRequest, value: &str) -> Result<StepTrace> {
        self.run_element_action(request, ElementAction::Fill(value)).await
    }

    async fn type_text(&self, request: &ActionRequest, value: &str) -> Result<StepTrace> {
        self.run_element_action(request, ElementAction::Type(value)).await
    }

    async fn select(&self, request: &ActionRequest, value: &str) -> Result<StepTrace> {
        self.run_element_action(request, ElementAction::Select(value)).await
    }

    async fn extract(&self, request: &ActionRequest, field: ExtractField) -> Result<StepTrace> {
        self.run_element_action(request, ElementAction::Extract(field)).await
    }

    async fn assert_check(&self, request: &ActionRequest, assertions: &[Assertion]) -> Result<StepTrace> {
        let page = self.page()?;
        let assertions: Vec<Assertion> = assertions
            .iter()
            .map(|assertion| assertion.for_driver(&DriverKind::Web))
            .collect();
        let ctx = request.trace_context();
        let checked = assert::check_all(page.as_ref(), &assertions).await;
        Ok(ctx.finish(checked))
    }

    async fn screenshot(&self, request: &ActionRequest, name: Option<&str>) -> Result<StepTrace> {
        let page = self.page()?;
        let ctx = request.trace_context();
        let dir = self
            .artifact_dir
            .read()
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        let path = dir.join(format!("{}.png", name.unwrap_or(&request.step_id)));

        let taken = async {
            tokio::fs::create_dir_all(&dir).await?;
            page.screenshot(&path).await
        }
        .await;
        Ok(match taken {
            Ok(()) => ctx.succeeded(ActionOutcome {
                after_screenshot_path: Some(path),
                ..Default::default()
            }),
            Err(e) => ctx.failed(ActionOutcome::default(), &e),
        })
    }

    async fn navigate(&self, request: &ActionRequest, url: &str) -> Result<StepTrace> {
        let page = self.page()?;
        let ctx = request.trace_context();
        Ok(match page.goto(url, request.timeout()).await {
            Ok(()) => ctx.succeeded(ActionOutcome::default()),
            Err(e) => ctx.failed(ActionOutcome::default(), &e),
        })
    }
}
