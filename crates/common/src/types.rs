//! Workflow data model
//!
//! Workflows, targets and assertions are read-only inputs: they are parsed
//! once and never mutated while a run executes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};

/// Automation surface a step is dispatched to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DriverKind {
    Desktop,
    Web,
    /// A driver tag this build does not know about.
    Other(String),
}

impl From<String> for DriverKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "desktop" => DriverKind::Desktop,
            "web" => DriverKind::Web,
            _ => DriverKind::Other(value),
        }
    }
}

impl From<DriverKind> for String {
    fn from(kind: DriverKind) -> Self {
        kind.to_string()
    }
}

impl std::fmt::Display for DriverKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriverKind::Desktop => write!(f, "desktop"),
            DriverKind::Web => write!(f, "web"),
            DriverKind::Other(name) => write!(f, "{}", name),
        }
    }
}

/// A declarative workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub steps: Vec<WorkflowStep>,
}

impl WorkflowDefinition {
    /// Parse a workflow from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        let workflow: Self = serde_json::from_str(json)?;
        workflow.validate()?;
        Ok(workflow)
    }

    /// Parse a workflow from YAML
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let workflow: Self = serde_yaml::from_str(yaml)?;
        workflow.validate()?;
        Ok(workflow)
    }

    /// Load a workflow file, picking the format from the extension
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml(&content),
            _ => Self::from_json(&content),
        }
    }

    /// Step ids must be unique within a workflow.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.id.is_empty() {
                return Err(Error::InvalidWorkflow(format!(
                    "workflow {} has a step without an id",
                    self.id
                )));
            }
            if !seen.insert(step.id.as_str()) {
                return Err(Error::InvalidWorkflow(format!(
                    "duplicate step id {}",
                    step.id
                )));
            }
        }
        Ok(())
    }

    pub fn step(&self, id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|step| step.id == id)
    }

    /// Index of the step with the given id.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.steps.iter().position(|step| step.id == id)
    }

    pub fn uses_driver(&self, kind: &DriverKind) -> bool {
        self.steps.iter().any(|step| &step.driver == kind)
    }
}

/// A single unit of execution, checkpointing and tracing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: String,
    pub driver: DriverKind,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Target>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<InputValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    #[serde(default)]
    pub timeouts: StepTimeouts,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pre_assert: Vec<Assertion>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_assert: Vec<Assertion>,
    #[serde(default)]
    pub params: StepParams,
    /// Human-readable intent, shown in verification mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explain: Option<String>,
}

impl WorkflowStep {
    /// Timeout handed to the driver for element waits.
    pub fn wait_timeout_ms(&self) -> Option<u64> {
        self.timeouts.wait_timeout_ms.or(self.timeouts.step_timeout_ms)
    }

    /// Target with its scope narrowed to this step's driver.
    pub fn scoped_target(&self) -> Option<Target> {
        self.target.as_ref().map(|t| t.for_driver(&self.driver))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepTimeouts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_timeout_ms: Option<u64>,
}

/// Free-form per-action parameters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepParams {
    #[serde(default)]
    pub capture_screenshots: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assertions: Option<Vec<Assertion>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<ExtractField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractField {
    #[default]
    Text,
    Value,
}

/// Retry settings threaded from a step to its driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Extra attempts after the first one
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub wait_ms: u64,
    #[serde(default)]
    pub backoff: Backoff,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    #[default]
    None,
    Linear,
    Exponential,
}

impl RetryPolicy {
    pub fn total_tries(&self) -> u32 {
        1 + self.attempts
    }

    /// Pause after the zero-based attempt `attempt_index`.
    pub fn delay_for(&self, attempt_index: u32) -> Duration {
        let ms = match self.backoff {
            Backoff::None => self.wait_ms,
            Backoff::Linear => self.wait_ms.saturating_mul(u64::from(attempt_index) + 1),
            Backoff::Exponential => self
                .wait_ms
                .saturating_mul(2u64.saturating_pow(attempt_index)),
        };
        Duration::from_millis(ms)
    }
}

/// Ordered locator ladder plus an optional scope predicate.
///
/// Ladder order is priority order; `confidence` is informational only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub ladder: Vec<TargetRung>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<TargetScope>,
}

impl Target {
    /// Copy with a nested `desktop`/`web` scope flattened for `driver`.
    pub fn for_driver(&self, driver: &DriverKind) -> Target {
        Target {
            ladder: self.ladder.clone(),
            scope: self.scope.as_ref().map(|scope| scope.for_driver(driver)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetRung {
    pub kind: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub selector: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Predicate that must hold before any rung is tried.
///
/// Scopes may be written flat or nested per driver
/// (`{"desktop": {...}, "web": {...}}`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetScope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_title_contains: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_contains: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_contains: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desktop: Option<Box<TargetScope>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web: Option<Box<TargetScope>>,
}

impl TargetScope {
    pub fn for_driver(&self, driver: &DriverKind) -> TargetScope {
        let nested = match driver {
            DriverKind::Desktop => self.desktop.as_deref(),
            DriverKind::Web => self.web.as_deref(),
            DriverKind::Other(_) => None,
        };
        match nested {
            Some(scope) => scope.clone(),
            None => TargetScope {
                desktop: None,
                web: None,
                ..self.clone()
            },
        }
    }
}

/// Assertion kinds understood by the drivers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssertionKind {
    #[serde(rename = "web_exists")]
    WebExists,
    #[serde(rename = "web_visible")]
    WebVisible,
    #[serde(rename = "web_text_equals")]
    WebTextEquals,
    #[serde(rename = "web_text_contains")]
    WebTextContains,
    #[serde(rename = "web_value_equals")]
    WebValueEquals,
    #[serde(rename = "web_value_contains")]
    WebValueContains,
    #[serde(rename = "web_url_equals")]
    WebUrlEquals,
    #[serde(rename = "web_url_contains")]
    WebUrlContains,
    #[serde(rename = "web_title_equals")]
    WebTitleEquals,
    #[serde(rename = "web_title_contains")]
    WebTitleContains,
    #[serde(rename = "desktop_window_active")]
    DesktopWindowActive,
    #[serde(rename = "desktop_element_exists")]
    DesktopElementExists,
    #[serde(rename = "desktop_element_visible")]
    DesktopElementVisible,
    #[serde(rename = "desktop_focused_controlType")]
    DesktopFocusedControlType,
    #[serde(rename = "desktop_value_equals")]
    DesktopValueEquals,
    #[serde(rename = "desktop_value_contains")]
    DesktopValueContains,
    #[serde(rename = "not")]
    Not,
}

impl AssertionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssertionKind::WebExists => "web_exists",
            AssertionKind::WebVisible => "web_visible",
            AssertionKind::WebTextEquals => "web_text_equals",
            AssertionKind::WebTextContains => "web_text_contains",
            AssertionKind::WebValueEquals => "web_value_equals",
            AssertionKind::WebValueContains => "web_value_contains",
            AssertionKind::WebUrlEquals => "web_url_equals",
            AssertionKind::WebUrlContains => "web_url_contains",
            AssertionKind::WebTitleEquals => "web_title_equals",
            AssertionKind::WebTitleContains => "web_title_contains",
            AssertionKind::DesktopWindowActive => "desktop_window_active",
            AssertionKind::DesktopElementExists => "desktop_element_exists",
            AssertionKind::DesktopElementVisible => "desktop_element_visible",
            AssertionKind::DesktopFocusedControlType => "desktop_focused_controlType",
            AssertionKind::DesktopValueEquals => "desktop_value_equals",
            AssertionKind::DesktopValueContains => "desktop_value_contains",
            AssertionKind::Not => "not",
        }
    }
}

impl std::fmt::Display for AssertionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A condition checked before or after an action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assertion {
    pub kind: AssertionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Target>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_equals: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_contains: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_equals: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_contains: Option<String>,
    #[serde(default, rename = "controlType", skip_serializing_if = "Option::is_none")]
    pub control_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Nested assertion for `not`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assert: Option<Box<Assertion>>,
}

impl Assertion {
    pub fn new(kind: AssertionKind) -> Self {
        Self {
            kind,
            target: None,
            text: None,
            value: None,
            url_equals: None,
            url_contains: None,
            title_equals: None,
            title_contains: None,
            control_type: None,
            timeout_ms: None,
            assert: None,
        }
    }

    pub fn negate(inner: Assertion) -> Self {
        Self {
            assert: Some(Box::new(inner)),
            ..Self::new(AssertionKind::Not)
        }
    }

    pub fn with_target(mut self, target: Target) -> Self {
        self.target = Some(target);
        self
    }

    /// Copy with every nested target scope flattened for `driver`.
    pub fn for_driver(&self, driver: &DriverKind) -> Assertion {
        Assertion {
            target: self.target.as_ref().map(|t| t.for_driver(driver)),
            assert: self
                .assert
                .as_ref()
                .map(|inner| Box::new(inner.for_driver(driver))),
            ..self.clone()
        }
    }

    /// One-line description used in review explain blocks.
    pub fn summary(&self) -> String {
        let detail = match self.kind {
            AssertionKind::Not => self.assert.as_ref().map(|inner| inner.summary()),
            _ => self
                .text
                .as_ref()
                .or(self.value.as_ref())
                .or(self.url_equals.as_ref())
                .or(self.url_contains.as_ref())
                .or(self.title_equals.as_ref())
                .or(self.title_contains.as_ref())
                .or(self.control_type.as_ref())
                .map(|expected| format!("\"{}\"", expected)),
        };
        match detail {
            Some(detail) if self.kind == AssertionKind::Not => format!("not ({})", detail),
            Some(detail) => format!("{} {}", self.kind, detail),
            None => self.kind.to_string(),
        }
    }
}

/// Literal or variable-reference step input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputValue {
    Variable {
        var: String,
        #[serde(default)]
        transform: InputTransform,
    },
    Literal(Literal),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Text(String),
    Number(serde_json::Number),
    Bool(bool),
}

impl std::fmt::Display for Literal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Literal::Text(text) => f.write_str(text),
            Literal::Number(number) => write!(f, "{}", number),
            Literal::Bool(flag) => write!(f, "{}", flag),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputTransform {
    #[default]
    None,
    Trim,
    Upper,
    Lower,
}

impl InputTransform {
    pub fn apply(&self, raw: &str) -> String {
        match self {
            InputTransform::None => raw.to_string(),
            InputTransform::Trim => raw.trim().to_string(),
            InputTransform::Upper => raw.to_uppercase(),
            InputTransform::Lower => raw.to_lowercase(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_parse_desktop_workflow() {
        let json = r#"{
            "id": "notepad",
            "steps": [
                {
                    "id": "type-name",
                    "driver": "desktop",
                    "action": "fill",
                    "target": {
                        "ladder": [
                            {"kind": "uia", "confidence": 0.9, "selector": {"automation_id": "15"}},
                            {"kind": "uia_near_label", "confidence": 0.5, "selector": {"label": "Name"}}
                        ],
                        "scope": {"desktop": {"process_name": "notepad.exe"}}
                    },
                    "input": {"var": "name", "transform": "trim"},
                    "retry": {"attempts": 2, "wait_ms": 100, "backoff": "linear"},
                    "timeouts": {"step_timeout_ms": 5000},
                    "post_assert": [
                        {"kind": "not", "assert": {"kind": "desktop_value_equals", "value": ""}}
                    ]
                }
            ]
        }"#;
        let workflow = WorkflowDefinition::from_json(json).unwrap();
        let step = &workflow.steps[0];
        assert_eq!(step.driver, DriverKind::Desktop);
        assert_eq!(step.target.as_ref().unwrap().ladder.len(), 2);
        assert_eq!(
            step.input,
            Some(InputValue::Variable {
                var: "name".to_string(),
                transform: InputTransform::Trim
            })
        );
        let scoped = step.scoped_target().unwrap();
        assert_eq!(
            scoped.scope.unwrap().process_name.as_deref(),
            Some("notepad.exe")
        );
        assert_eq!(step.post_assert[0].kind, AssertionKind::Not);
    }

    #[test]
    fn test_parse_web_workflow_yaml() {
        let yaml = r#"
id: login
steps:
  - id: open
    driver: web
    action: navigate
    input: https://example.test/login
  - id: user
    driver: web
    action: fill
    input: alice
    target:
      ladder:
        - kind: web_label
          confidence: 0.9
          selector: { text: Username }
"#;
        let workflow = WorkflowDefinition::from_yaml(yaml).unwrap();
        assert!(workflow.uses_driver(&DriverKind::Web));
        assert!(!workflow.uses_driver(&DriverKind::Desktop));
        assert_eq!(
            workflow.steps[0].input,
            Some(InputValue::Literal(Literal::Text(
                "https://example.test/login".to_string()
            )))
        );
    }

    #[test]
    fn test_unknown_driver_is_preserved() {
        let json = r#"{"id": "w", "steps": [{"id": "a", "driver": "mobile", "action": "tap"}]}"#;
        let workflow = WorkflowDefinition::from_json(json).unwrap();
        assert_eq!(workflow.steps[0].driver, DriverKind::Other("mobile".to_string()));
    }

    #[test]
    fn test_duplicate_step_ids_rejected() {
        let json = r#"{"id": "w", "steps": [
            {"id": "a", "driver": "web", "action": "click"},
            {"id": "a", "driver": "web", "action": "click"}
        ]}"#;
        assert!(matches!(
            WorkflowDefinition::from_json(json),
            Err(Error::InvalidWorkflow(_))
        ));
    }

    #[test_case(InputTransform::None, "  Mixed Case  ", "  Mixed Case  " ; "none")]
    #[test_case(InputTransform::Trim, "  Mixed Case  ", "Mixed Case" ; "trim")]
    #[test_case(InputTransform::Upper, "Mixed Case", "MIXED CASE" ; "upper")]
    #[test_case(InputTransform::Lower, "Mixed Case", "mixed case" ; "lower")]
    fn test_input_transform(transform: InputTransform, raw: &str, expected: &str) {
        assert_eq!(transform.apply(raw), expected);
    }

    #[test_case(Backoff::None, 0, 100 ; "none first")]
    #[test_case(Backoff::None, 3, 100 ; "none later")]
    #[test_case(Backoff::Linear, 2, 300 ; "linear")]
    #[test_case(Backoff::Exponential, 3, 800 ; "exponential")]
    fn test_retry_delay(backoff: Backoff, attempt: u32, expected_ms: u64) {
        let policy = RetryPolicy {
            attempts: 4,
            wait_ms: 100,
            backoff,
        };
        assert_eq!(policy.delay_for(attempt), Duration::from_millis(expected_ms));
        assert_eq!(policy.total_tries(), 5);
    }

    #[test]
    fn test_assertion_summary() {
        let inner = Assertion {
            text: Some("Saved".to_string()),
            ..Assertion::new(AssertionKind::WebTextContains)
        };
        assert_eq!(inner.summary(), "web_text_contains \"Saved\"");
        assert_eq!(
            Assertion::negate(inner).summary(),
            "not (web_text_contains \"Saved\")"
        );
        assert_eq!(Assertion::new(AssertionKind::WebExists).summary(), "web_exists");
    }
}
