//! Page abstraction and web locators

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use waypoint_common::{Error, Result, TargetRung};

/// Rung kinds the web driver can turn into live locators.
pub const SELECTOR_KINDS: &[&str] = &["web_role", "web_label", "web_css", "web_text", "web_xpath"];

/// A live locator strategy built from one ladder rung
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum WebLocator {
    Role {
        role: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exact: Option<bool>,
    },
    Label {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exact: Option<bool>,
    },
    Css {
        css: String,
    },
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exact: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        within_css: Option<String>,
    },
    Xpath {
        xpath: String,
    },
}

impl WebLocator {
    /// Build a locator from a rung, rejecting unknown kinds and malformed
    /// selectors.
    pub fn from_rung(rung: &TargetRung) -> Result<Self> {
        let strategy = match rung.kind.as_str() {
            "web_role" => "role",
            "web_label" => "label",
            "web_css" => "css",
            "web_text" => "text",
            "web_xpath" => "xpath",
            other => {
                return Err(Error::InvalidWorkflow(format!(
                    "Unsupported web selector kind: {}",
                    other
                )))
            }
        };
        let mut selector = match &rung.selector {
            serde_json::Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        selector.insert("strategy".to_string(), strategy.into());
        serde_json::from_value(serde_json::Value::Object(selector)).map_err(|e| {
            Error::InvalidWorkflow(format!("Invalid {} selector: {}", rung.kind, e))
        })
    }
}

/// A locator plus the frame it lives in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageLocator {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame: Option<String>,
    pub locator: WebLocator,
}

/// One browser page as seen by the web driver
#[async_trait]
pub trait PageSession: Send + Sync {
    async fn url(&self) -> Result<String>;

    async fn title(&self) -> Result<String>;

    async fn goto(&self, url: &str, timeout: Option<Duration>) -> Result<()>;

    /// Wait until at least one element matches.
    async fn wait_attached(&self, locator: &PageLocator, timeout: Duration) -> Result<()>;

    async fn count(&self, locator: &PageLocator) -> Result<usize>;

    async fn click(&self, locator: &PageLocator, timeout: Option<Duration>) -> Result<()>;

    async fn fill(&self, locator: &PageLocator, value: &str, timeout: Option<Duration>) -> Result<()>;

    async fn type_text(&self, locator: &PageLocator, value: &str, timeout: Option<Duration>) -> Result<()>;

    async fn select_option(&self, locator: &PageLocator, value: &str, timeout: Option<Duration>) -> Result<()>;

    async fn text_content(&self, locator: &PageLocator, timeout: Option<Duration>) -> Result<String>;

    async fn input_value(&self, locator: &PageLocator, timeout: Option<Duration>) -> Result<String>;

    async fn is_visible(&self, locator: &PageLocator) -> Result<bool>;

    async fn screenshot(&self, path: &Path) -> Result<()>;

    async fn close(&self) -> Result<()>;
}
