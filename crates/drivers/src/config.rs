//! Driver configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Desktop backend configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DesktopDriverConfig {
    /// Python interpreter used to launch the backend
    pub python_executable: String,

    /// Module run with `-m`
    pub module: String,

    /// Entries prepended to PYTHONPATH, resolved against the working directory
    pub python_path: Vec<PathBuf>,

    pub request_timeout_ms: u64,

    /// Deadline for the backend to answer its first ping
    pub spawn_timeout_ms: u64,
}

impl Default for DesktopDriverConfig {
    fn default() -> Self {
        Self {
            python_executable: "python".to_string(),
            module: "desktop_runner.server".to_string(),
            python_path: vec![PathBuf::from("desktop-runner/src")],
            request_timeout_ms: 10_000,
            spawn_timeout_ms: 5_000,
        }
    }
}

impl DesktopDriverConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn spawn_timeout(&self) -> Duration {
        Duration::from_millis(self.spawn_timeout_ms)
    }
}

/// Browser engine driven by the web bridge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

/// Web bridge configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebDriverConfig {
    /// Node executable used to run the Playwright bridge
    pub node_executable: String,

    pub browser: Browser,

    pub headless: bool,

    /// CDP endpoint of an already running browser to attach to
    pub attach_endpoint: Option<String>,

    pub request_timeout_ms: u64,

    pub spawn_timeout_ms: u64,
}

impl Default for WebDriverConfig {
    fn default() -> Self {
        Self {
            node_executable: "node".to_string(),
            browser: Browser::Chromium,
            headless: true,
            attach_endpoint: None,
            request_timeout_ms: 30_000,
            spawn_timeout_ms: 15_000,
        }
    }
}

impl WebDriverConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn spawn_timeout(&self) -> Duration {
        Duration::from_millis(self.spawn_timeout_ms)
    }
}
