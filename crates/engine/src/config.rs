//! Runtime configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use waypoint_common::{Error, Result};
use waypoint_drivers::{DesktopDriverConfig, WebDriverConfig};

/// Waypoint configuration
///
/// Every section is optional in the file; keys that are present override the
/// built-in defaults of their own section only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaypointConfig {
    /// Desktop backend configuration
    pub desktop: DesktopDriverConfig,

    /// Web bridge configuration
    pub web: WebDriverConfig,

    /// Runtime engine configuration
    pub runtime: RuntimeConfig,
}

/// Runtime engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Step deadline used when a step declares none
    pub default_timeout_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
        }
    }
}

impl RuntimeConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

impl WaypointConfig {
    /// Load configuration from file. A missing file yields the defaults;
    /// `.json` files are read as JSON, anything else as TOML.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json(&content),
            _ => Self::from_toml(&content),
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::InvalidConfig(e.to_string()))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| Error::InvalidConfig(e.to_string()))
    }

    /// Save configuration to file as TOML
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WaypointConfig::default();
        assert_eq!(config.desktop.python_executable, "python");
        assert_eq!(config.desktop.module, "desktop_runner.server");
        assert_eq!(config.desktop.request_timeout_ms, 10_000);
        assert_eq!(config.desktop.spawn_timeout_ms, 5_000);
        assert_eq!(config.runtime.default_timeout_ms, 30_000);
        assert!(config.web.headless);
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = WaypointConfig::from_toml(
            r#"
            [desktop]
            request_timeout_ms = 2500

            [runtime]
            default_timeout_ms = 1000
            "#,
        )
        .unwrap();
        assert_eq!(config.desktop.request_timeout_ms, 2500);
        assert_eq!(config.desktop.module, "desktop_runner.server");
        assert_eq!(config.runtime.default_timeout(), Duration::from_secs(1));
        assert_eq!(config.web, WebDriverConfig::default());
    }

    #[test]
    fn test_json_and_unknown_sections() {
        let config = WaypointConfig::from_json(
            r#"{"web": {"browser": "firefox", "headless": false}, "telemetry": {"enabled": true}}"#,
        )
        .unwrap();
        assert_eq!(config.web.browser.as_str(), "firefox");
        assert!(!config.web.headless);
        assert_eq!(config.web.node_executable, "node");
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = WaypointConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, WaypointConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf/waypoint.toml");
        let mut config = WaypointConfig::default();
        config.runtime.default_timeout_ms = 45_000;
        config.save(&path).unwrap();
        assert_eq!(WaypointConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_invalid_value_is_reported() {
        let err = WaypointConfig::from_toml("[runtime]\ndefault_timeout_ms = \"soon\"").unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }
}
