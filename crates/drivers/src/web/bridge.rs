//! Playwright bridge - a node process exposing one browser page over the
//! JSON-line transport

use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Mutex;
use tracing::{debug, info};

use waypoint_common::{methods, BackendCommand, BackendProcess, Result, RpcChannel};

use crate::config::WebDriverConfig;
use crate::web::page::{PageLocator, PageSession};

mod bridge_methods {
    pub const URL: &str = "page.url";
    pub const TITLE: &str = "page.title";
    pub const GOTO: &str = "page.goto";
    pub const SCREENSHOT: &str = "page.screenshot";
    pub const CLOSE: &str = "page.close";
    pub const WAIT_ATTACHED: &str = "locator.waitAttached";
    pub const COUNT: &str = "locator.count";
    pub const CLICK: &str = "locator.click";
    pub const FILL: &str = "locator.fill";
    pub const TYPE: &str = "locator.type";
    pub const SELECT_OPTION: &str = "locator.selectOption";
    pub const TEXT_CONTENT: &str = "locator.textContent";
    pub const INPUT_VALUE: &str = "locator.inputValue";
    pub const IS_VISIBLE: &str = "locator.isVisible";
}

/// A page hosted by the bridge process
pub struct BridgePage {
    process: Mutex<Option<BackendProcess>>,
    channel: Arc<RpcChannel>,
    _script_dir: TempDir,
}

impl BridgePage {
    /// Write the bridge script, start node and wait for the browser.
    pub async fn launch(config: &WebDriverConfig) -> Result<Self> {
        let script_dir = tempfile::tempdir()?;
        let script_path = script_dir.path().join("waypoint-bridge.js");
        std::fs::write(&script_path, BRIDGE_SCRIPT)?;
        debug!("Wrote Playwright bridge: {}", script_path.display());

        let mut command = BackendCommand::new(&config.node_executable)
            .arg(script_path.to_string_lossy())
            .env("WAYPOINT_BROWSER", config.browser.as_str())
            .env("WAYPOINT_HEADLESS", config.headless.to_string())
            .env("NODE_PATH", node_path()?);
        if let Some(endpoint) = &config.attach_endpoint {
            command = command.env("WAYPOINT_ATTACH_ENDPOINT", endpoint);
        }

        let mut process = BackendProcess::spawn("web", &command, config.request_timeout())?;
        if let Err(e) = process
            .wait_ready(methods::PING, config.spawn_timeout())
            .await
        {
            process.stop().await;
            return Err(e);
        }
        info!("Playwright bridge ready ({})", config.browser.as_str());

        Ok(Self {
            channel: process.channel(),
            process: Mutex::new(Some(process)),
            _script_dir: script_dir,
        })
    }

    async fn locator_call(&self, method: &str, locator: &PageLocator, extra: Value) -> Result<Value> {
        let mut params = json!({ "locator": locator });
        if let (Value::Object(params), Value::Object(extra)) = (&mut params, extra) {
            params.extend(extra);
        }
        self.channel.call(method, params).await
    }
}

/// Project `node_modules` ahead of any inherited NODE_PATH, so the bridge
/// script can `require('playwright')` from its temp directory.
fn node_path() -> Result<String> {
    let mut entries = vec![std::env::current_dir()?.join("node_modules")];
    if let Some(existing) = std::env::var_os("NODE_PATH") {
        entries.extend(std::env::split_paths(&existing));
    }
    let joined = std::env::join_paths(entries)
        .map_err(|e| waypoint_common::Error::InvalidConfig(format!("NODE_PATH: {}", e)))?;
    Ok(joined.to_string_lossy().into_owned())
}

fn timeout_ms(timeout: Option<Duration>) -> Value {
    match timeout {
        Some(timeout) => json!(timeout.as_millis() as u64),
        None => Value::Null,
    }
}

fn as_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[async_trait]
impl PageSession for BridgePage {
    async fn url(&self) -> Result<String> {
        Ok(as_string(self.channel.call(bridge_methods::URL, json!({})).await?))
    }

    async fn title(&self) -> Result<String> {
        Ok(as_string(self.channel.call(bridge_methods::TITLE, json!({})).await?))
    }

    async fn goto(&self, url: &str, timeout: Option<Duration>) -> Result<()> {
        self.channel
            .call(bridge_methods::GOTO, json!({ "url": url, "timeout_ms": timeout_ms(timeout) }))
            .await?;
        Ok(())
    }

    async fn wait_attached(&self, locator: &PageLocator, timeout: Duration) -> Result<()> {
        self.locator_call(
            bridge_methods::WAIT_ATTACHED,
            locator,
            json!({ "timeout_ms": timeout.as_millis() as u64 }),
        )
        .await?;
        Ok(())
    }

    async fn count(&self, locator: &PageLocator) -> Result<usize> {
        let value = self.locator_call(bridge_methods::COUNT, locator, json!({})).await?;
        Ok(value.as_u64().unwrap_or(0) as usize)
    }

    async fn click(&self, locator: &PageLocator, timeout: Option<Duration>) -> Result<()> {
        self.locator_call(bridge_methods::CLICK, locator, json!({ "timeout_ms": timeout_ms(timeout) }))
            .await?;
        Ok(())
    }

    async fn fill(&self, locator: &PageLocator, value: &str, timeout: Option<Duration>) -> Result<()> {
        self.locator_call(
            bridge_methods::FILL,
            locator,
            json!({ "value": value, "timeout_ms": timeout_ms(timeout) }),
        )
        .await?;
        Ok(())
    }

    async fn type_text(&self, locator: &PageLocator, value: &str, timeout: Option<Duration>) -> Result<()> {
        self.locator_call(
            bridge_methods::TYPE,
            locator,
            json!({ "value": value, "timeout_ms": timeout_ms(timeout) }),
        )
        .await?;
        Ok(())
    }

    async fn select_option(&self, locator: &PageLocator, value: &str, timeout: Option<Duration>) -> Result<()> {
        self.locator_call(
            bridge_methods::SELECT_OPTION,
            locator,
            json!({ "value": value, "timeout_ms": timeout_ms(timeout) }),
        )
        .await?;
        Ok(())
    }

    async fn text_content(&self, locator: &PageLocator, timeout: Option<Duration>) -> Result<String> {
        let value = self
            .locator_call(bridge_methods::TEXT_CONTENT, locator, json!({ "timeout_ms": timeout_ms(timeout) }))
            .await?;
        Ok(as_string(value))
    }

    async fn input_value(&self, locator: &PageLocator, timeout: Option<Duration>) -> Result<String> {
        let value = self
            .locator_call(bridge_methods::INPUT_VALUE, locator, json!({ "timeout_ms": timeout_ms(timeout) }))
            .await?;
        Ok(as_string(value))
    }

    async fn is_visible(&self, locator: &PageLocator) -> Result<bool> {
        let value = self.locator_call(bridge_methods::IS_VISIBLE, locator, json!({})).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn screenshot(&self, path: &Path) -> Result<()> {
        self.channel
            .call(bridge_methods::SCREENSHOT, json!({ "path": path }))
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut process = self.process.lock().await;
        if let Some(mut backend) = process.take() {
            // Best effort: the browser is torn down with the process anyway.
            if let Err(e) = self.channel.call(bridge_methods::CLOSE, json!({})).await {
                debug!("Bridge close request failed: {}", e);
            }
            backend.stop().await;
        }
        Ok(())
    }
}

/// Node side of the bridge. Serves one page; every locator call rebuilds the
/// Playwright locator from its serialized strategy.
const BRIDGE_SCRIPT: &str = r#"
const readline = require('readline');
const playwright = require('playwright');

const browserName = process.env.WAYPOINT_BROWSER || 'chromium';
const headless = process.env.WAYPOINT_HEADLESS !== 'false';
const attachEndpoint = process.env.WAYPOINT_ATTACH_ENDPOINT;

let browser = null;
let context = null;
let page = null;

async function start() {
  if (attachEndpoint) {
    browser = await playwright.chromium.connectOverCDP(attachEndpoint);
  } else {
    browser = await playwright[browserName].launch({ headless });
  }
  context = await browser.newContext();
  page = await context.newPage();
}

const ready = start();

function root(frame) {
  return frame ? page.frameLocator(frame) : page;
}

function build({ frame, locator }) {
  const r = root(frame);
  switch (locator.strategy) {
    case 'role':
      return r.getByRole(locator.role, { name: locator.name, exact: locator.exact });
    case 'label':
      return r.getByLabel(locator.text, { exact: locator.exact });
    case 'css':
      return r.locator(locator.css);
    case 'text':
      if (locator.within_css) {
        return r.locator(locator.within_css).getByText(locator.text, { exact: locator.exact });
      }
      return r.getByText(locator.text, { exact: locator.exact });
    case 'xpath':
      return r.locator(`xpath=${locator.xpath}`);
    default:
      throw new Error(`Unsupported locator strategy: ${locator.strategy}`);
  }
}

function timeout(params) {
  return params.timeout_ms == null ? undefined : params.timeout_ms;
}

const handlers = {
  'system.ping': async () => ({ ok: true, service: 'waypoint-web-bridge', version: '0.1.0' }),
  'system.getCapabilities': async () => ({
    playwright: true,
    browser: browserName,
    selectors: ['web_role', 'web_label', 'web_css', 'web_text', 'web_xpath'],
  }),
  'page.url': async () => page.url(),
  'page.title': async () => page.title(),
  'page.goto': async (p) => { await page.goto(p.url, { timeout: timeout(p) }); return true; },
  'page.screenshot': async (p) => { await page.screenshot({ path: p.path, fullPage: true }); return p.path; },
  'page.close': async () => {
    if (context) await context.close();
    if (browser) await browser.close();
    return true;
  },
  'locator.waitAttached': async (p) => {
    await build(p.locator).first().waitFor({ state: 'attached', timeout: timeout(p) });
    return true;
  },
  'locator.count': async (p) => build(p.locator).count(),
  'locator.click': async (p) => { await build(p.locator).click({ timeout: timeout(p) }); return true; },
  'locator.fill': async (p) => { await build(p.locator).fill(p.value, { timeout: timeout(p) }); return true; },
  'locator.type': async (p) => { await build(p.locator).pressSequentially(p.value, { timeout: timeout(p) }); return true; },
  'locator.selectOption': async (p) => { await build(p.locator).selectOption(p.value, { timeout: timeout(p) }); return true; },
  'locator.textContent': async (p) => (await build(p.locator).textContent({ timeout: timeout(p) })) ?? '',
  'locator.inputValue': async (p) => build(p.locator).inputValue({ timeout: timeout(p) }),
  'locator.isVisible': async (p) => build(p.locator).isVisible(),
};

function reply(message) {
  process.stdout.write(JSON.stringify(message) + '\n');
}

const rl = readline.createInterface({ input: process.stdin });
rl.on('line', async (line) => {
  let request;
  try {
    request = JSON.parse(line);
  } catch (error) {
    reply({ jsonrpc: '2.0', id: null, error: { code: -32700, message: 'Parse error' } });
    return;
  }
  const handler = handlers[request.method];
  if (!handler) {
    reply({ jsonrpc: '2.0', id: request.id, error: { code: -32601, message: 'Method not found' } });
    return;
  }
  try {
    await ready;
    const result = await handler(request.params || {});
    reply({ jsonrpc: '2.0', id: request.id, result });
  } catch (error) {
    reply({
      jsonrpc: '2.0',
      id: request.id,
      error: { code: 1003, message: error instanceof Error ? error.message : String(error) },
    });
  }
});
rl.on('close', async () => {
  try {
    if (browser) await browser.close();
  } finally {
    process.exit(0);
  }
});
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_serves_every_bridge_method() {
        for method in [
            bridge_methods::URL,
            bridge_methods::TITLE,
            bridge_methods::GOTO,
            bridge_methods::SCREENSHOT,
            bridge_methods::CLOSE,
            bridge_methods::WAIT_ATTACHED,
            bridge_methods::COUNT,
            bridge_methods::CLICK,
            bridge_methods::FILL,
            bridge_methods::TYPE,
            bridge_methods::SELECT_OPTION,
            bridge_methods::TEXT_CONTENT,
            bridge_methods::INPUT_VALUE,
            bridge_methods::IS_VISIBLE,
            methods::PING,
            methods::CAPABILITIES,
        ] {
            assert!(
                BRIDGE_SCRIPT.contains(&format!("'{}'", method)),
                "bridge script does not handle {}",
                method
            );
        }
    }

    #[test]
    fn test_timeout_is_null_when_absent() {
        assert_eq!(timeout_ms(None), Value::Null);
        assert_eq!(timeout_ms(Some(Duration::from_millis(250))), json!(250));
    }
}
