//! Waypoint Drivers
//!
//! Automation surfaces behind a single [`Driver`] interface:
//! - [`DesktopDriver`] talks JSON-RPC to an out-of-process UI automation
//!   backend, which resolves ladders and evaluates assertions itself
//! - [`WebDriver`] resolves ladders in-process against a Playwright page
//!   hosted by a node bridge process
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                     dyn Driver                            │
//! ├──────────────────────────────┬────────────────────────────┤
//! │  DesktopDriver               │  WebDriver                 │
//! │    RpcChannel ──► python     │    resolve_ladder          │
//! │    (backend resolves)        │    PageSession ──► node    │
//! └──────────────────────────────┴────────────────────────────┘
//! ```

pub mod config;
pub mod desktop;
pub mod driver;
pub mod web;

pub use config::{Browser, DesktopDriverConfig, WebDriverConfig};
pub use desktop::DesktopDriver;
pub use driver::{ActionRequest, Driver, Drivers};
pub use web::{PageSession, WebDriver};
