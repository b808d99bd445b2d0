//! Waypoint Common Library
//!
//! Shared types, transport and resolution primitives for the Waypoint runtime.

pub mod error;
pub mod process;
pub mod resolve;
pub mod rpc;
pub mod trace;
pub mod types;

// Re-export commonly used types
pub use error::{Error, Result, RpcErrorPayload};
pub use process::{BackendCommand, BackendProcess};
pub use resolve::{resolve_ladder, LocatorProbe, Resolution};
pub use rpc::RpcChannel;
pub use trace::{ActionOutcome, MatchAttempt, ResolvedElement, StepTrace, TraceContext};
pub use types::*;

/// Waypoint version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Backend RPC method names
pub mod methods {
    pub const PING: &str = "system.ping";
    pub const CAPABILITIES: &str = "system.getCapabilities";
    pub const RUN_BEGIN: &str = "run.begin";
    pub const RUN_END: &str = "run.end";
    pub const WINDOW_FOCUS: &str = "window.focus";
    pub const TARGET_RESOLVE: &str = "target.resolve";
    pub const CLICK: &str = "action.click";
    pub const PASTE_TEXT: &str = "action.pasteText";
    pub const SET_VALUE: &str = "action.setValue";
    pub const ASSERT_CHECK: &str = "assert.check";
    pub const EXTRACT_VALUE: &str = "extract.getValue";
    pub const SCREENSHOT: &str = "artifact.screenshot";
}
