//! Waypoint CLI
//!
//! Command-line interface for running, verifying and probing Waypoint
//! workflows.

pub mod commands;
pub mod output;
pub mod prompt;
