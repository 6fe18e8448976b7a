//! Tracking Configuration Module
//!
//! Provides tracking configuration loaded from TOML files.
//!
//! ## Loading Order
//!
//! 1. `LIVETRACK_CONFIG` environment variable (path to TOML file)
//! 2. `tracking.toml` in the current working directory
//! 3. Built-in defaults (see [`defaults`])
//!
//! Unlike a process-wide singleton, the loaded [`TrackingConfig`] is passed to
//! each component's constructor so tests can run many configurations side by
//! side.

mod tracking_config;
pub mod defaults;
pub mod validation;

pub use tracking_config::*;
