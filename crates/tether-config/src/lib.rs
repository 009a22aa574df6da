//! # tether-config
//!
//! Configuration system for Tether. Reads from `tether.toml`, then applies
//! environment variable overrides on top.
//!
//! Supports hot-reload via filesystem watcher.

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::TetherConfig;
pub use schema::{ConfigWarning, WarningSeverity};
