//! # tether-cli
//!
//! Command-line interface for the Tether plan gate.
//!
//! ## Commands
//!
//! - `tether evaluate`: Run a plan file through the gate, optionally executing it
//! - `tether health`: Latest recorded tool health
//! - `tether history`: Recorded pipeline runs
//! - `tether stats`: Aggregate history numbers
//! - `tether config`: Show the effective configuration
//! - `tether validate-config`: Audit the configuration file

pub mod commands;

pub use commands::Cli;
