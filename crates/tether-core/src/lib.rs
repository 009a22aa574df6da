//! # tether-core
//!
//! Core types, traits, and primitives for the Tether plan gate.
//! This crate defines the shared vocabulary used by every other crate in the workspace.

pub mod error;
pub mod event;
pub mod plan;
pub mod store;
pub mod tool;
pub mod types;

pub use error::{Result, TetherError};
pub use event::{Event, EventBus};
pub use plan::{Plan, Step, StepAction};
pub use store::{DecisionRecord, ExecutionRecord, HistoryStore, StoreStatistics};
pub use tool::{FnHandler, StepHandler, StepOutput, handler_fn};
pub use types::*;
