use thiserror::Error;

/// Unified error type for the Tether workspace.
///
/// Expected outcomes of the pipeline (constraint violations, denied approvals,
/// unknown actions, degraded tools) are reported as values, not through this type.
#[derive(Error, Debug)]
pub enum TetherError {
    // ── Plan errors ────────────────────────────────────────────
    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    // ── Execution errors ───────────────────────────────────────
    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("step execution failed: {action}: {reason}")]
    StepExecution { action: String, reason: String },

    #[error("pipeline error: {0}")]
    Pipeline(String),

    // ── Persistence errors ─────────────────────────────────────
    #[error("store error: {0}")]
    Store(String),

    // ── Config errors ──────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    #[error("config validation failed: {field}: {reason}")]
    ConfigValidation { field: String, reason: String },

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, TetherError>;
