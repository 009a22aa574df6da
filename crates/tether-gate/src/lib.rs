//! # tether-gate
//!
//! The plan gate. A plan is checked against static limits, projected along
//! several risk-weighted paths, held for human sign-off when the projection
//! warrants it, and finally executed step by step while every tool outcome
//! feeds the reliability monitor.

pub mod approval;
pub mod builtin;
pub mod constraint;
pub mod execution;
pub mod orchestrator;
pub mod reliability;
pub mod simulator;

pub use approval::{
    ApprovalChannel, ApprovalDecision, ApprovalGate, ApprovalRequest, ApproverRole, QueuedApprover,
    Urgency, approver_fn,
};
pub use builtin::{BUILTIN_ACTIONS, register_builtin_handlers};
pub use constraint::{ConstraintValidator, Remediation, Suggestions, Violation};
pub use execution::{ExecutionEngine, ExecutionHandle, StepCallback, StepReport};
pub use orchestrator::{
    Orchestrator, OrchestratorBuilder, PipelineOptions, PipelineResult, PipelineStatus,
    SystemHealth,
};
pub use reliability::{AlertKind, AlertSink, ReliabilityMonitor, ToolAlert};
pub use simulator::ScenarioSimulator;
