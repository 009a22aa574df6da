use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Which real-world limit a constraint expresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConstraintKind {
    Duration,
    Budget,
    Permissions,
    Regulation,
}

/// The limit carried by a constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ConstraintLimit {
    Duration { max_secs: u64 },
    Budget { max_cost: f64 },
    Permissions { allowed: BTreeSet<String> },
    /// Recorded for reporting; no check is derived from it yet.
    Regulation { name: String },
}

/// A limit a plan must satisfy before it may proceed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub limit: ConstraintLimit,
    /// Soft constraints could in principle be waived by an approver.
    #[serde(default = "default_hard")]
    pub hard: bool,
    #[serde(default)]
    pub description: String,
}

fn default_hard() -> bool {
    true
}

impl Constraint {
    pub fn duration(max_secs: u64) -> Self {
        Self::hard(ConstraintLimit::Duration { max_secs })
    }

    pub fn budget(max_cost: f64) -> Self {
        Self::hard(ConstraintLimit::Budget { max_cost })
    }

    pub fn permissions<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::hard(ConstraintLimit::Permissions {
            allowed: allowed.into_iter().map(Into::into).collect(),
        })
    }

    pub fn regulation(name: impl Into<String>) -> Self {
        Self::hard(ConstraintLimit::Regulation { name: name.into() })
    }

    fn hard(limit: ConstraintLimit) -> Self {
        Self {
            limit,
            hard: true,
            description: String::new(),
        }
    }

    pub fn soft(mut self) -> Self {
        self.hard = false;
        self
    }

    pub fn kind(&self) -> ConstraintKind {
        match self.limit {
            ConstraintLimit::Duration { .. } => ConstraintKind::Duration,
            ConstraintLimit::Budget { .. } => ConstraintKind::Budget,
            ConstraintLimit::Permissions { .. } => ConstraintKind::Permissions,
            ConstraintLimit::Regulation { .. } => ConstraintKind::Regulation,
        }
    }
}

/// Risk tier of a projected outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn is_elevated(&self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One simulated outcome path for a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionResult {
    pub path_id: String,
    pub success_probability: f64,
    pub estimated_time: u64,
    pub estimated_cost: f64,
    pub risk_level: RiskLevel,
    pub failure_modes: Vec<String>,
    pub second_order_effects: Vec<String>,
    pub recommended: bool,
}

/// Health of one external tool, smoothed over its recent executions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolHealth {
    pub tool_name: String,
    pub success_rate: f64,
    pub avg_response_time: f64,
    pub failure_count: u64,
    pub last_failure: Option<DateTime<Utc>>,
    /// Sticky: once set it is never cleared in-process.
    pub drift_detected: bool,
}

impl ToolHealth {
    pub fn new(tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            success_rate: 1.0,
            avg_response_time: 0.0,
            failure_count: 0,
            last_failure: None,
            drift_detected: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of running a plan's steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub plan_id: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub steps_completed: usize,
    pub steps_total: usize,
    pub cost: f64,
    pub errors: Vec<String>,
    /// Handler output per step id (`<plan>_step_<n>`).
    pub outputs: BTreeMap<String, Value>,
    pub duration_secs: f64,
    /// Actual minus estimated duration.
    pub time_variance_secs: f64,
    /// Actual minus estimated cost.
    pub cost_variance: f64,
}

impl ExecutionResult {
    pub fn pending(plan_id: impl Into<String>, steps_total: usize) -> Self {
        Self {
            plan_id: plan_id.into(),
            status: ExecutionStatus::Pending,
            started_at: Utc::now(),
            ended_at: None,
            steps_completed: 0,
            steps_total,
            cost: 0.0,
            errors: Vec::new(),
            outputs: BTreeMap::new(),
            duration_secs: 0.0,
            time_variance_secs: 0.0,
            cost_variance: 0.0,
        }
    }
}
