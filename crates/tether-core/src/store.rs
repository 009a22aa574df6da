use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::Result;
use crate::plan::Plan;
use crate::types::{RiskLevel, ToolHealth};

/// A finalized pipeline run as handed to a history store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub plan_id: String,
    /// Terminal pipeline status tag, e.g. `"approved"` or `"rejected"`.
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    pub estimated_time: u64,
    pub estimated_cost: f64,
    pub success_probability: Option<f64>,
    pub risk_level: Option<RiskLevel>,
    pub approved: Option<bool>,
    pub approver: Option<String>,
    pub actual_cost: Option<f64>,
    pub duration_secs: Option<f64>,
    /// Full serialized pipeline result.
    pub result_data: Value,
}

/// An accept/deny recorded against an approval request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub decision_id: String,
    pub plan_id: String,
    pub timestamp: DateTime<Utc>,
    pub approved: bool,
    pub approver: String,
    pub risk_level: RiskLevel,
    pub urgency: String,
    pub context: Value,
}

/// Aggregate numbers over everything a store holds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStatistics {
    pub total_executions: u64,
    pub status_counts: BTreeMap<String, u64>,
    /// Fraction of recorded approval decisions that were accepted.
    pub approval_rate: f64,
}

/// Durable history of plans, runs, decisions, and tool health.
///
/// The gate only ever talks to this trait; engines live in `tether-store`.
pub trait HistoryStore: Send + Sync {
    fn save_plan(&self, plan: &Plan) -> Result<()>;

    fn save_execution(&self, record: &ExecutionRecord) -> Result<()>;

    fn save_tool_health(&self, tool_name: &str, health: &ToolHealth) -> Result<()>;

    fn save_approval_decision(&self, record: &DecisionRecord) -> Result<()>;

    fn get_plan(&self, plan_id: &str) -> Result<Option<Plan>>;

    /// Most recent runs first, optionally filtered to one plan.
    fn list_executions(&self, plan_id: Option<&str>, limit: usize) -> Result<Vec<ExecutionRecord>>;

    /// Most recent snapshots first.
    fn tool_health_history(&self, tool_name: &str, limit: usize) -> Result<Vec<ToolHealth>>;

    fn statistics(&self) -> Result<StoreStatistics>;
}
