use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::info;

use tether_core::{Plan, ProjectionResult, RiskLevel};

use crate::constraint::Violation;

/// Plans costing more than this need sign-off.
pub const APPROVAL_COST_THRESHOLD: f64 = 50.0;
/// Plans estimated to run longer than this (seconds) need sign-off.
pub const APPROVAL_TIME_THRESHOLD_SECS: u64 = 7200;
/// Projections less likely to succeed than this need sign-off.
pub const APPROVAL_SUCCESS_THRESHOLD: f64 = 0.5;
/// Most failure modes shown to an approver.
pub const MAX_KEY_RISKS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApproverRole {
    SeniorEngineer,
    TeamLead,
    AnyEngineer,
}

impl ApproverRole {
    pub fn for_risk(risk: RiskLevel) -> Self {
        match risk {
            RiskLevel::Critical => Self::SeniorEngineer,
            RiskLevel::High => Self::TeamLead,
            RiskLevel::Low | RiskLevel::Medium => Self::AnyEngineer,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SeniorEngineer => "senior_engineer",
            Self::TeamLead => "team_lead",
            Self::AnyEngineer => "any_engineer",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    Medium,
    High,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// The decision-relevant facts shown to an approver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalContext {
    pub plan_summary: String,
    pub estimated_time: String,
    pub estimated_cost: String,
    pub success_probability: String,
    pub risk_level: RiskLevel,
    /// At most [`MAX_KEY_RISKS`] entries.
    pub key_risks: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraint_violations: Vec<String>,
}

/// A request for human sign-off on a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub decision_id: String,
    pub plan_id: String,
    pub context: ApprovalContext,
    pub risk_level: RiskLevel,
    pub recommended_approver: ApproverRole,
    pub urgency: Urgency,
    /// Seconds the approver has before the request should be treated as denied.
    /// Enforcing it is up to the approval channel.
    pub timeout_secs: u64,
    pub created_at: DateTime<Utc>,
}

/// An external accept/deny.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub approved: bool,
    pub approver: String,
}

impl ApprovalDecision {
    pub fn approve(approver: impl Into<String>) -> Self {
        Self {
            approved: true,
            approver: approver.into(),
        }
    }

    pub fn deny(approver: impl Into<String>) -> Self {
        Self {
            approved: false,
            approver: approver.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionEntry {
    pub request: ApprovalRequest,
    pub approved: bool,
    pub approver: String,
    pub timestamp: DateTime<Utc>,
}

/// Decides when a human must sign off and builds the request they see.
#[derive(Default)]
pub struct ApprovalGate {
    /// Kept for later analysis; nothing reads it back during evaluation.
    history: Mutex<Vec<DecisionEntry>>,
}

impl ApprovalGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn should_request_approval(&self, plan: &Plan, projection: &ProjectionResult) -> bool {
        projection.risk_level.is_elevated()
            || plan.estimated_cost > APPROVAL_COST_THRESHOLD
            || plan.estimated_time > APPROVAL_TIME_THRESHOLD_SECS
            || projection.success_probability < APPROVAL_SUCCESS_THRESHOLD
    }

    pub fn create_approval_request(
        &self,
        plan: &Plan,
        projection: &ProjectionResult,
        violations: Option<&[Violation]>,
    ) -> ApprovalRequest {
        let risk = projection.risk_level;
        let created_at = Utc::now();
        let (urgency, timeout_secs) = match risk {
            RiskLevel::Critical => (Urgency::High, 300),
            _ => (Urgency::Medium, 1800),
        };

        let context = ApprovalContext {
            plan_summary: plan.description.clone(),
            estimated_time: format!("{} minutes", plan.estimated_time / 60),
            estimated_cost: format!("${:.2}", plan.estimated_cost),
            success_probability: format!("{:.0}%", projection.success_probability * 100.0),
            risk_level: risk,
            key_risks: projection
                .failure_modes
                .iter()
                .take(MAX_KEY_RISKS)
                .cloned()
                .collect(),
            constraint_violations: violations
                .unwrap_or_default()
                .iter()
                .map(|v| v.message.clone())
                .collect(),
        };

        ApprovalRequest {
            decision_id: format!("approval_{}_{}", plan.id, created_at.timestamp()),
            plan_id: plan.id.clone(),
            context,
            risk_level: risk,
            recommended_approver: ApproverRole::for_risk(risk),
            urgency,
            timeout_secs,
            created_at,
        }
    }

    pub fn record_decision(
        &self,
        request: &ApprovalRequest,
        approved: bool,
        approver: &str,
    ) -> DecisionEntry {
        let entry = DecisionEntry {
            request: request.clone(),
            approved,
            approver: approver.to_string(),
            timestamp: Utc::now(),
        };
        info!(
            decision_id = %request.decision_id,
            approved,
            approver,
            "recorded approval decision"
        );
        self.history.lock().push(entry.clone());
        entry
    }

    pub fn history(&self) -> Vec<DecisionEntry> {
        self.history.lock().clone()
    }
}

// ── Approval channels ──────────────────────────────────────────

/// Anything that can put an approval request in front of a human and report back.
/// The pipeline waits for `decide` to return.
#[async_trait]
pub trait ApprovalChannel: Send + Sync {
    async fn decide(&self, request: &ApprovalRequest) -> ApprovalDecision;
}

/// Adapter turning a `Fn(&ApprovalRequest) -> bool` into an [`ApprovalChannel`].
/// The recommended approver role is recorded as the approver.
pub struct FnApprover<F>(F);

pub fn approver_fn<F>(f: F) -> FnApprover<F>
where
    F: Fn(&ApprovalRequest) -> bool + Send + Sync,
{
    FnApprover(f)
}

#[async_trait]
impl<F> ApprovalChannel for FnApprover<F>
where
    F: Fn(&ApprovalRequest) -> bool + Send + Sync,
{
    async fn decide(&self, request: &ApprovalRequest) -> ApprovalDecision {
        ApprovalDecision {
            approved: (self.0)(request),
            approver: request.recommended_approver.as_str().to_string(),
        }
    }
}

pub type PendingApproval = (ApprovalRequest, oneshot::Sender<ApprovalDecision>);

/// Forwards requests over a queue to whoever holds the receiver and waits
/// for the reply, denying on timeout or when nobody is listening.
pub struct QueuedApprover {
    request_tx: mpsc::Sender<PendingApproval>,
    request_rx: Option<mpsc::Receiver<PendingApproval>>,
    timeout_override: Option<Duration>,
}

impl Default for QueuedApprover {
    fn default() -> Self {
        Self::new()
    }
}

impl QueuedApprover {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(64);
        Self {
            request_tx: tx,
            request_rx: Some(rx),
            timeout_override: None,
        }
    }

    /// Wait this long instead of the request's own timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_override = Some(timeout);
        self
    }

    /// Take the receiver (used by whatever surfaces requests to a human).
    pub fn take_receiver(&mut self) -> Option<mpsc::Receiver<PendingApproval>> {
        self.request_rx.take()
    }
}

#[async_trait]
impl ApprovalChannel for QueuedApprover {
    async fn decide(&self, request: &ApprovalRequest) -> ApprovalDecision {
        info!(
            decision_id = %request.decision_id,
            risk = %request.risk_level,
            approver = request.recommended_approver.as_str(),
            "requesting human approval"
        );

        let (response_tx, response_rx) = oneshot::channel();

        if self
            .request_tx
            .send((request.clone(), response_tx))
            .await
            .is_err()
        {
            // No one listening: deny
            return ApprovalDecision::deny("unavailable");
        }

        let timeout = self
            .timeout_override
            .unwrap_or_else(|| Duration::from_secs(request.timeout_secs));
        match tokio::time::timeout(timeout, response_rx).await {
            Ok(Ok(decision)) => decision,
            Ok(Err(_)) => ApprovalDecision::deny("unavailable"),
            Err(_) => {
                info!(decision_id = %request.decision_id, "approval request timed out");
                ApprovalDecision::deny("timeout")
            }
        }
    }
}
