use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use std::sync::Arc;
use tokio::sync::broadcast;

use crate::types::RiskLevel;

/// Events emitted while plans move through the gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    // ── Pipeline lifecycle ─────────────────────────────────────
    PlanReceived {
        plan_id: String,
        steps: usize,
    },
    PlanRejected {
        plan_id: String,
        reason: String,
    },
    ProjectionChosen {
        plan_id: String,
        path_id: String,
        success_probability: f64,
        risk_level: RiskLevel,
    },
    PipelineFinished {
        plan_id: String,
        status: String,
    },

    // ── Approval lifecycle ─────────────────────────────────────
    ApprovalRequested {
        decision_id: String,
        plan_id: String,
        risk_level: RiskLevel,
    },
    ApprovalGranted {
        decision_id: String,
        approver: String,
    },
    ApprovalDenied {
        decision_id: String,
        approver: String,
    },

    // ── Execution lifecycle ────────────────────────────────────
    StepCompleted {
        plan_id: String,
        step_id: String,
        action: String,
        elapsed_secs: f64,
    },
    StepFailed {
        plan_id: String,
        step_id: String,
        action: String,
        error: String,
    },
    ExecutionCancelled {
        plan_id: String,
    },

    // ── Tool health ────────────────────────────────────────────
    ToolAlert {
        tool: String,
        alert_type: String,
        value: f64,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus handed to every component that reports progress.
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<Event>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn publish(&self, event: Event) {
        // Ignore send errors (no subscribers).
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
