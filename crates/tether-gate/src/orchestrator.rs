use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use tether_config::TetherConfig;
use tether_core::{
    Constraint, DecisionRecord, Event, EventBus, ExecutionRecord, ExecutionResult,
    ExecutionStatus, HistoryStore, Plan, ProjectionResult, Result, RiskLevel, TetherError,
    ToolHealth,
};

use crate::approval::{ApprovalChannel, ApprovalGate, ApprovalRequest};
use crate::constraint::{ConstraintValidator, Suggestions};
use crate::execution::{ExecutionEngine, StepCallback};
use crate::reliability::{
    DEFAULT_PERFORMANCE_THRESHOLD_SECS, DEFAULT_RELIABILITY_THRESHOLD, ReliabilityMonitor,
};
use crate::simulator::ScenarioSimulator;

pub const DEFAULT_PATH_COUNT: usize = 3;

pub const REASON_CONSTRAINT_VIOLATIONS: &str = "constraint violations";
pub const REASON_APPROVAL_DENIED: &str = "human approval denied";
pub const REASON_AWAITING_APPROVAL: &str = "awaiting human approval";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Pending,
    Validating,
    Simulating,
    AwaitingApproval,
    Approved,
    Rejected,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

impl PipelineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Validating => "validating",
            Self::Simulating => "simulating",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Legal forward edges of the pipeline. Any non-final state may also fail.
    pub fn can_transition_to(&self, next: PipelineStatus) -> bool {
        use PipelineStatus::*;
        match (*self, next) {
            (Pending, Validating)
            | (Validating, Rejected | Simulating)
            | (Simulating, AwaitingApproval | Approved)
            | (AwaitingApproval, Approved | Rejected)
            | (Approved, Executing)
            | (Executing, Completed | Cancelled) => true,
            (Rejected | Completed | Failed | Cancelled, _) => false,
            (_, Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationStage {
    pub valid: bool,
    pub violations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationStage {
    pub paths_explored: usize,
    pub recommended_path: Option<String>,
    /// Success probability of the chosen projection.
    pub success_probability: f64,
    pub risk_level: RiskLevel,
    pub projections: Vec<ProjectionResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalStage {
    pub request: ApprovalRequest,
    /// `None` while no decision channel has answered.
    pub approved: Option<bool>,
    pub approver: Option<String>,
}

/// Per-stage detail; a stage that never ran stays `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stages {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraint_validation: Option<ValidationStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub simulation: Option<SimulationStage>,
    /// Present only when the plan needed sign-off.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval: Option<ApprovalStage>,
}

/// Terminal outcome of one pass through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub plan_id: String,
    pub status: PipelineStatus,
    pub timestamp: DateTime<Utc>,
    pub stages: Stages,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Suggestions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_projection: Option<ProjectionResult>,
    /// Approved with no execution collaborator supplied.
    pub ready_for_execution: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PipelineResult {
    fn new(plan_id: &str) -> Self {
        Self {
            plan_id: plan_id.to_string(),
            status: PipelineStatus::Pending,
            timestamp: Utc::now(),
            stages: Stages::default(),
            reason: None,
            suggestions: None,
            best_projection: None,
            ready_for_execution: false,
            execution: None,
            error: None,
        }
    }

    pub fn approval_required(&self) -> bool {
        self.stages.approval.is_some()
    }

    fn fail(&mut self, e: TetherError) {
        error!(plan_id = %self.plan_id, error = %e, "pipeline failed");
        self.status = PipelineStatus::Failed;
        self.ready_for_execution = false;
        self.error = Some(match self.error.take() {
            Some(previous) => format!("{previous}; {e}"),
            None => e.to_string(),
        });
    }

    fn advance(&mut self, next: PipelineStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(TetherError::Pipeline(format!(
                "illegal transition {} -> {}",
                self.status, next
            )));
        }
        debug!(plan_id = %self.plan_id, from = %self.status, to = %next, "pipeline transition");
        self.status = next;
        Ok(())
    }
}

/// Optional collaborators for one evaluation.
#[derive(Default, Clone)]
pub struct PipelineOptions<'a> {
    pub approver: Option<&'a dyn ApprovalChannel>,
    pub engine: Option<&'a ExecutionEngine>,
    pub on_step: Option<StepCallback>,
}

impl<'a> PipelineOptions<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_approver(mut self, approver: &'a dyn ApprovalChannel) -> Self {
        self.approver = Some(approver);
        self
    }

    pub fn with_engine(mut self, engine: &'a ExecutionEngine) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn on_step(mut self, callback: StepCallback) -> Self {
        self.on_step = Some(callback);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealth {
    pub timestamp: DateTime<Utc>,
    pub total_runs: usize,
    pub unreliable_tools: Vec<String>,
    pub constraint_violations: usize,
    pub approval_rate: f64,
    pub tools: Vec<ToolHealth>,
}

pub struct OrchestratorBuilder {
    constraints: Vec<Constraint>,
    path_count: usize,
    threshold: f64,
    performance_threshold: f64,
    tools: Vec<String>,
    store: Option<Arc<dyn HistoryStore>>,
    events: Option<EventBus>,
    persist_executions: bool,
    persist_health: bool,
}

impl OrchestratorBuilder {
    pub fn new(constraints: Vec<Constraint>) -> Self {
        Self {
            constraints,
            path_count: DEFAULT_PATH_COUNT,
            threshold: DEFAULT_RELIABILITY_THRESHOLD,
            performance_threshold: DEFAULT_PERFORMANCE_THRESHOLD_SECS,
            tools: Vec::new(),
            store: None,
            events: None,
            persist_executions: true,
            persist_health: true,
        }
    }

    pub fn from_config(config: &TetherConfig) -> Self {
        Self {
            path_count: config.simulation.paths,
            threshold: config.reliability.threshold,
            performance_threshold: config.reliability.performance_threshold_secs,
            tools: config.reliability.tools.clone(),
            persist_executions: config.store.persist_executions,
            persist_health: config.store.persist_health,
            ..Self::new(config.constraints())
        }
    }

    pub fn path_count(mut self, paths: usize) -> Self {
        self.path_count = paths;
        self
    }

    pub fn reliability_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn performance_threshold(mut self, secs: f64) -> Self {
        self.performance_threshold = secs;
        self
    }

    /// Tools to register with the monitor up front.
    pub fn tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools.extend(tools.into_iter().map(Into::into));
        self
    }

    pub fn store(mut self, store: Arc<dyn HistoryStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn persist(mut self, executions: bool, health: bool) -> Self {
        self.persist_executions = executions;
        self.persist_health = health;
        self
    }

    pub fn build(self) -> Orchestrator {
        let events = self.events.unwrap_or_default();
        let monitor = Arc::new(
            ReliabilityMonitor::new(self.threshold)
                .with_performance_threshold(self.performance_threshold)
                .with_events(events.clone()),
        );
        for tool in &self.tools {
            monitor.register(tool);
        }
        let engine = ExecutionEngine::new(Arc::clone(&monitor)).with_events(events.clone());

        Orchestrator {
            validator: ConstraintValidator::new(self.constraints),
            simulator: ScenarioSimulator::new(),
            gate: ApprovalGate::new(),
            monitor,
            engine,
            events,
            store: self.store,
            path_count: self.path_count,
            persist_executions: self.persist_executions,
            persist_health: self.persist_health,
            run_log: Mutex::new(Vec::new()),
        }
    }
}

/// Takes a plan through validation, simulation, approval, and optionally
/// execution, producing one terminal [`PipelineResult`] per call.
pub struct Orchestrator {
    validator: ConstraintValidator,
    simulator: ScenarioSimulator,
    gate: ApprovalGate,
    monitor: Arc<ReliabilityMonitor>,
    engine: ExecutionEngine,
    events: EventBus,
    store: Option<Arc<dyn HistoryStore>>,
    path_count: usize,
    persist_executions: bool,
    persist_health: bool,
    run_log: Mutex<Vec<PipelineResult>>,
}

impl Orchestrator {
    pub fn new(constraints: Vec<Constraint>) -> Self {
        OrchestratorBuilder::new(constraints).build()
    }

    pub fn builder(constraints: Vec<Constraint>) -> OrchestratorBuilder {
        OrchestratorBuilder::new(constraints)
    }

    pub fn validator(&self) -> &ConstraintValidator {
        &self.validator
    }

    pub fn simulator(&self) -> &ScenarioSimulator {
        &self.simulator
    }

    pub fn gate(&self) -> &ApprovalGate {
        &self.gate
    }

    pub fn monitor(&self) -> &Arc<ReliabilityMonitor> {
        &self.monitor
    }

    /// Engine wired to this orchestrator's monitor and event bus.
    pub fn execution_engine(&self) -> &ExecutionEngine {
        &self.engine
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn store(&self) -> Option<&Arc<dyn HistoryStore>> {
        self.store.as_ref()
    }

    /// Run the plan through the pipeline. Never fails: unexpected errors end
    /// the run as [`PipelineStatus::Failed`] with the message in `error`.
    pub async fn evaluate(&self, plan: &Plan, options: PipelineOptions<'_>) -> PipelineResult {
        info!(plan_id = %plan.id, steps = plan.steps.len(), "evaluating plan");
        self.publish(Event::PlanReceived {
            plan_id: plan.id.clone(),
            steps: plan.steps.len(),
        });

        let mut result = PipelineResult::new(&plan.id);
        if let Err(e) = self.run_stages(plan, &options, &mut result).await {
            result.fail(e);
        }
        if let Err(e) = self.persist_result(plan, &result) {
            result.fail(e);
        }

        info!(plan_id = %plan.id, status = %result.status, "pipeline finished");
        self.publish(Event::PipelineFinished {
            plan_id: plan.id.clone(),
            status: result.status.as_str().to_string(),
        });
        self.run_log.lock().push(result.clone());
        result
    }

    async fn run_stages(
        &self,
        plan: &Plan,
        options: &PipelineOptions<'_>,
        result: &mut PipelineResult,
    ) -> Result<()> {
        result.advance(PipelineStatus::Validating)?;
        if let Some(store) = self.persisting_store() {
            store.save_plan(plan)?;
        }

        let (valid, violations) = self.validator.validate(plan);
        result.stages.constraint_validation = Some(ValidationStage {
            valid,
            violations: violations.iter().map(|v| v.message.clone()).collect(),
        });
        if !valid {
            result.advance(PipelineStatus::Rejected)?;
            result.reason = Some(REASON_CONSTRAINT_VIOLATIONS.into());
            result.suggestions = Some(self.validator.suggest_modifications(plan, &violations));
            self.publish(Event::PlanRejected {
                plan_id: plan.id.clone(),
                reason: REASON_CONSTRAINT_VIOLATIONS.into(),
            });
            return Ok(());
        }

        result.advance(PipelineStatus::Simulating)?;
        let projections = self.simulator.simulate(plan, self.path_count)?;
        let best = best_projection(&projections)
            .cloned()
            .ok_or_else(|| TetherError::Pipeline("simulation produced no projections".into()))?;
        debug!(
            plan_id = %plan.id,
            path_id = %best.path_id,
            success_probability = best.success_probability,
            "chose projection"
        );
        self.publish(Event::ProjectionChosen {
            plan_id: plan.id.clone(),
            path_id: best.path_id.clone(),
            success_probability: best.success_probability,
            risk_level: best.risk_level,
        });
        result.stages.simulation = Some(SimulationStage {
            paths_explored: projections.len(),
            recommended_path: projections
                .iter()
                .find(|p| p.recommended)
                .map(|p| p.path_id.clone()),
            success_probability: best.success_probability,
            risk_level: best.risk_level,
            projections,
        });
        result.best_projection = Some(best.clone());

        if self.gate.should_request_approval(plan, &best) {
            result.advance(PipelineStatus::AwaitingApproval)?;
            let request = self.gate.create_approval_request(plan, &best, None);
            self.publish(Event::ApprovalRequested {
                decision_id: request.decision_id.clone(),
                plan_id: plan.id.clone(),
                risk_level: request.risk_level,
            });

            let Some(approver) = options.approver else {
                info!(plan_id = %plan.id, decision_id = %request.decision_id, "approval required, no channel supplied");
                result.reason = Some(REASON_AWAITING_APPROVAL.into());
                result.stages.approval = Some(ApprovalStage {
                    request,
                    approved: None,
                    approver: None,
                });
                return Ok(());
            };

            let decision = approver.decide(&request).await;
            self.gate
                .record_decision(&request, decision.approved, &decision.approver);
            if let Some(store) = self.persisting_store() {
                store.save_approval_decision(&DecisionRecord {
                    decision_id: request.decision_id.clone(),
                    plan_id: plan.id.clone(),
                    timestamp: Utc::now(),
                    approved: decision.approved,
                    approver: decision.approver.clone(),
                    risk_level: request.risk_level,
                    urgency: request.urgency.as_str().to_string(),
                    context: serde_json::to_value(&request.context)?,
                })?;
            }
            self.publish(if decision.approved {
                Event::ApprovalGranted {
                    decision_id: request.decision_id.clone(),
                    approver: decision.approver.clone(),
                }
            } else {
                Event::ApprovalDenied {
                    decision_id: request.decision_id.clone(),
                    approver: decision.approver.clone(),
                }
            });
            result.stages.approval = Some(ApprovalStage {
                request,
                approved: Some(decision.approved),
                approver: Some(decision.approver),
            });

            if !decision.approved {
                result.advance(PipelineStatus::Rejected)?;
                result.reason = Some(REASON_APPROVAL_DENIED.into());
                self.publish(Event::PlanRejected {
                    plan_id: plan.id.clone(),
                    reason: REASON_APPROVAL_DENIED.into(),
                });
                return Ok(());
            }
        }
        result.advance(PipelineStatus::Approved)?;

        let Some(engine) = options.engine else {
            result.ready_for_execution = true;
            return Ok(());
        };

        result.advance(PipelineStatus::Executing)?;
        let execution = engine.execute(plan, options.on_step.clone()).await;
        result.advance(match execution.status {
            ExecutionStatus::Success => PipelineStatus::Completed,
            ExecutionStatus::Cancelled => PipelineStatus::Cancelled,
            _ => PipelineStatus::Failed,
        })?;
        if !execution.errors.is_empty() {
            warn!(plan_id = %plan.id, errors = execution.errors.len(), "execution reported errors");
        }
        result.execution = Some(execution);

        if self.persist_health {
            if let Some(ref store) = self.store {
                for health in engine.monitor().all_health() {
                    store.save_tool_health(&health.tool_name, &health)?;
                }
            }
        }
        Ok(())
    }

    fn persisting_store(&self) -> Option<&Arc<dyn HistoryStore>> {
        self.store.as_ref().filter(|_| self.persist_executions)
    }

    fn persist_result(&self, plan: &Plan, result: &PipelineResult) -> Result<()> {
        let Some(store) = self.persisting_store() else {
            return Ok(());
        };
        let approval = result.stages.approval.as_ref();
        let record = ExecutionRecord {
            plan_id: plan.id.clone(),
            status: result.status.as_str().to_string(),
            timestamp: result.timestamp,
            description: plan.description.clone(),
            estimated_time: plan.estimated_time,
            estimated_cost: plan.estimated_cost,
            success_probability: result.best_projection.as_ref().map(|p| p.success_probability),
            risk_level: result.best_projection.as_ref().map(|p| p.risk_level),
            approved: approval.and_then(|a| a.approved),
            approver: approval.and_then(|a| a.approver.clone()),
            actual_cost: result.execution.as_ref().map(|e| e.cost),
            duration_secs: result.execution.as_ref().map(|e| e.duration_secs),
            result_data: serde_json::to_value(result)?,
        };
        store.save_execution(&record)
    }

    /// Every terminal result produced so far, oldest first.
    pub fn run_log(&self) -> Vec<PipelineResult> {
        self.run_log.lock().clone()
    }

    /// Fraction of logged runs that needed human sign-off.
    pub fn approval_rate(&self) -> f64 {
        let log = self.run_log.lock();
        if log.is_empty() {
            return 0.0;
        }
        let required = log.iter().filter(|r| r.approval_required()).count();
        required as f64 / log.len() as f64
    }

    pub fn system_health(&self) -> SystemHealth {
        SystemHealth {
            timestamp: Utc::now(),
            total_runs: self.run_log.lock().len(),
            unreliable_tools: self.monitor.get_unreliable_tools(),
            constraint_violations: self.validator.violation_count(),
            approval_rate: self.approval_rate(),
            tools: self.monitor.all_health(),
        }
    }

    fn publish(&self, event: Event) {
        self.events.publish(event);
    }
}

/// Highest success probability; the earliest path wins ties.
pub fn best_projection(projections: &[ProjectionResult]) -> Option<&ProjectionResult> {
    projections.iter().fold(None, |best, p| match best {
        Some(b) if b.success_probability >= p.success_probability => Some(b),
        _ => Some(p),
    })
}
