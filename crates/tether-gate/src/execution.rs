use chrono::Utc;
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tether_core::{
    Event, EventBus, ExecutionResult, ExecutionStatus, Plan, Result, StepHandler, TetherError,
};

use crate::reliability::ReliabilityMonitor;

/// Progress notice handed to the per-step callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    pub plan_id: String,
    pub step_id: String,
    pub index: usize,
    pub action: String,
    pub success: bool,
    pub elapsed_secs: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub type StepCallback = Arc<dyn Fn(&StepReport) + Send + Sync>;

/// Finished runs kept in the run table before the oldest are evicted.
pub const DEFAULT_RUN_CAPACITY: usize = 1024;

struct RunState {
    run_id: u64,
    result: ExecutionResult,
    cancel: CancellationToken,
}

/// Identifies one run of a plan.
#[derive(Clone)]
struct RunTicket {
    run_id: u64,
    cancel: CancellationToken,
}

/// Runs plan steps in order and feeds every outcome into the reliability monitor.
///
/// Cloning is cheap; clones share handlers, run table, and monitor.
#[derive(Clone)]
pub struct ExecutionEngine {
    monitor: Arc<ReliabilityMonitor>,
    handlers: Arc<RwLock<HashMap<String, Arc<dyn StepHandler>>>>,
    /// Latest result per plan id. A new run of the same plan replaces the old entry.
    runs: Arc<DashMap<String, RunState>>,
    next_run: Arc<AtomicU64>,
    run_capacity: usize,
    events: Option<EventBus>,
}

impl ExecutionEngine {
    pub fn new(monitor: Arc<ReliabilityMonitor>) -> Self {
        Self {
            monitor,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            runs: Arc::new(DashMap::new()),
            next_run: Arc::new(AtomicU64::new(0)),
            run_capacity: DEFAULT_RUN_CAPACITY,
            events: None,
        }
    }

    /// Cap on finished runs kept for [`ExecutionEngine::status`]. Active runs are never evicted.
    pub fn with_run_capacity(mut self, capacity: usize) -> Self {
        self.run_capacity = capacity;
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn monitor(&self) -> &Arc<ReliabilityMonitor> {
        &self.monitor
    }

    /// Route steps named `action` to `handler`. The action is also registered
    /// as a tool with the monitor.
    pub fn register_handler(&self, action: impl Into<String>, handler: impl StepHandler + 'static) {
        let action = action.into();
        self.monitor.register(&action);
        debug!(action = %action, "registered step handler");
        self.handlers.write().insert(action, Arc::new(handler));
    }

    pub fn has_handler(&self, action: &str) -> bool {
        self.handlers.read().contains_key(action)
    }

    /// Registered action names, sorted.
    pub fn actions(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Run the plan to completion in the caller's task.
    pub async fn execute(&self, plan: &Plan, on_step: Option<StepCallback>) -> ExecutionResult {
        let ticket = self.begin(plan);
        self.run(plan, ticket, on_step).await
    }

    /// Run the plan on a background task. The run is visible through
    /// [`ExecutionEngine::status`] as soon as this returns.
    pub fn spawn(&self, plan: Plan, on_step: Option<StepCallback>) -> ExecutionHandle {
        let ticket = self.begin(&plan);
        let plan_id = plan.id.clone();
        let engine = self.clone();
        let run_ticket = ticket.clone();
        let join = tokio::spawn(async move { engine.run(&plan, run_ticket, on_step).await });
        info!(plan_id = %plan_id, "spawned background execution");
        ExecutionHandle {
            plan_id,
            engine: self.clone(),
            ticket,
            join,
        }
    }

    /// Snapshot of the latest run of a plan.
    pub fn status(&self, plan_id: &str) -> Option<ExecutionResult> {
        self.runs.get(plan_id).map(|r| r.result.clone())
    }

    /// Mark an active run as cancelled. Steps not yet started are skipped; a
    /// step already running is left to finish. Returns `false` when there is
    /// no active run for the plan.
    pub fn cancel_execution(&self, plan_id: &str) -> bool {
        self.cancel_run(plan_id, None)
    }

    fn cancel_run(&self, plan_id: &str, run_id: Option<u64>) -> bool {
        let Some(mut run) = self.runs.get_mut(plan_id) else {
            return false;
        };
        if run_id.is_some_and(|id| id != run.run_id) || run.result.status.is_terminal() {
            return false;
        }
        run.cancel.cancel();
        run.result.status = ExecutionStatus::Cancelled;
        drop(run);

        info!(plan_id, "execution cancelled");
        self.publish(Event::ExecutionCancelled {
            plan_id: plan_id.to_string(),
        });
        true
    }

    fn begin(&self, plan: &Plan) -> RunTicket {
        self.evict_finished();
        let ticket = RunTicket {
            run_id: self.next_run.fetch_add(1, Ordering::Relaxed),
            cancel: CancellationToken::new(),
        };
        let mut result = ExecutionResult::pending(plan.id.clone(), plan.steps.len());
        result.status = ExecutionStatus::Running;
        self.runs.insert(
            plan.id.clone(),
            RunState {
                run_id: ticket.run_id,
                result,
                cancel: ticket.cancel.clone(),
            },
        );
        ticket
    }

    async fn run(
        &self,
        plan: &Plan,
        ticket: RunTicket,
        on_step: Option<StepCallback>,
    ) -> ExecutionResult {
        let cancel = &ticket.cancel;
        let started = Instant::now();
        let mut result = ExecutionResult::pending(plan.id.clone(), plan.steps.len());
        result.status = ExecutionStatus::Running;

        info!(plan_id = %plan.id, steps = plan.steps.len(), "executing plan");

        for (index, step) in plan.steps.iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }

            let step_id = format!("{}_step_{}", plan.id, index);
            let action = step.action_name().to_string();
            let handler = self.handlers.read().get(&action).cloned();

            let report = match handler {
                None => {
                    let error = TetherError::UnknownAction(action.clone()).to_string();
                    warn!(plan_id = %plan.id, step = index, action = %action, "no handler for step");
                    result.errors.push(error.clone());
                    StepReport {
                        plan_id: plan.id.clone(),
                        step_id,
                        index,
                        action,
                        success: false,
                        elapsed_secs: 0.0,
                        error: Some(error),
                    }
                }
                Some(handler) => {
                    let step_started = Instant::now();
                    let outcome = match AssertUnwindSafe(handler.handle(step))
                        .catch_unwind()
                        .await
                    {
                        Ok(outcome) => outcome,
                        Err(panic) => Err(anyhow::anyhow!(
                            "handler panicked: {}",
                            panic_message(panic.as_ref())
                        )),
                    };
                    let elapsed = step_started.elapsed().as_secs_f64();
                    let success = outcome.is_ok();
                    self.monitor.record_execution(&action, success, elapsed);

                    match outcome {
                        Ok(output) => {
                            result.steps_completed += 1;
                            result.cost += output.cost;
                            result.outputs.insert(step_id.clone(), output.data);
                            StepReport {
                                plan_id: plan.id.clone(),
                                step_id,
                                index,
                                action,
                                success,
                                elapsed_secs: elapsed,
                                error: None,
                            }
                        }
                        Err(e) => {
                            let error = TetherError::StepExecution {
                                action: action.clone(),
                                reason: e.to_string(),
                            }
                            .to_string();
                            warn!(plan_id = %plan.id, step = index, error = %error, "step failed");
                            result.errors.push(error.clone());
                            StepReport {
                                plan_id: plan.id.clone(),
                                step_id,
                                index,
                                action,
                                success,
                                elapsed_secs: elapsed,
                                error: Some(error),
                            }
                        }
                    }
                }
            };

            self.publish(match &report.error {
                None => Event::StepCompleted {
                    plan_id: report.plan_id.clone(),
                    step_id: report.step_id.clone(),
                    action: report.action.clone(),
                    elapsed_secs: report.elapsed_secs,
                },
                Some(error) => Event::StepFailed {
                    plan_id: report.plan_id.clone(),
                    step_id: report.step_id.clone(),
                    action: report.action.clone(),
                    error: error.clone(),
                },
            });
            if let Some(ref callback) = on_step {
                if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(&report))) {
                    warn!(
                        plan_id = %plan.id,
                        step = index,
                        panic = panic_message(panic.as_ref()),
                        "step callback panicked"
                    );
                }
            }
            self.store_progress(&result, &ticket);

            if !report.success && step.critical {
                warn!(plan_id = %plan.id, step = index, "critical step failed, halting");
                break;
            }
        }

        let ended_at = Utc::now();
        result.status = if cancel.is_cancelled() {
            ExecutionStatus::Cancelled
        } else if result.errors.is_empty() && result.steps_completed == result.steps_total {
            ExecutionStatus::Success
        } else {
            ExecutionStatus::Failed
        };
        result.ended_at = Some(ended_at);
        result.duration_secs = started.elapsed().as_secs_f64();
        result.time_variance_secs = result.duration_secs - plan.estimated_time as f64;
        result.cost_variance = result.cost - plan.estimated_cost;

        info!(
            plan_id = %plan.id,
            status = %result.status,
            completed = result.steps_completed,
            total = result.steps_total,
            cost = result.cost,
            "execution finished"
        );

        self.store_progress(&result, &ticket);
        result
    }

    /// Drop the oldest finished runs until there is room for one more entry.
    fn evict_finished(&self) {
        if self.runs.len() < self.run_capacity {
            return;
        }
        let mut finished: Vec<(u64, String)> = self
            .runs
            .iter()
            .filter(|r| r.result.status.is_terminal())
            .map(|r| (r.run_id, r.key().clone()))
            .collect();
        finished.sort_unstable();

        let excess = self.runs.len() + 1 - self.run_capacity.max(1);
        for (run_id, plan_id) in finished.into_iter().take(excess) {
            self.runs
                .remove_if(&plan_id, |_, r| r.run_id == run_id && r.result.status.is_terminal());
            debug!(plan_id = %plan_id, "evicted finished run");
        }
    }

    fn store_progress(&self, result: &ExecutionResult, ticket: &RunTicket) {
        if let Some(mut run) = self.runs.get_mut(&result.plan_id) {
            // A newer run of the same plan owns the entry now.
            if run.run_id != ticket.run_id {
                return;
            }
            let mut snapshot = result.clone();
            if ticket.cancel.is_cancelled() && !snapshot.status.is_terminal() {
                snapshot.status = ExecutionStatus::Cancelled;
            }
            run.result = snapshot;
        }
    }

    fn publish(&self, event: Event) {
        if let Some(ref events) = self.events {
            events.publish(event);
        }
    }
}

/// A background run started by [`ExecutionEngine::spawn`].
pub struct ExecutionHandle {
    plan_id: String,
    engine: ExecutionEngine,
    ticket: RunTicket,
    join: JoinHandle<ExecutionResult>,
}

impl ExecutionHandle {
    pub fn plan_id(&self) -> &str {
        &self.plan_id
    }

    /// Snapshot of this run, or `None` once a newer run of the same plan replaced it.
    pub fn status(&self) -> Option<ExecutionResult> {
        self.engine
            .runs
            .get(&self.plan_id)
            .filter(|r| r.run_id == self.ticket.run_id)
            .map(|r| r.result.clone())
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub fn cancel(&self) -> bool {
        self.engine
            .cancel_run(&self.plan_id, Some(self.ticket.run_id))
    }

    /// Block until the run ends.
    pub async fn wait(self) -> Result<ExecutionResult> {
        self.join
            .await
            .map_err(|e| TetherError::Pipeline(format!("execution task failed: {e}")))
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
