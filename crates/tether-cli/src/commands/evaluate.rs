use async_trait::async_trait;
use console::style;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use tether_config::TetherConfig;
use tether_core::{ExecutionStatus, Plan, Result, TetherError};
use tether_gate::{
    ApprovalChannel, ApprovalDecision, ApprovalRequest, OrchestratorBuilder, PipelineOptions,
    PipelineResult, PipelineStatus, StepCallback, StepReport, approver_fn,
    register_builtin_handlers,
};
use tether_store::SqliteStore;

use super::ApprovalMode;

/// Simulated latency of each built-in step handler.
const BUILTIN_STEP_LATENCY: Duration = Duration::from_millis(100);

/// Asks the operator at the terminal.
struct ConsoleApprover {
    approver: String,
}

impl ConsoleApprover {
    fn new() -> Self {
        let approver = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "operator".into());
        Self { approver }
    }
}

#[async_trait]
impl ApprovalChannel for ConsoleApprover {
    async fn decide(&self, request: &ApprovalRequest) -> ApprovalDecision {
        print_request(request);

        let prompt = format!("Approve plan {}?", request.plan_id);
        let answer = tokio::task::spawn_blocking(move || {
            dialoguer::Confirm::with_theme(&dialoguer::theme::ColorfulTheme::default())
                .with_prompt(prompt)
                .default(false)
                .interact()
        })
        .await;

        match answer {
            Ok(Ok(true)) => ApprovalDecision::approve(self.approver.clone()),
            Ok(Ok(false)) => ApprovalDecision::deny(self.approver.clone()),
            Ok(Err(e)) => {
                warn!(error = %e, "approval prompt failed, denying");
                ApprovalDecision::deny(self.approver.clone())
            }
            Err(e) => {
                warn!(error = %e, "approval prompt task failed, denying");
                ApprovalDecision::deny(self.approver.clone())
            }
        }
    }
}

fn print_request(request: &ApprovalRequest) {
    let ctx = &request.context;
    println!();
    println!("{}", style("Human approval required").yellow().bold());
    println!("  plan:        {}", ctx.plan_summary);
    println!("  time:        {}", ctx.estimated_time);
    println!("  cost:        {}", ctx.estimated_cost);
    println!("  success:     {}", ctx.success_probability);
    println!("  risk:        {}", request.risk_level);
    println!(
        "  approver:    {} ({} urgency, {}s to answer)",
        request.recommended_approver.as_str(),
        request.urgency.as_str(),
        request.timeout_secs
    );
    for risk in &ctx.key_risks {
        println!("  ⚠️  {risk}");
    }
    println!();
}

/// Run one plan file through the gate.
pub(super) async fn cmd_evaluate(
    config: TetherConfig,
    plan_path: PathBuf,
    mode: ApprovalMode,
    execute: bool,
    json: bool,
) -> Result<()> {
    let plan = Plan::from_path(&plan_path)?;
    info!(plan_id = %plan.id, path = ?plan_path, "evaluating plan");

    let store = Arc::new(SqliteStore::open(&config.store.resolved_path())?);
    let orchestrator = OrchestratorBuilder::from_config(&config).store(store).build();
    let engine = orchestrator.execution_engine().clone();
    register_builtin_handlers(&engine, BUILTIN_STEP_LATENCY);

    let approver: Box<dyn ApprovalChannel> = match mode {
        ApprovalMode::Approve => Box::new(approver_fn(|_| true)),
        ApprovalMode::Deny => Box::new(approver_fn(|_| false)),
        ApprovalMode::Prompt => Box::new(ConsoleApprover::new()),
    };

    let mut options = PipelineOptions::new().with_approver(approver.as_ref());
    if execute {
        options = options.with_engine(&engine);
        if !json {
            let progress: StepCallback = Arc::new(|report: &StepReport| print_step(report));
            options = options.on_step(progress);
        }
    }

    let result = orchestrator.evaluate(&plan, options).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }

    match (result.status, result.error) {
        (PipelineStatus::Failed, Some(error)) => Err(TetherError::Pipeline(error)),
        _ => Ok(()),
    }
}

fn print_step(report: &StepReport) {
    let mark = if report.success {
        style("✓").green()
    } else {
        style("✗").red()
    };
    print!(
        "  {mark} step {} {} ({:.2}s)",
        report.index, report.action, report.elapsed_secs
    );
    match report.error {
        Some(ref e) => println!(": {e}"),
        None => println!(),
    }
}

fn print_result(result: &PipelineResult) {
    let status = match result.status {
        PipelineStatus::Approved | PipelineStatus::Completed => {
            style(result.status.as_str()).green().bold()
        }
        PipelineStatus::Rejected | PipelineStatus::Failed => {
            style(result.status.as_str()).red().bold()
        }
        _ => style(result.status.as_str()).yellow().bold(),
    };
    println!();
    println!("{status}  plan {}", result.plan_id);

    if let Some(ref validation) = result.stages.constraint_validation {
        if validation.valid {
            println!("  constraints: passed");
        } else {
            println!("  constraints: {} violation(s)", validation.violations.len());
            for v in &validation.violations {
                println!("    - {v}");
            }
        }
    }

    if let Some(ref sim) = result.stages.simulation {
        println!(
            "  simulation:  {} paths, recommended {} ({:.0}% success, {} risk)",
            sim.paths_explored,
            sim.recommended_path.as_deref().unwrap_or("-"),
            sim.success_probability * 100.0,
            sim.risk_level
        );
    }

    if let Some(ref approval) = result.stages.approval {
        let outcome = match (approval.approved, approval.approver.as_deref()) {
            (Some(true), Some(who)) => format!("granted by {who}"),
            (Some(false), Some(who)) => format!("denied by {who}"),
            (Some(true), None) => "granted".to_string(),
            (Some(false), None) => "denied".to_string(),
            (None, _) => "pending".to_string(),
        };
        println!(
            "  approval:    {outcome} (decision {})",
            approval.request.decision_id
        );
    }

    if let Some(ref exec) = result.execution {
        let exec_status = match exec.status {
            ExecutionStatus::Success => style(exec.status.as_str()).green(),
            ExecutionStatus::Failed => style(exec.status.as_str()).red(),
            _ => style(exec.status.as_str()).yellow(),
        };
        println!(
            "  execution:   {exec_status}, {}/{} steps, ${:.2} ({:+.2} vs estimate), {:.2}s",
            exec.steps_completed, exec.steps_total, exec.cost, exec.cost_variance, exec.duration_secs
        );
        for e in &exec.errors {
            println!("    - {e}");
        }
    } else if result.ready_for_execution {
        println!("  execution:   ready (rerun with --execute to run the steps)");
    }

    if let Some(ref reason) = result.reason {
        println!("  reason:      {reason}");
    }

    if let Some(ref suggestions) = result.suggestions {
        println!("  suggestions:");
        for m in &suggestions.modifications {
            println!("    💡 {}: {}", m.reason, m.suggestion);
        }
    }

    if let Some(ref error) = result.error {
        println!("  error:       {}", style(error).red());
    }
}
