//! Demo handlers for the three typed step actions.
//!
//! They do no real work: each one reports the fixed cost of its action and a
//! small JSON summary, optionally after a simulated delay.

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

use tether_core::{Step, StepAction, StepHandler, StepOutput};

use crate::execution::ExecutionEngine;

/// Cost of scraping one item.
pub const SCRAPE_COST_PER_ITEM: f64 = 0.01;
pub const ANALYZE_COST: f64 = 0.50;
pub const REPORT_COST: f64 = 0.10;

/// Action names covered by [`register_builtin_handlers`].
pub const BUILTIN_ACTIONS: [&str; 3] = ["scrape", "analyze", "report"];

#[derive(Debug, Clone, Default)]
pub struct ScrapeHandler {
    latency: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct AnalyzeHandler {
    latency: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct ReportHandler {
    latency: Duration,
}

impl ScrapeHandler {
    pub fn with_latency(latency: Duration) -> Self {
        Self { latency }
    }
}

impl AnalyzeHandler {
    pub fn with_latency(latency: Duration) -> Self {
        Self { latency }
    }
}

impl ReportHandler {
    pub fn with_latency(latency: Duration) -> Self {
        Self { latency }
    }
}

async fn pause(latency: Duration) {
    if !latency.is_zero() {
        tokio::time::sleep(latency).await;
    }
}

#[async_trait]
impl StepHandler for ScrapeHandler {
    async fn handle(&self, step: &Step) -> anyhow::Result<StepOutput> {
        let StepAction::Scrape { count } = step.action else {
            anyhow::bail!("scrape handler cannot run `{}`", step.action_name());
        };
        pause(self.latency).await;
        Ok(StepOutput::new(
            SCRAPE_COST_PER_ITEM * f64::from(count),
            json!({ "items": count }),
        ))
    }
}

#[async_trait]
impl StepHandler for AnalyzeHandler {
    async fn handle(&self, step: &Step) -> anyhow::Result<StepOutput> {
        let StepAction::Analyze { ref method } = step.action else {
            anyhow::bail!("analyze handler cannot run `{}`", step.action_name());
        };
        pause(self.latency).await;
        Ok(StepOutput::new(
            ANALYZE_COST,
            json!({ "method": method, "status": "analyzed" }),
        ))
    }
}

#[async_trait]
impl StepHandler for ReportHandler {
    async fn handle(&self, step: &Step) -> anyhow::Result<StepOutput> {
        let StepAction::Report { ref format } = step.action else {
            anyhow::bail!("report handler cannot run `{}`", step.action_name());
        };
        pause(self.latency).await;
        Ok(StepOutput::new(
            REPORT_COST,
            json!({ "format": format, "path": format!("report.{format}") }),
        ))
    }
}

/// Register `scrape`, `analyze`, and `report` on the engine.
pub fn register_builtin_handlers(engine: &ExecutionEngine, latency: Duration) {
    let [scrape, analyze, report] = BUILTIN_ACTIONS;
    engine.register_handler(scrape, ScrapeHandler::with_latency(latency));
    engine.register_handler(analyze, AnalyzeHandler::with_latency(latency));
    engine.register_handler(report, ReportHandler::with_latency(latency));
}
