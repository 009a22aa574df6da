use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use tether_core::{Plan, ProjectionResult, Result, RiskLevel, TetherError};

const RATE_LIMITED: &str = "API rate limiting exceeded";
const SERVICE_DOWN: &str = "External service downtime";
const DATA_QUALITY: &str = "Data quality degradation";
const NETWORK_TIMEOUT: &str = "Timeout due to network latency";
const PARTIAL_DATA: &str = "Partial data retrieval";
const INTERRUPTION: &str = "Long-running task interruption risk";
const COORDINATION: &str = "Complex workflow coordination failure";

/// Plans longer than this carry an interruption risk.
const LONG_RUNNING_SECS: u64 = 3600;
/// Plans with more steps than this carry a coordination risk.
const MANY_STEPS: usize = 10;

/// Cascading effects keyed by the failure mode that triggers them.
const SECOND_ORDER: [(&str, [&str; 2]); 3] = [
    (
        RATE_LIMITED,
        [
            "Downstream services may queue requests, causing delays",
            "Potential cost spillover to next billing cycle",
        ],
    ),
    (
        DATA_QUALITY,
        [
            "Invalid results may propagate to dependent systems",
            "Manual cleanup effort required",
        ],
    ),
    (
        INTERRUPTION,
        [
            "Partial state may require rollback procedures",
            "Resource cleanup needed to prevent leaks",
        ],
    ),
];

/// Shape of one projected path before it is applied to a plan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathProfile {
    pub success_probability: f64,
    pub time_multiplier: f64,
    pub cost_multiplier: f64,
    pub risk_level: RiskLevel,
}

impl PathProfile {
    /// Profile for the path at `index`.
    ///
    /// Paths 0-2 are the optimistic, realistic, and pessimistic cases. Every
    /// path after that is one notch worse than the one before it: success
    /// drops by 0.15 (floored at 0.05), time grows by 0.5x, cost by 0.3x, and
    /// the risk tier is critical.
    pub fn for_index(index: usize) -> Self {
        match index {
            0 => Self {
                success_probability: 0.85,
                time_multiplier: 1.0,
                cost_multiplier: 1.0,
                risk_level: RiskLevel::Low,
            },
            1 => Self {
                success_probability: 0.65,
                time_multiplier: 1.3,
                cost_multiplier: 1.2,
                risk_level: RiskLevel::Medium,
            },
            2 => Self {
                success_probability: 0.40,
                time_multiplier: 1.8,
                cost_multiplier: 1.5,
                risk_level: RiskLevel::High,
            },
            n => {
                let extra = (n - 2) as f64;
                Self {
                    success_probability: (0.40 - 0.15 * extra).max(0.05),
                    time_multiplier: 1.8 + 0.5 * extra,
                    cost_multiplier: 1.5 + 0.3 * extra,
                    risk_level: RiskLevel::Critical,
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationRecord {
    pub plan_id: String,
    pub timestamp: DateTime<Utc>,
    pub results: Vec<ProjectionResult>,
}

/// Projects several risk-weighted outcomes for a plan.
#[derive(Default)]
pub struct ScenarioSimulator {
    history: Mutex<Vec<SimulationRecord>>,
}

impl ScenarioSimulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Produce exactly `path_count` projections, exactly one of them recommended
    /// (the realistic path, or the only path when `path_count == 1`).
    pub fn simulate(&self, plan: &Plan, path_count: usize) -> Result<Vec<ProjectionResult>> {
        if path_count == 0 {
            return Err(TetherError::InvalidInput(
                "simulation needs at least one path".into(),
            ));
        }
        let recommended_index = if path_count == 1 { 0 } else { 1 };

        let results: Vec<ProjectionResult> = (0..path_count)
            .map(|i| {
                let profile = PathProfile::for_index(i);
                let failure_modes = identify_failure_modes(plan, profile.risk_level);
                let second_order_effects = second_order_effects(&failure_modes);
                ProjectionResult {
                    path_id: format!("{}_path_{}", plan.id, i),
                    success_probability: profile.success_probability,
                    estimated_time: (plan.estimated_time as f64 * profile.time_multiplier) as u64,
                    estimated_cost: plan.estimated_cost * profile.cost_multiplier,
                    risk_level: profile.risk_level,
                    failure_modes,
                    second_order_effects,
                    recommended: i == recommended_index,
                }
            })
            .collect();

        debug!(plan_id = %plan.id, paths = path_count, "simulated plan");

        self.history.lock().push(SimulationRecord {
            plan_id: plan.id.clone(),
            timestamp: Utc::now(),
            results: results.clone(),
        });

        Ok(results)
    }

    pub fn history(&self) -> Vec<SimulationRecord> {
        self.history.lock().clone()
    }
}

fn identify_failure_modes(plan: &Plan, risk: RiskLevel) -> Vec<String> {
    let mut modes = Vec::new();

    if matches!(risk, RiskLevel::High | RiskLevel::Critical) {
        modes.extend([RATE_LIMITED, SERVICE_DOWN, DATA_QUALITY]);
    }
    if matches!(risk, RiskLevel::Medium | RiskLevel::High) {
        modes.extend([NETWORK_TIMEOUT, PARTIAL_DATA]);
    }
    if plan.estimated_time > LONG_RUNNING_SECS {
        modes.push(INTERRUPTION);
    }
    if plan.steps.len() > MANY_STEPS {
        modes.push(COORDINATION);
    }

    modes.into_iter().map(String::from).collect()
}

fn second_order_effects(failure_modes: &[String]) -> Vec<String> {
    SECOND_ORDER
        .iter()
        .filter(|(mode, _)| failure_modes.iter().any(|m| m == mode))
        .flat_map(|(_, effects)| effects.iter().map(|e| e.to_string()))
        .collect()
}
