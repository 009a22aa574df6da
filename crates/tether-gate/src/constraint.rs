use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

use tether_core::{Constraint, ConstraintKind, ConstraintLimit, Plan};

/// Checks run in this order regardless of how constraints were supplied.
const CHECK_ORDER: [ConstraintKind; 3] = [
    ConstraintKind::Duration,
    ConstraintKind::Budget,
    ConstraintKind::Permissions,
];

/// A single failed constraint check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub kind: ConstraintKind,
    pub message: String,
    pub hard: bool,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// One entry of the violation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViolationLogEntry {
    pub plan_id: String,
    pub timestamp: DateTime<Utc>,
    pub violations: Vec<Violation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Remediation {
    ReduceScope,
    OptimizeCost,
    RequestPermissions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Modification {
    #[serde(rename = "type")]
    pub remediation: Remediation,
    pub reason: String,
    pub suggestion: String,
}

/// Advisory remediations for a rejected plan. Purely informational.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestions {
    pub original_plan: String,
    pub modifications: Vec<Modification>,
}

/// Validates plans against static real-world limits.
pub struct ConstraintValidator {
    constraints: Vec<Constraint>,
    violation_log: Mutex<Vec<ViolationLogEntry>>,
}

impl ConstraintValidator {
    pub fn new(constraints: Vec<Constraint>) -> Self {
        Self {
            constraints,
            violation_log: Mutex::new(Vec::new()),
        }
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    /// Check the plan against every constraint. Returns `(valid, violations)`
    /// with violations ordered duration, budget, permissions.
    pub fn validate(&self, plan: &Plan) -> (bool, Vec<Violation>) {
        let mut violations = Vec::new();

        for kind in CHECK_ORDER {
            for constraint in self.constraints.iter().filter(|c| c.kind() == kind) {
                if let Some(message) = check(plan, &constraint.limit) {
                    violations.push(Violation {
                        kind,
                        message,
                        hard: constraint.hard,
                    });
                }
            }
        }

        if violations.is_empty() {
            debug!(plan_id = %plan.id, "plan satisfies all constraints");
        } else {
            warn!(
                plan_id = %plan.id,
                count = violations.len(),
                "plan violates constraints"
            );
            self.violation_log.lock().push(ViolationLogEntry {
                plan_id: plan.id.clone(),
                timestamp: Utc::now(),
                violations: violations.clone(),
            });
        }

        (violations.is_empty(), violations)
    }

    /// One remediation per violation, in violation order.
    pub fn suggest_modifications(&self, plan: &Plan, violations: &[Violation]) -> Suggestions {
        let modifications = violations
            .iter()
            .filter_map(|v| {
                let (remediation, suggestion) = match v.kind {
                    ConstraintKind::Duration => (
                        Remediation::ReduceScope,
                        "Consider parallelization or reducing batch sizes",
                    ),
                    ConstraintKind::Budget => (
                        Remediation::OptimizeCost,
                        "Use cheaper API tiers or cache results",
                    ),
                    ConstraintKind::Permissions => (
                        Remediation::RequestPermissions,
                        "Request additional permissions or modify approach",
                    ),
                    ConstraintKind::Regulation => return None,
                };
                Some(Modification {
                    remediation,
                    reason: v.message.clone(),
                    suggestion: suggestion.to_string(),
                })
            })
            .collect();

        Suggestions {
            original_plan: plan.id.clone(),
            modifications,
        }
    }

    pub fn violation_log(&self) -> Vec<ViolationLogEntry> {
        self.violation_log.lock().clone()
    }

    /// Number of plans that failed validation so far.
    pub fn violation_count(&self) -> usize {
        self.violation_log.lock().len()
    }
}

fn check(plan: &Plan, limit: &ConstraintLimit) -> Option<String> {
    match limit {
        ConstraintLimit::Duration { max_secs } => (plan.estimated_time > *max_secs).then(|| {
            format!(
                "Time violation: Plan requires {}s but limit is {}s",
                plan.estimated_time, max_secs
            )
        }),
        ConstraintLimit::Budget { max_cost } => (plan.estimated_cost > *max_cost).then(|| {
            format!(
                "Budget violation: Plan costs ${:.2} but budget is ${:.2}",
                plan.estimated_cost, max_cost
            )
        }),
        ConstraintLimit::Permissions { allowed } => {
            // BTreeSet difference yields names already sorted.
            let missing: Vec<&str> = plan
                .required_permissions
                .difference(allowed)
                .map(String::as_str)
                .collect();
            (!missing.is_empty()).then(|| {
                format!(
                    "Permission violation: Missing permissions {}",
                    missing.join(", ")
                )
            })
        }
        ConstraintLimit::Regulation { .. } => None,
    }
}
