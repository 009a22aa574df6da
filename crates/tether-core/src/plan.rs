use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::path::Path;

use crate::error::{Result, TetherError};

/// An AI-generated execution plan. Immutable once built; every pipeline stage reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub description: String,
    /// Ordered steps. Later steps may depend on the side effects of earlier ones.
    pub steps: Vec<Step>,
    /// Estimated wall-clock duration in seconds.
    pub estimated_time: u64,
    pub estimated_cost: f64,
    #[serde(default)]
    pub required_permissions: BTreeSet<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Plan {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            steps: Vec::new(),
            estimated_time: 0,
            estimated_cost: 0.0,
            required_permissions: BTreeSet::new(),
            metadata: Map::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_steps(mut self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.steps = steps.into_iter().collect();
        self
    }

    pub fn with_estimates(mut self, time_secs: u64, cost: f64) -> Self {
        self.estimated_time = time_secs;
        self.estimated_cost = cost;
        self
    }

    pub fn with_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_permissions = permissions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Parse and check a plan document.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let plan: Plan = serde_json::from_str(raw)?;
        plan.check()?;
        Ok(plan)
    }

    /// Load a plan document from disk.
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    fn check(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(TetherError::InvalidPlan("plan id is empty".into()));
        }
        if !self.estimated_cost.is_finite() || self.estimated_cost < 0.0 {
            return Err(TetherError::InvalidPlan(format!(
                "plan {} has invalid estimated_cost {}",
                self.id, self.estimated_cost
            )));
        }
        Ok(())
    }
}

/// One step of a plan: a typed action plus the halt-on-failure flag.
///
/// On the wire a step is a flat object keyed by `action`, e.g.
/// `{"action": "scrape", "count": 100, "critical": true}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct Step {
    pub action: StepAction,
    /// A failing critical step halts the whole run.
    pub critical: bool,
}

impl Step {
    pub fn new(action: StepAction) -> Self {
        Self {
            action,
            critical: false,
        }
    }

    /// A step for an action without a typed payload.
    pub fn other(action: impl Into<String>) -> Self {
        Self::new(StepAction::Other {
            action: action.into(),
            params: Map::new(),
        })
    }

    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    pub fn action_name(&self) -> &str {
        self.action.name()
    }
}

/// Step payloads, keyed by action name.
#[derive(Debug, Clone, PartialEq)]
pub enum StepAction {
    Scrape { count: u32 },
    Analyze { method: String },
    Report { format: String },
    /// Any action without a dedicated payload type.
    Other {
        action: String,
        params: Map<String, Value>,
    },
}

#[derive(Deserialize)]
struct ScrapeParams {
    #[serde(default = "default_scrape_count")]
    count: u32,
}

#[derive(Deserialize)]
struct AnalyzeParams {
    #[serde(default = "default_analyze_method")]
    method: String,
}

#[derive(Deserialize)]
struct ReportParams {
    #[serde(default = "default_report_format")]
    format: String,
}

fn default_scrape_count() -> u32 {
    10
}

fn default_analyze_method() -> String {
    "sentiment".into()
}

fn default_report_format() -> String {
    "pdf".into()
}

impl StepAction {
    pub fn name(&self) -> &str {
        match self {
            Self::Scrape { .. } => "scrape",
            Self::Analyze { .. } => "analyze",
            Self::Report { .. } => "report",
            Self::Other { action, .. } => action,
        }
    }

    /// Build an action from its name and the remaining step fields.
    pub fn from_parts(action: String, params: Map<String, Value>) -> serde_json::Result<Self> {
        let params = Value::Object(params);
        Ok(match action.as_str() {
            "scrape" => {
                let p: ScrapeParams = serde_json::from_value(params)?;
                Self::Scrape { count: p.count }
            }
            "analyze" => {
                let p: AnalyzeParams = serde_json::from_value(params)?;
                Self::Analyze { method: p.method }
            }
            "report" => {
                let p: ReportParams = serde_json::from_value(params)?;
                Self::Report { format: p.format }
            }
            _ => match params {
                Value::Object(params) => Self::Other { action, params },
                _ => Self::Other {
                    action,
                    params: Map::new(),
                },
            },
        })
    }

    fn params(&self) -> Map<String, Value> {
        let mut map = Map::new();
        match self {
            Self::Scrape { count } => {
                map.insert("count".into(), Value::from(*count));
            }
            Self::Analyze { method } => {
                map.insert("method".into(), Value::from(method.clone()));
            }
            Self::Report { format } => {
                map.insert("format".into(), Value::from(format.clone()));
            }
            Self::Other { params, .. } => map = params.clone(),
        }
        map
    }
}

impl TryFrom<Map<String, Value>> for Step {
    type Error = String;

    fn try_from(mut raw: Map<String, Value>) -> std::result::Result<Self, Self::Error> {
        let action = match raw.remove("action") {
            Some(Value::String(name)) if !name.is_empty() => name,
            Some(other) => return Err(format!("step action must be a non-empty string, got {other}")),
            None => return Err("step is missing an `action` field".into()),
        };
        let critical = match raw.remove("critical") {
            None | Some(Value::Null) => false,
            Some(Value::Bool(flag)) => flag,
            Some(other) => return Err(format!("step `critical` must be a boolean, got {other}")),
        };
        let action = StepAction::from_parts(action, raw)
            .map_err(|e| format!("invalid step payload: {e}"))?;
        Ok(Self { action, critical })
    }
}

impl From<Step> for Map<String, Value> {
    fn from(step: Step) -> Self {
        let mut map = step.action.params();
        map.insert("action".into(), Value::from(step.action.name()));
        if step.critical {
            map.insert("critical".into(), Value::Bool(true));
        }
        map
    }
}
