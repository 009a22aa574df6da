use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use tether_core::Constraint;

/// Root configuration, mapped from `tether.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TetherConfig {
    pub constraints: ConstraintsConfig,
    pub simulation: SimulationConfig,
    pub reliability: ReliabilityConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

// ── Constraints ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstraintsConfig {
    /// Maximum estimated plan duration in seconds. None = unchecked.
    pub time_limit_secs: Option<u64>,
    /// Maximum estimated plan cost. None = unchecked.
    pub budget: Option<f64>,
    /// Permission tokens a plan may require. None = unchecked.
    pub permissions: Option<Vec<String>>,
    /// Named regulations the plans fall under (recorded, not checked).
    pub regulations: Vec<String>,
    /// Whether the limits above are hard limits.
    pub hard_limits: bool,
}

impl Default for ConstraintsConfig {
    fn default() -> Self {
        Self {
            time_limit_secs: Some(3600),
            budget: Some(100.0),
            permissions: Some(vec!["read".into()]),
            regulations: vec![],
            hard_limits: true,
        }
    }
}

// ── Simulation ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Number of projected paths per plan.
    pub paths: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self { paths: 3 }
    }
}

// ── Reliability ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReliabilityConfig {
    /// Tools whose smoothed success rate drops below this are flagged as drifting.
    pub threshold: f64,
    /// Smoothed response time (seconds) above which a performance alert fires.
    pub performance_threshold_secs: f64,
    /// Tools registered for monitoring at startup.
    pub tools: Vec<String>,
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            threshold: 0.85,
            performance_threshold_secs: 5.0,
            tools: vec![],
        }
    }
}

// ── Store ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database path. `~` is expanded to the home directory.
    pub path: PathBuf,
    pub persist_executions: bool,
    pub persist_health: bool,
    /// Default number of records returned by history queries.
    pub history_limit: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("~/.tether/tether.db"),
            persist_executions: true,
            persist_health: true,
            history_limit: 1000,
        }
    }
}

impl StoreConfig {
    /// The database path with a leading `~` expanded.
    pub fn resolved_path(&self) -> PathBuf {
        match self.path.strip_prefix("~") {
            Ok(rest) => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(rest),
            Err(_) => self.path.clone(),
        }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Output format: "pretty", "json", "compact".
    pub format: String,
    /// Log file path (None = stderr only).
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
            file: None,
        }
    }
}

impl TetherConfig {
    /// The configured limits as constraints, in duration, budget, permissions, regulation order.
    pub fn constraints(&self) -> Vec<Constraint> {
        let c = &self.constraints;
        let mut out = Vec::new();
        if let Some(secs) = c.time_limit_secs {
            out.push(Constraint::duration(secs));
        }
        if let Some(budget) = c.budget {
            out.push(Constraint::budget(budget));
        }
        if let Some(ref perms) = c.permissions {
            out.push(Constraint::permissions(perms.iter().cloned()));
        }
        for name in &c.regulations {
            out.push(Constraint::regulation(name.clone()));
        }
        if !c.hard_limits {
            out = out.into_iter().map(Constraint::soft).collect();
        }
        out
    }
}

// ── Validation ─────────────────────────────────────────────────

/// A single config validation issue.
#[derive(Debug)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let icon = match self.severity {
            WarningSeverity::Error => "❌",
            WarningSeverity::Warning => "⚠️ ",
            WarningSeverity::Info => "💡",
        };
        write!(f, "{} {}: {}", icon, self.field, self.message)?;
        if let Some(ref h) = self.hint {
            write!(f, "\n   ↳ {}", h)?;
        }
        Ok(())
    }
}

impl TetherConfig {
    /// Validate the config and return a list of warnings/errors.
    /// Returns `Err` with all messages joined if any severity is Error.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, String> {
        let warnings = self.warnings();

        let errors: Vec<String> = warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::Error)
            .map(|w| format!("{}: {}", w.field, w.message))
            .collect();

        if !errors.is_empty() {
            return Err(format!("Configuration errors:\n  • {}", errors.join("\n  • ")));
        }

        Ok(warnings)
    }

    /// Every finding, errors included.
    pub fn warnings(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        // ── Budget ───
        if let Some(budget) = self.constraints.budget {
            if !budget.is_finite() || budget < 0.0 {
                warnings.push(ConfigWarning {
                    field: "constraints.budget".into(),
                    message: format!("budget {} is negative or not a number", budget),
                    severity: WarningSeverity::Error,
                    hint: Some("Set to e.g. 100.0, or remove the key to disable the check".into()),
                });
            } else if budget == 0.0 {
                warnings.push(ConfigWarning {
                    field: "constraints.budget".into(),
                    message: "budget is zero — every plan with a cost will be rejected".into(),
                    severity: WarningSeverity::Warning,
                    hint: None,
                });
            }
        } else {
            warnings.push(ConfigWarning {
                field: "constraints.budget".into(),
                message: "no budget limit — plan cost is never checked".into(),
                severity: WarningSeverity::Info,
                hint: None,
            });
        }

        // ── Time limit ───
        if self.constraints.time_limit_secs == Some(0) {
            warnings.push(ConfigWarning {
                field: "constraints.time_limit_secs".into(),
                message: "time limit is 0 — every plan with a duration will be rejected".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Set to e.g. 3600".into()),
            });
        }

        // ── Permissions ───
        if matches!(self.constraints.permissions, Some(ref p) if p.is_empty()) {
            warnings.push(ConfigWarning {
                field: "constraints.permissions".into(),
                message: "permission allow-list is empty — plans requiring any permission are rejected".into(),
                severity: WarningSeverity::Warning,
                hint: None,
            });
        }

        // ── Simulation ───
        if self.simulation.paths == 0 {
            warnings.push(ConfigWarning {
                field: "simulation.paths".into(),
                message: "path count is 0 — nothing to choose a projection from".into(),
                severity: WarningSeverity::Error,
                hint: Some("The default of 3 covers optimistic, realistic, and pessimistic paths".into()),
            });
        } else if self.simulation.paths > 3 {
            warnings.push(ConfigWarning {
                field: "simulation.paths".into(),
                message: format!("{} paths — paths past the third are extrapolated", self.simulation.paths),
                severity: WarningSeverity::Info,
                hint: None,
            });
        }

        // ── Reliability ───
        let threshold = self.reliability.threshold;
        if !(0.0..=1.0).contains(&threshold) {
            warnings.push(ConfigWarning {
                field: "reliability.threshold".into(),
                message: format!("threshold {} is outside [0, 1]", threshold),
                severity: WarningSeverity::Error,
                hint: Some("Success rates range 0.0-1.0. A threshold of 0.8-0.9 is typical.".into()),
            });
        }
        if self.reliability.performance_threshold_secs <= 0.0 {
            warnings.push(ConfigWarning {
                field: "reliability.performance_threshold_secs".into(),
                message: "performance threshold is not positive — every execution will alert".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Set to e.g. 5.0".into()),
            });
        }

        // ── Store ───
        if self.store.history_limit == 0 {
            warnings.push(ConfigWarning {
                field: "store.history_limit".into(),
                message: "history limit is 0 — history queries return nothing".into(),
                severity: WarningSeverity::Warning,
                hint: None,
            });
        }

        // ── Logging format ───
        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.format".into(),
                message: format!("unknown log format '{}'", self.logging.format),
                severity: WarningSeverity::Error,
                hint: Some(format!("Valid values: {}", valid_formats.join(", "))),
            });
        }

        // ── Logging level ───
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.level".into(),
                message: format!("unknown log level '{}'", self.logging.level),
                severity: WarningSeverity::Error,
                hint: Some(format!("Valid values: {}", valid_levels.join(", "))),
            });
        }

        warnings
    }
}
