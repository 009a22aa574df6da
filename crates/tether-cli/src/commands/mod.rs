use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use tether_config::schema::LoggingConfig;
use tether_config::{ConfigLoader, TetherConfig, WarningSeverity};
use tether_core::{Result, TetherError};

mod evaluate;
mod history;

/// Tether: pre-execution gate for AI-generated action plans
#[derive(Parser)]
#[command(name = "tether", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to tether.toml config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all log output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a plan file through validation, simulation, and approval
    Evaluate {
        /// Path to the plan JSON file
        plan: PathBuf,
        /// Grant any sign-off request without prompting
        #[arg(long, conflicts_with = "deny")]
        auto_approve: bool,
        /// Refuse any sign-off request without prompting
        #[arg(long)]
        deny: bool,
        /// Run the plan's steps with the built-in handlers once approved
        #[arg(long)]
        execute: bool,
        /// Output the pipeline result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the latest recorded health of each known tool
    Health {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show recorded pipeline runs, newest first
    History {
        /// Only runs of this plan
        #[arg(short, long)]
        plan_id: Option<String>,

        /// Number of runs to show (default: store.history_limit)
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show aggregate numbers over the recorded history
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show current configuration
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Audit the configuration file and report every warning
    ValidateConfig,
    /// Show version and build info
    Version,
}

/// How sign-off requests are answered during `evaluate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ApprovalMode {
    Prompt,
    Approve,
    Deny,
}

impl ApprovalMode {
    fn from_flags(auto_approve: bool, deny: bool) -> Self {
        match (auto_approve, deny) {
            (true, _) => Self::Approve,
            (_, true) => Self::Deny,
            _ => Self::Prompt,
        }
    }
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        // Auditing must work on a config that would fail to load.
        if let Commands::ValidateConfig = self.command {
            return Self::cmd_validate_config(self.config.as_deref());
        }

        let config_loader = ConfigLoader::load(self.config.as_deref())?;
        let config = config_loader.get();

        let log_level = self.log_level(&config);
        init_tracing(&config.logging, &log_level)?;

        match self.command {
            Commands::Evaluate {
                plan,
                auto_approve,
                deny,
                execute,
                json,
            } => {
                let mode = ApprovalMode::from_flags(auto_approve, deny);
                evaluate::cmd_evaluate(config, plan, mode, execute, json).await
            }
            Commands::Health { json } => history::cmd_health(config, json),
            Commands::History {
                plan_id,
                limit,
                json,
            } => history::cmd_history(config, plan_id, limit, json),
            Commands::Stats { json } => history::cmd_stats(config, json),
            Commands::Config { json } => Self::cmd_config(config, json),
            Commands::ValidateConfig => Self::cmd_validate_config(self.config.as_deref()),
            Commands::Version => Self::cmd_version(),
        }
    }

    /// --verbose > --quiet > --log-level > logging.level
    fn log_level(&self, config: &TetherConfig) -> String {
        if self.verbose {
            "debug".into()
        } else if self.quiet {
            "error".into()
        } else {
            self.log_level
                .clone()
                .unwrap_or_else(|| config.logging.level.clone())
        }
    }

    fn cmd_config(config: TetherConfig, json: bool) -> Result<()> {
        if json {
            println!("{}", serde_json::to_string_pretty(&config)?);
        } else {
            println!(
                "{}",
                toml::to_string_pretty(&config).map_err(|e| TetherError::Config(e.to_string()))?
            );
        }
        Ok(())
    }

    fn cmd_validate_config(path: Option<&std::path::Path>) -> Result<()> {
        let (config_path, config) = ConfigLoader::inspect(path)?;
        println!("🔎 Tether config audit: {}", config_path.display());
        if !config_path.exists() {
            println!("   (file not found, checking defaults)");
        }
        println!();

        let warnings = config.warnings();
        let mut error_count = 0;
        let mut warn_count = 0;
        let mut info_count = 0;
        for w in &warnings {
            println!("  {w}");
            match w.severity {
                WarningSeverity::Error => error_count += 1,
                WarningSeverity::Warning => warn_count += 1,
                WarningSeverity::Info => info_count += 1,
            }
        }

        println!();
        println!("  ❌ {error_count} errors, ⚠️  {warn_count} warnings, 💡 {info_count} suggestions");

        match config.validate() {
            Ok(_) => Ok(()),
            Err(e) => Err(TetherError::Config(e)),
        }
    }

    fn cmd_version() -> Result<()> {
        println!("Tether v{}", env!("CARGO_PKG_VERSION"));
        println!("   Rust edition: 2024");
        println!("   Target: {}", std::env::consts::ARCH);
        println!("   OS: {}", std::env::consts::OS);
        #[cfg(debug_assertions)]
        println!("   Profile: debug");
        #[cfg(not(debug_assertions))]
        println!("   Profile: release");
        Ok(())
    }
}

/// Install the global subscriber. Logs go to stderr or `logging.file`, never stdout,
/// so `--json` output stays parseable.
fn init_tracing(logging: &LoggingConfig, level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let writer = match logging.file {
        Some(ref path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            BoxMakeWriter::new(std::sync::Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(logging.file.is_none());

    match logging.format.as_str() {
        "json" => builder.json().with_target(true).init(),
        "compact" => builder.compact().with_target(false).init(),
        _ => builder.with_target(false).init(),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluate_flags_parse() {
        let cli = Cli::try_parse_from([
            "tether",
            "evaluate",
            "plan.json",
            "--auto-approve",
            "--execute",
            "--json",
        ])
        .unwrap();
        match cli.command {
            Commands::Evaluate {
                plan,
                auto_approve,
                deny,
                execute,
                json,
            } => {
                assert_eq!(plan, PathBuf::from("plan.json"));
                assert!(auto_approve && execute && json);
                assert!(!deny);
            }
            _ => panic!("expected evaluate"),
        }
    }

    #[test]
    fn test_approve_and_deny_conflict() {
        assert!(
            Cli::try_parse_from(["tether", "evaluate", "p.json", "--auto-approve", "--deny"])
                .is_err()
        );
    }

    #[test]
    fn test_verbose_and_quiet_conflict() {
        assert!(Cli::try_parse_from(["tether", "-v", "-q", "stats"]).is_err());
    }

    #[test]
    fn test_approval_mode_from_flags() {
        assert_eq!(ApprovalMode::from_flags(false, false), ApprovalMode::Prompt);
        assert_eq!(ApprovalMode::from_flags(true, false), ApprovalMode::Approve);
        assert_eq!(ApprovalMode::from_flags(false, true), ApprovalMode::Deny);
    }

    #[test]
    fn test_log_level_precedence() {
        let mut config = TetherConfig::default();
        config.logging.level = "warn".into();

        let cli = Cli::try_parse_from(["tether", "stats"]).unwrap();
        assert_eq!(cli.log_level(&config), "warn");

        let cli = Cli::try_parse_from(["tether", "-l", "trace", "stats"]).unwrap();
        assert_eq!(cli.log_level(&config), "trace");

        let cli = Cli::try_parse_from(["tether", "-l", "trace", "-q", "stats"]).unwrap();
        assert_eq!(cli.log_level(&config), "error");

        let cli = Cli::try_parse_from(["tether", "-l", "trace", "-v", "stats"]).unwrap();
        assert_eq!(cli.log_level(&config), "debug");
    }

    #[test]
    fn test_history_args() {
        let cli = Cli::try_parse_from(["tether", "history", "-p", "plan_7", "-n", "5"]).unwrap();
        match cli.command {
            Commands::History { plan_id, limit, .. } => {
                assert_eq!(plan_id.as_deref(), Some("plan_7"));
                assert_eq!(limit, Some(5));
            }
            _ => panic!("expected history"),
        }
    }

    #[test]
    fn test_config_warnings_keep_errors_as_entries() {
        let mut config = TetherConfig::default();
        config.simulation.paths = 0;
        config.logging.format = "xml".into();
        let errors = config
            .warnings()
            .into_iter()
            .filter(|w| w.severity == WarningSeverity::Error)
            .count();
        assert_eq!(errors, 2);
    }
}
