use console::style;

use tether_config::TetherConfig;
use tether_core::{ExecutionRecord, HistoryStore, Result, ToolHealth};
use tether_gate::BUILTIN_ACTIONS;
use tether_store::SqliteStore;

fn open_store(config: &TetherConfig) -> Result<SqliteStore> {
    SqliteStore::open(&config.store.resolved_path())
}

/// Configured tools first, then the built-in actions, without repeats.
fn known_tools(config: &TetherConfig) -> Vec<String> {
    let mut tools: Vec<String> = Vec::new();
    for name in config
        .reliability
        .tools
        .iter()
        .map(String::as_str)
        .chain(BUILTIN_ACTIONS)
    {
        if !tools.iter().any(|t| t == name) {
            tools.push(name.to_string());
        }
    }
    tools
}

fn is_unreliable(health: &ToolHealth, threshold: f64) -> bool {
    health.drift_detected || health.success_rate < threshold
}

pub(super) fn cmd_health(config: TetherConfig, json: bool) -> Result<()> {
    let store = open_store(&config)?;
    let mut latest = Vec::new();
    for tool in known_tools(&config) {
        if let Some(health) = store.tool_health_history(&tool, 1)?.into_iter().next() {
            latest.push(health);
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&latest)?);
        return Ok(());
    }

    if latest.is_empty() {
        println!("No tool health recorded yet. Run `tether evaluate --execute` first.");
        return Ok(());
    }

    let threshold = config.reliability.threshold;
    println!("{} (threshold {:.2})", style("Tool health").bold(), threshold);
    println!("{}", "-".repeat(72));
    for h in &latest {
        let rate = if is_unreliable(h, threshold) {
            style(format!("{:>6.1}%", h.success_rate * 100.0)).red()
        } else {
            style(format!("{:>6.1}%", h.success_rate * 100.0)).green()
        };
        let drift = if h.drift_detected { "drift" } else { "" };
        println!(
            "  {:<20} {rate}  {:>7.2}s avg  {:>4} failures  {drift}",
            h.tool_name, h.avg_response_time, h.failure_count
        );
    }

    let unreliable: Vec<&str> = latest
        .iter()
        .filter(|h| is_unreliable(h, threshold))
        .map(|h| h.tool_name.as_str())
        .collect();
    if !unreliable.is_empty() {
        println!();
        println!("  ⚠️  unreliable: {}", unreliable.join(", "));
    }
    Ok(())
}

pub(super) fn cmd_history(
    config: TetherConfig,
    plan_id: Option<String>,
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    let store = open_store(&config)?;
    let limit = limit.unwrap_or(config.store.history_limit);
    let records = store.list_executions(plan_id.as_deref(), limit)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!(
            "No recorded runs{}",
            plan_id
                .as_ref()
                .map(|id| format!(" for plan '{id}'"))
                .unwrap_or_default()
        );
        return Ok(());
    }

    println!("{} ({} runs)", style("Run history").bold(), records.len());
    println!("{}", "-".repeat(80));
    for record in &records {
        println!("{}", history_line(record));
    }
    Ok(())
}

fn history_line(record: &ExecutionRecord) -> String {
    let status = match record.status.as_str() {
        "completed" | "approved" => style(record.status.as_str()).green(),
        "rejected" | "failed" => style(record.status.as_str()).red(),
        _ => style(record.status.as_str()).yellow(),
    };
    let success = record
        .success_probability
        .map(|p| format!("{:.0}%", p * 100.0))
        .unwrap_or_else(|| "-".into());
    let risk = record
        .risk_level
        .map(|r| r.to_string())
        .unwrap_or_else(|| "-".into());
    format!(
        "  {} {:<24} {:<18} success {:>4} risk {:<8} {}",
        record.timestamp.format("%Y-%m-%d %H:%M:%S"),
        truncate(&record.plan_id, 24),
        status,
        success,
        risk,
        truncate(&record.description, 40)
    )
}

pub(super) fn cmd_stats(config: TetherConfig, json: bool) -> Result<()> {
    let store = open_store(&config)?;
    let stats = store.statistics()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("{}", style("History statistics").bold());
    println!("  total runs:     {}", stats.total_executions);
    println!("  approval rate:  {:.1}%", stats.approval_rate * 100.0);
    if !stats.status_counts.is_empty() {
        println!("  by status:");
        for (status, count) in &stats.status_counts {
            println!("    {status:<20} {count}");
        }
    }
    Ok(())
}

/// Truncate to `max` characters, appending "..." if truncated.
fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.replace('\n', " ")
    } else {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head.replace('\n', " "))
    }
}
