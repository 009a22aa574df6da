use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde_json::Value;
use tracing::{debug, info};

use tether_core::{
    DecisionRecord, ExecutionRecord, HistoryStore, Plan, Result, RiskLevel, StoreStatistics,
    TetherError, ToolHealth,
};

/// SQLite-backed history of plans, pipeline runs, approval decisions, and
/// tool-health snapshots.
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create the history database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        info!(?path, "opening history store");

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path).map_err(db_err)?;

        // Enable WAL mode for concurrent reads
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS plans (
                id TEXT PRIMARY KEY,
                description TEXT NOT NULL,
                plan_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS executions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                plan_id TEXT NOT NULL,
                status TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                description TEXT NOT NULL,
                estimated_time INTEGER NOT NULL,
                estimated_cost REAL NOT NULL,
                success_probability REAL,
                risk_level TEXT,
                approved INTEGER,
                approver TEXT,
                actual_cost REAL,
                duration_secs REAL,
                result_data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tool_health (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tool_name TEXT NOT NULL,
                success_rate REAL NOT NULL,
                avg_response_time REAL NOT NULL,
                failure_count INTEGER NOT NULL,
                last_failure TEXT,
                drift_detected INTEGER NOT NULL,
                timestamp TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS approval_decisions (
                decision_id TEXT PRIMARY KEY,
                plan_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                approved INTEGER NOT NULL,
                approver TEXT NOT NULL,
                risk_level TEXT NOT NULL,
                urgency TEXT NOT NULL,
                context TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_executions_plan ON executions(plan_id);
            CREATE INDEX IF NOT EXISTS idx_executions_timestamp ON executions(timestamp);
            CREATE INDEX IF NOT EXISTS idx_tool_health_tool ON tool_health(tool_name);
            CREATE INDEX IF NOT EXISTS idx_decisions_plan ON approval_decisions(plan_id);
            ",
        )
        .map_err(db_err)?;

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for tests).
    pub fn open_in_memory() -> Result<Self> {
        Self::open(Path::new(":memory:"))
    }

    /// Delete runs, decisions, and health snapshots older than `days`, then
    /// any plan no remaining run refers to. Returns the number of rows removed.
    pub fn cleanup_older_than(&self, days: u32) -> Result<usize> {
        let cutoff = timestamp(&(Utc::now() - Duration::days(i64::from(days))));
        let db = self.db.lock();
        let mut removed = 0;
        for sql in [
            "DELETE FROM executions WHERE timestamp < ?1",
            "DELETE FROM approval_decisions WHERE timestamp < ?1",
            "DELETE FROM tool_health WHERE timestamp < ?1",
            "DELETE FROM plans WHERE updated_at < ?1
                AND id NOT IN (SELECT plan_id FROM executions)",
        ] {
            removed += db.execute(sql, params![cutoff]).map_err(db_err)?;
        }
        info!(days, removed, "cleaned up history store");
        Ok(removed)
    }
}

impl HistoryStore for SqliteStore {
    fn save_plan(&self, plan: &Plan) -> Result<()> {
        let json = serde_json::to_string(plan)?;
        let now = timestamp(&Utc::now());
        let db = self.db.lock();
        db.execute(
            "INSERT INTO plans (id, description, plan_json, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                description = excluded.description,
                plan_json = excluded.plan_json,
                updated_at = excluded.updated_at",
            params![plan.id, plan.description, json, timestamp(&plan.created_at), now],
        )
        .map_err(db_err)?;
        debug!(plan_id = %plan.id, "saved plan");
        Ok(())
    }

    fn save_execution(&self, record: &ExecutionRecord) -> Result<()> {
        let result_data = serde_json::to_string(&record.result_data)?;
        let db = self.db.lock();
        db.execute(
            "INSERT INTO executions (
                plan_id, status, timestamp, description, estimated_time, estimated_cost,
                success_probability, risk_level, approved, approver, actual_cost,
                duration_secs, result_data
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                record.plan_id,
                record.status,
                timestamp(&record.timestamp),
                record.description,
                record.estimated_time as i64,
                record.estimated_cost,
                record.success_probability,
                record.risk_level.map(|r| r.as_str()),
                record.approved,
                record.approver,
                record.actual_cost,
                record.duration_secs,
                result_data,
            ],
        )
        .map_err(db_err)?;
        debug!(plan_id = %record.plan_id, status = %record.status, "saved execution record");
        Ok(())
    }

    fn save_tool_health(&self, tool_name: &str, health: &ToolHealth) -> Result<()> {
        let db = self.db.lock();
        db.execute(
            "INSERT INTO tool_health (
                tool_name, success_rate, avg_response_time, failure_count,
                last_failure, drift_detected, timestamp
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                tool_name,
                health.success_rate,
                health.avg_response_time,
                health.failure_count as i64,
                health.last_failure.as_ref().map(timestamp),
                health.drift_detected,
                timestamp(&Utc::now()),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn save_approval_decision(&self, record: &DecisionRecord) -> Result<()> {
        let context = serde_json::to_string(&record.context)?;
        let db = self.db.lock();
        db.execute(
            "INSERT INTO approval_decisions (
                decision_id, plan_id, timestamp, approved, approver, risk_level, urgency, context
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(decision_id) DO UPDATE SET
                timestamp = excluded.timestamp,
                approved = excluded.approved,
                approver = excluded.approver",
            params![
                record.decision_id,
                record.plan_id,
                timestamp(&record.timestamp),
                record.approved,
                record.approver,
                record.risk_level.as_str(),
                record.urgency,
                context,
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn get_plan(&self, plan_id: &str) -> Result<Option<Plan>> {
        let db = self.db.lock();
        let json: Option<String> = db
            .query_row(
                "SELECT plan_json FROM plans WHERE id = ?1",
                params![plan_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        json.map(|j| serde_json::from_str(&j).map_err(TetherError::from))
            .transpose()
    }

    fn list_executions(&self, plan_id: Option<&str>, limit: usize) -> Result<Vec<ExecutionRecord>> {
        let db = self.db.lock();
        let mut stmt = db
            .prepare(
                "SELECT plan_id, status, timestamp, description, estimated_time, estimated_cost,
                        success_probability, risk_level, approved, approver, actual_cost,
                        duration_secs, result_data
                 FROM executions
                 WHERE ?1 IS NULL OR plan_id = ?1
                 ORDER BY timestamp DESC, id DESC
                 LIMIT ?2",
            )
            .map_err(db_err)?;

        let rows = stmt
            .query_map(params![plan_id, limit as i64], execution_from_row)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(rows)
    }

    fn tool_health_history(&self, tool_name: &str, limit: usize) -> Result<Vec<ToolHealth>> {
        let db = self.db.lock();
        let mut stmt = db
            .prepare(
                "SELECT tool_name, success_rate, avg_response_time, failure_count,
                        last_failure, drift_detected
                 FROM tool_health
                 WHERE tool_name = ?1
                 ORDER BY timestamp DESC, id DESC
                 LIMIT ?2",
            )
            .map_err(db_err)?;

        let rows = stmt
            .query_map(params![tool_name, limit as i64], |row| {
                Ok(ToolHealth {
                    tool_name: row.get(0)?,
                    success_rate: row.get(1)?,
                    avg_response_time: row.get(2)?,
                    failure_count: row.get::<_, i64>(3)? as u64,
                    last_failure: row
                        .get::<_, Option<String>>(4)?
                        .map(|raw| parse_timestamp(4, &raw))
                        .transpose()?,
                    drift_detected: row.get(5)?,
                })
            })
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(rows)
    }

    fn statistics(&self) -> Result<StoreStatistics> {
        let db = self.db.lock();
        let total: i64 = db
            .query_row("SELECT COUNT(*) FROM executions", [], |row| row.get(0))
            .map_err(db_err)?;

        let mut stmt = db
            .prepare("SELECT status, COUNT(*) FROM executions GROUP BY status")
            .map_err(db_err)?;
        let status_counts: BTreeMap<String, u64> = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })
            .map_err(db_err)?
            .collect::<rusqlite::Result<_>>()
            .map_err(db_err)?;

        let approval_rate: Option<f64> = db
            .query_row(
                "SELECT AVG(CAST(approved AS REAL)) FROM approval_decisions",
                [],
                |row| row.get(0),
            )
            .map_err(db_err)?;

        Ok(StoreStatistics {
            total_executions: total as u64,
            status_counts,
            approval_rate: approval_rate.unwrap_or(0.0),
        })
    }
}

fn execution_from_row(row: &Row<'_>) -> rusqlite::Result<ExecutionRecord> {
    let raw_time: String = row.get(2)?;
    let risk: Option<String> = row.get(7)?;
    let raw_data: String = row.get(12)?;
    Ok(ExecutionRecord {
        plan_id: row.get(0)?,
        status: row.get(1)?,
        timestamp: parse_timestamp(2, &raw_time)?,
        description: row.get(3)?,
        estimated_time: row.get::<_, i64>(4)? as u64,
        estimated_cost: row.get(5)?,
        success_probability: row.get(6)?,
        risk_level: risk.map(|r| parse_risk(7, &r)).transpose()?,
        approved: row.get(8)?,
        approver: row.get(9)?,
        actual_cost: row.get(10)?,
        duration_secs: row.get(11)?,
        result_data: serde_json::from_str::<Value>(&raw_data)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(12, Type::Text, Box::new(e)))?,
    })
}

/// Fixed-width RFC 3339 so stored timestamps sort lexically.
fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(column: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
}

fn parse_risk(column: usize, raw: &str) -> rusqlite::Result<RiskLevel> {
    serde_json::from_value(Value::String(raw.to_string()))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
}

fn db_err(e: rusqlite::Error) -> TetherError {
    TetherError::Store(e.to_string())
}
