use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;

use tether_core::{
    DecisionRecord, ExecutionRecord, HistoryStore, Plan, Result, StoreStatistics, ToolHealth,
};

#[derive(Default)]
struct Inner {
    plans: HashMap<String, Plan>,
    /// Insertion order; newest last.
    executions: Vec<ExecutionRecord>,
    health: HashMap<String, Vec<ToolHealth>>,
    decisions: Vec<DecisionRecord>,
}

/// Process-local history. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decisions(&self) -> Vec<DecisionRecord> {
        self.inner.lock().decisions.clone()
    }
}

impl HistoryStore for MemoryStore {
    fn save_plan(&self, plan: &Plan) -> Result<()> {
        self.inner.lock().plans.insert(plan.id.clone(), plan.clone());
        Ok(())
    }

    fn save_execution(&self, record: &ExecutionRecord) -> Result<()> {
        self.inner.lock().executions.push(record.clone());
        Ok(())
    }

    fn save_tool_health(&self, tool_name: &str, health: &ToolHealth) -> Result<()> {
        self.inner
            .lock()
            .health
            .entry(tool_name.to_string())
            .or_default()
            .push(health.clone());
        Ok(())
    }

    fn save_approval_decision(&self, record: &DecisionRecord) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner
            .decisions
            .iter()
            .position(|d| d.decision_id == record.decision_id)
        {
            Some(index) => inner.decisions[index] = record.clone(),
            None => inner.decisions.push(record.clone()),
        }
        Ok(())
    }

    fn get_plan(&self, plan_id: &str) -> Result<Option<Plan>> {
        Ok(self.inner.lock().plans.get(plan_id).cloned())
    }

    fn list_executions(&self, plan_id: Option<&str>, limit: usize) -> Result<Vec<ExecutionRecord>> {
        let inner = self.inner.lock();
        let mut records: Vec<ExecutionRecord> = inner
            .executions
            .iter()
            .filter(|r| plan_id.is_none_or(|id| r.plan_id == id))
            .cloned()
            .collect();
        // Stable sort keeps later inserts first among equal timestamps.
        records.reverse();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        records.truncate(limit);
        Ok(records)
    }

    fn tool_health_history(&self, tool_name: &str, limit: usize) -> Result<Vec<ToolHealth>> {
        let inner = self.inner.lock();
        Ok(inner
            .health
            .get(tool_name)
            .map(|snapshots| snapshots.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    fn statistics(&self) -> Result<StoreStatistics> {
        let inner = self.inner.lock();
        let mut status_counts = BTreeMap::new();
        for record in &inner.executions {
            *status_counts.entry(record.status.clone()).or_insert(0) += 1;
        }
        let approval_rate = if inner.decisions.is_empty() {
            0.0
        } else {
            let approved = inner.decisions.iter().filter(|d| d.approved).count();
            approved as f64 / inner.decisions.len() as f64
        };
        Ok(StoreStatistics {
            total_executions: inner.executions.len() as u64,
            status_counts,
            approval_rate,
        })
    }
}
