#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use serde_json::json;
    use tether_core::{
        DecisionRecord, ExecutionRecord, HistoryStore, Plan, RiskLevel, Step, StepAction,
        ToolHealth,
    };

    fn plan(id: &str) -> Plan {
        Plan::new(id, "collect pricing data")
            .with_steps([Step::new(StepAction::Scrape { count: 5 })])
            .with_estimates(600, 12.5)
            .with_permissions(["read"])
    }

    fn record(plan_id: &str, status: &str, minutes_ago: i64) -> ExecutionRecord {
        ExecutionRecord {
            plan_id: plan_id.into(),
            status: status.into(),
            timestamp: Utc::now() - Duration::minutes(minutes_ago),
            description: "collect pricing data".into(),
            estimated_time: 600,
            estimated_cost: 12.5,
            success_probability: Some(0.85),
            risk_level: Some(RiskLevel::Low),
            approved: None,
            approver: None,
            actual_cost: Some(0.05),
            duration_secs: Some(1.5),
            result_data: json!({ "status": status }),
        }
    }

    fn decision(id: &str, approved: bool) -> DecisionRecord {
        DecisionRecord {
            decision_id: id.into(),
            plan_id: "p".into(),
            timestamp: Utc::now(),
            approved,
            approver: "alice".into(),
            risk_level: RiskLevel::High,
            urgency: "medium".into(),
            context: json!({ "estimated_cost": "$75.00" }),
        }
    }

    fn unhealthy(name: &str, failures: u64) -> ToolHealth {
        ToolHealth {
            failure_count: failures,
            success_rate: 0.5,
            drift_detected: true,
            last_failure: Some(Utc::now()),
            ..ToolHealth::new(name)
        }
    }

    /// Behaviour every engine must share.
    fn exercise(store: &dyn HistoryStore) {
        let p = plan("p1");
        store.save_plan(&p).unwrap();
        let loaded = store.get_plan("p1").unwrap().unwrap();
        assert_eq!(loaded.id, "p1");
        assert_eq!(loaded.steps, p.steps);
        assert_eq!(loaded.estimated_cost, 12.5);
        assert!(store.get_plan("missing").unwrap().is_none());

        store.save_execution(&record("p1", "approved", 30)).unwrap();
        store.save_execution(&record("p2", "rejected", 20)).unwrap();
        store.save_execution(&record("p1", "completed", 10)).unwrap();

        let all = store.list_executions(None, 10).unwrap();
        let statuses: Vec<_> = all.iter().map(|r| r.status.as_str()).collect();
        assert_eq!(statuses, vec!["completed", "rejected", "approved"]);
        assert_eq!(all[0].risk_level, Some(RiskLevel::Low));
        assert_eq!(all[0].result_data["status"], "completed");

        let only_p1 = store.list_executions(Some("p1"), 10).unwrap();
        assert_eq!(only_p1.len(), 2);
        assert!(only_p1.iter().all(|r| r.plan_id == "p1"));
        assert_eq!(store.list_executions(None, 1).unwrap().len(), 1);

        store.save_tool_health("scrape", &ToolHealth::new("scrape")).unwrap();
        store.save_tool_health("scrape", &unhealthy("scrape", 3)).unwrap();
        let history = store.tool_health_history("scrape", 10).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].failure_count, 3);
        assert!(history[0].drift_detected);
        assert!(history[0].last_failure.is_some());
        assert!(store.tool_health_history("other", 10).unwrap().is_empty());

        store.save_approval_decision(&decision("d1", true)).unwrap();
        store.save_approval_decision(&decision("d2", false)).unwrap();
        let stats = store.statistics().unwrap();
        assert_eq!(stats.total_executions, 3);
        assert_eq!(stats.status_counts["approved"], 1);
        assert_eq!(stats.status_counts["completed"], 1);
        assert_eq!(stats.approval_rate, 0.5);
    }

    // ── SQLite store ───────────────────────────────────────────

    mod sqlite {
        use super::*;
        use tether_store::SqliteStore;

        #[test]
        fn test_history_contract() {
            let store = SqliteStore::open_in_memory().unwrap();
            exercise(&store);
        }

        #[test]
        fn test_empty_statistics() {
            let store = SqliteStore::open_in_memory().unwrap();
            let stats = store.statistics().unwrap();
            assert_eq!(stats.total_executions, 0);
            assert!(stats.status_counts.is_empty());
            assert_eq!(stats.approval_rate, 0.0);
        }

        #[test]
        fn test_persists_across_reopen() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("nested").join("tether.db");
            {
                let store = SqliteStore::open(&path).unwrap();
                store.save_plan(&plan("kept")).unwrap();
                store.save_execution(&record("kept", "approved", 0)).unwrap();
            }
            let store = SqliteStore::open(&path).unwrap();
            assert!(store.get_plan("kept").unwrap().is_some());
            assert_eq!(store.list_executions(Some("kept"), 5).unwrap().len(), 1);
        }

        #[test]
        fn test_save_plan_upserts() {
            let store = SqliteStore::open_in_memory().unwrap();
            store.save_plan(&plan("p")).unwrap();
            let mut changed = plan("p");
            changed.description = "revised".into();
            store.save_plan(&changed).unwrap();
            assert_eq!(store.get_plan("p").unwrap().unwrap().description, "revised");
        }

        #[test]
        fn test_decision_upserts_by_id() {
            let store = SqliteStore::open_in_memory().unwrap();
            store.save_approval_decision(&decision("d1", false)).unwrap();
            store.save_approval_decision(&decision("d1", true)).unwrap();
            assert_eq!(store.statistics().unwrap().approval_rate, 1.0);
        }

        #[test]
        fn test_cleanup_older_than() {
            let store = SqliteStore::open_in_memory().unwrap();
            store.save_execution(&record("old", "approved", 60 * 24 * 40)).unwrap();
            store.save_execution(&record("new", "approved", 5)).unwrap();

            let removed = store.cleanup_older_than(30).unwrap();
            assert_eq!(removed, 1);
            let left = store.list_executions(None, 10).unwrap();
            assert_eq!(left.len(), 1);
            assert_eq!(left[0].plan_id, "new");
        }
    }

    // ── In-memory store ────────────────────────────────────────

    mod memory {
        use super::*;
        use tether_store::MemoryStore;

        #[test]
        fn test_history_contract() {
            let store = MemoryStore::new();
            exercise(&store);
        }

        #[test]
        fn test_decision_upserts_by_id() {
            let store = MemoryStore::new();
            store.save_approval_decision(&decision("d1", false)).unwrap();
            store.save_approval_decision(&decision("d1", true)).unwrap();
            assert_eq!(store.decisions().len(), 1);
            assert_eq!(store.statistics().unwrap().approval_rate, 1.0);
        }

        #[test]
        fn test_health_history_limit() {
            let store = MemoryStore::new();
            for i in 0..5 {
                store.save_tool_health("api", &unhealthy("api", i)).unwrap();
            }
            let history = store.tool_health_history("api", 2).unwrap();
            assert_eq!(history.len(), 2);
            assert_eq!(history[0].failure_count, 4);
            assert_eq!(history[1].failure_count, 3);
        }
    }
}
