#[cfg(test)]
mod tests {
    use tether_core::*;

    // ── Plan ingestion tests ───────────────────────────────────

    #[test]
    fn test_plan_from_json_minimal() {
        let raw = r#"{
            "id": "plan_001",
            "description": "Scrape and summarize",
            "steps": [{"action": "scrape", "count": 100}, {"action": "report"}],
            "estimated_time": 1800,
            "estimated_cost": 12.5
        }"#;
        let plan = Plan::from_json_str(raw).unwrap();
        assert_eq!(plan.id, "plan_001");
        assert_eq!(plan.steps.len(), 2);
        assert!(plan.required_permissions.is_empty());
        assert!(plan.metadata.is_empty());
        assert_eq!(plan.steps[0].action, StepAction::Scrape { count: 100 });
        assert_eq!(
            plan.steps[1].action,
            StepAction::Report {
                format: "pdf".into()
            }
        );
    }

    #[test]
    fn test_demo_plans_parse() {
        let dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../demos");
        for name in ["pricing_scrape", "market_survey", "over_budget"] {
            let plan = Plan::from_path(&dir.join(format!("{name}.json"))).unwrap();
            assert_eq!(plan.id, name);
            assert!(!plan.steps.is_empty());
        }
        let survey = Plan::from_path(&dir.join("market_survey.json")).unwrap();
        assert!(survey.steps[0].critical);
    }

    #[test]
    fn test_plan_from_json_rejects_empty_id() {
        let raw = r#"{"id": " ", "description": "x", "steps": [], "estimated_time": 1, "estimated_cost": 1.0}"#;
        let err = Plan::from_json_str(raw).unwrap_err();
        assert!(matches!(err, TetherError::InvalidPlan(_)));
    }

    #[test]
    fn test_plan_from_json_rejects_negative_cost() {
        let raw = r#"{"id": "p", "description": "x", "steps": [], "estimated_time": 1, "estimated_cost": -3.0}"#;
        let err = Plan::from_json_str(raw).unwrap_err();
        assert!(err.to_string().contains("estimated_cost"));
    }

    #[test]
    fn test_plan_missing_required_field() {
        let raw = r#"{"id": "p", "description": "x", "steps": []}"#;
        let err = Plan::from_json_str(raw).unwrap_err();
        assert!(matches!(err, TetherError::Serialization(_)));
    }

    #[test]
    fn test_plan_permissions_deduplicated_and_sorted() {
        let plan = Plan::new("p", "d").with_permissions(["write", "read", "write"]);
        let perms: Vec<_> = plan.required_permissions.iter().cloned().collect();
        assert_eq!(perms, vec!["read", "write"]);
    }

    // ── Step tests ─────────────────────────────────────────────

    #[test]
    fn test_step_unknown_action_keeps_params() {
        let step: Step =
            serde_json::from_str(r#"{"action": "deploy", "target": "prod", "critical": true}"#)
                .unwrap();
        assert!(step.critical);
        assert_eq!(step.action_name(), "deploy");
        match step.action {
            StepAction::Other { params, .. } => assert_eq!(params["target"], "prod"),
            other => panic!("expected Other, got {other:?}"),
        }
    }

    #[test]
    fn test_step_missing_action_is_error() {
        let err = serde_json::from_str::<Step>(r#"{"count": 3}"#).unwrap_err();
        assert!(err.to_string().contains("action"));
    }

    #[test]
    fn test_step_bad_payload_is_error() {
        let err = serde_json::from_str::<Step>(r#"{"action": "scrape", "count": "many"}"#)
            .unwrap_err();
        assert!(err.to_string().contains("invalid step payload"));
    }

    #[test]
    fn test_step_serializes_flat() {
        let step = Step::new(StepAction::Analyze {
            method: "topic".into(),
        })
        .critical();
        let value = serde_json::to_value(&step).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"action": "analyze", "method": "topic", "critical": true})
        );
    }

    // ── Enum rendering tests ───────────────────────────────────

    #[test]
    fn test_enums_render_lowercase() {
        assert_eq!(serde_json::to_string(&RiskLevel::Critical).unwrap(), "\"critical\"");
        assert_eq!(
            serde_json::to_string(&ExecutionStatus::Cancelled).unwrap(),
            "\"cancelled\""
        );
        assert_eq!(RiskLevel::Medium.to_string(), "medium");
        assert!(RiskLevel::High.is_elevated());
        assert!(!RiskLevel::Medium.is_elevated());
    }

    #[test]
    fn test_constraint_kinds() {
        assert_eq!(Constraint::duration(10).kind(), ConstraintKind::Duration);
        assert_eq!(Constraint::budget(1.0).kind(), ConstraintKind::Budget);
        assert_eq!(
            Constraint::permissions(["read"]).kind(),
            ConstraintKind::Permissions
        );
        assert_eq!(Constraint::regulation("gdpr").kind(), ConstraintKind::Regulation);
        assert!(Constraint::budget(1.0).hard);
        assert!(!Constraint::budget(1.0).soft().hard);
    }

    #[test]
    fn test_tool_health_defaults() {
        let health = ToolHealth::new("scrape");
        assert_eq!(health.success_rate, 1.0);
        assert_eq!(health.avg_response_time, 0.0);
        assert_eq!(health.failure_count, 0);
        assert!(health.last_failure.is_none());
        assert!(!health.drift_detected);
    }

    // ── Error tests ────────────────────────────────────────────

    #[test]
    fn test_error_step_execution_display() {
        let err = TetherError::StepExecution {
            action: "scrape".into(),
            reason: "timeout".into(),
        };
        let s = err.to_string();
        assert!(s.contains("scrape"));
        assert!(s.contains("timeout"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: TetherError = io_err.into();
        assert!(err.to_string().contains("file not found"));
    }

    // ── Handler tests ──────────────────────────────────────────

    #[tokio::test]
    async fn test_handler_fn_adapter() {
        let handler = handler_fn(|step: &Step| {
            Ok(StepOutput::new(
                0.5,
                serde_json::json!({ "action": step.action_name() }),
            ))
        });
        let out = handler.handle(&Step::other("ping")).await.unwrap();
        assert_eq!(out.cost, 0.5);
        assert_eq!(out.data["action"], "ping");
    }

    // ── Event Bus tests ────────────────────────────────────────

    #[test]
    fn test_event_bus_pub_sub() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.publish(Event::ExecutionCancelled {
            plan_id: "p".into(),
        });

        let event = rx.try_recv().unwrap();
        assert!(matches!(event, Event::ExecutionCancelled { .. }));
    }

    #[test]
    fn test_event_bus_publish_without_subscribers() {
        let bus = EventBus::new(4);
        bus.publish(Event::PlanReceived {
            plan_id: "p".into(),
            steps: 0,
        });
    }

    #[test]
    fn test_event_serde_tagged() {
        let event = Event::ApprovalDenied {
            decision_id: "approval_p_1".into(),
            approver: "team_lead".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "approval_denied");
    }
}
