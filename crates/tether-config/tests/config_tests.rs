#[cfg(test)]
mod tests {
    use std::io::Write;
    use tether_config::schema::*;
    use tether_config::{ConfigLoader, WarningSeverity};
    use tether_core::{ConstraintKind, ConstraintLimit};

    // ── Default tests ──────────────────────────────────────────

    #[test]
    fn test_tether_config_defaults() {
        let config = TetherConfig::default();
        assert_eq!(config.constraints.time_limit_secs, Some(3600));
        assert_eq!(config.constraints.budget, Some(100.0));
        assert_eq!(config.simulation.paths, 3);
        assert_eq!(config.reliability.threshold, 0.85);
        assert_eq!(config.reliability.performance_threshold_secs, 5.0);
        assert_eq!(config.store.history_limit, 1000);
    }

    #[test]
    fn test_logging_config_defaults() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert_eq!(config.format, "pretty");
        assert!(config.file.is_none());
    }

    #[test]
    fn test_default_config_validates() {
        let warnings = TetherConfig::default().validate().unwrap();
        assert!(warnings.iter().all(|w| w.severity != WarningSeverity::Error));
    }

    // ── Constraint conversion ──────────────────────────────────

    #[test]
    fn test_constraints_from_config_in_fixed_order() {
        let mut config = TetherConfig::default();
        config.constraints.permissions = Some(vec!["read".into(), "write".into()]);
        config.constraints.regulations = vec!["gdpr".into()];
        let constraints = config.constraints();
        let kinds: Vec<_> = constraints.iter().map(|c| c.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                ConstraintKind::Duration,
                ConstraintKind::Budget,
                ConstraintKind::Permissions,
                ConstraintKind::Regulation,
            ]
        );
        match &constraints[2].limit {
            ConstraintLimit::Permissions { allowed } => assert_eq!(allowed.len(), 2),
            other => panic!("expected permissions, got {other:?}"),
        }
        assert!(constraints.iter().all(|c| c.hard));
    }

    #[test]
    fn test_soft_limits_and_unchecked_keys() {
        let toml_str = r#"
[constraints]
budget = 25.0
hard_limits = false
"#;
        let config: TetherConfig = toml::from_str(toml_str).unwrap();
        let constraints = config.constraints();
        // time limit and permissions keep their defaults
        assert_eq!(constraints.len(), 3);
        assert!(constraints.iter().all(|c| !c.hard));
    }

    // ── Validation tests ───────────────────────────────────────

    #[test]
    fn test_zero_paths_is_error() {
        let mut config = TetherConfig::default();
        config.simulation.paths = 0;
        let err = config.validate().unwrap_err();
        assert!(err.contains("simulation.paths"));
    }

    #[test]
    fn test_threshold_out_of_range_is_error() {
        let mut config = TetherConfig::default();
        config.reliability.threshold = 1.5;
        let err = config.validate().unwrap_err();
        assert!(err.contains("reliability.threshold"));
    }

    #[test]
    fn test_unknown_log_format_is_error() {
        let mut config = TetherConfig::default();
        config.logging.format = "xml".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_extra_paths_is_info() {
        let mut config = TetherConfig::default();
        config.simulation.paths = 5;
        let warnings = config.validate().unwrap();
        assert!(warnings
            .iter()
            .any(|w| w.field == "simulation.paths" && w.severity == WarningSeverity::Info));
    }

    #[test]
    fn test_warning_display() {
        let w = ConfigWarning {
            field: "store.history_limit".into(),
            message: "history limit is 0".into(),
            severity: WarningSeverity::Warning,
            hint: Some("raise it".into()),
        };
        let s = w.to_string();
        assert!(s.contains("store.history_limit"));
        assert!(s.contains("raise it"));
    }

    // ── TOML roundtrip tests ───────────────────────────────────

    #[test]
    fn test_config_toml_roundtrip() {
        let config = TetherConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let restored: TetherConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(restored.constraints.budget, config.constraints.budget);
        assert_eq!(restored.simulation.paths, config.simulation.paths);
        assert_eq!(restored.store.path, config.store.path);
    }

    #[test]
    fn test_partial_toml_applies_defaults() {
        let toml_str = r#"
[reliability]
threshold = 0.8
tools = ["scrape", "analyze"]
"#;
        let config: TetherConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.reliability.threshold, 0.8);
        assert_eq!(config.reliability.tools, vec!["scrape", "analyze"]);
        assert_eq!(config.reliability.performance_threshold_secs, 5.0);
        assert_eq!(config.simulation.paths, 3);
    }

    #[test]
    fn test_store_path_expands_home() {
        let store = StoreConfig::default();
        let resolved = store.resolved_path();
        assert!(!resolved.starts_with("~"));
        assert!(resolved.ends_with(".tether/tether.db"));

        let explicit = StoreConfig {
            path: "/var/lib/tether.db".into(),
            ..StoreConfig::default()
        };
        assert_eq!(explicit.resolved_path(), std::path::PathBuf::from("/var/lib/tether.db"));
    }

    // ── ConfigLoader tests ─────────────────────────────────────

    #[test]
    fn test_config_loader_with_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("tether.toml");
        let mut f = std::fs::File::create(&config_path).unwrap();
        writeln!(
            f,
            r#"
[constraints]
time_limit_secs = 1800
permissions = ["read", "write"]

[simulation]
paths = 4
"#
        )
        .unwrap();

        let loader = ConfigLoader::load(Some(config_path.as_path())).unwrap();
        let config = loader.get();
        assert_eq!(config.constraints.time_limit_secs, Some(1800));
        assert_eq!(
            config.constraints.permissions,
            Some(vec!["read".to_string(), "write".to_string()])
        );
        assert_eq!(config.simulation.paths, 4);
        assert_eq!(loader.path(), config_path.as_path());
    }

    #[test]
    fn test_config_loader_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ConfigLoader::load(Some(dir.path().join("absent.toml").as_path())).unwrap();
        assert_eq!(loader.get().simulation.paths, 3);
    }

    #[test]
    fn test_config_loader_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("tether.toml");
        std::fs::write(&config_path, "[simulation]\npaths = 0\n").unwrap();
        assert!(ConfigLoader::load(Some(config_path.as_path())).is_err());

        std::fs::write(&config_path, "not = [valid").unwrap();
        let err = ConfigLoader::load(Some(config_path.as_path())).err().unwrap();
        assert!(err.to_string().contains("failed to parse"));
    }

    #[test]
    fn test_inspect_skips_validation() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("tether.toml");
        std::fs::write(&config_path, "[simulation]\npaths = 0\n").unwrap();

        let (path, config) = ConfigLoader::inspect(Some(config_path.as_path())).unwrap();
        assert_eq!(path, config_path);
        assert_eq!(config.simulation.paths, 0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sample_config_validates() {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../demos/tether.toml");
        let (_, config) = ConfigLoader::inspect(Some(path.as_path())).unwrap();
        assert_eq!(config.constraints.regulations, vec!["gdpr".to_string()]);
        assert_eq!(config.reliability.tools.len(), 3);
        assert!(config.validate().is_ok());
    }

    /// Replace the file in one step so the watcher never sees a half-written config.
    fn replace_file(path: &std::path::Path, contents: &str) {
        let staged = path.with_extension("toml.tmp");
        std::fs::write(&staged, contents).unwrap();
        std::fs::rename(&staged, path).unwrap();
    }

    #[test]
    fn test_config_loader_watch_hot_reloads() {
        use std::time::{Duration, Instant};

        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("tether.toml");
        std::fs::write(&config_path, "[simulation]\npaths = 3\n").unwrap();
        let loader = ConfigLoader::load(Some(config_path.as_path())).unwrap();
        let _watcher = loader.watch().unwrap();
        let shared = loader.shared();

        replace_file(&config_path, "[simulation]\npaths = 6\n");
        let deadline = Instant::now() + Duration::from_secs(5);
        while loader.get().simulation.paths != 6 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(25));
        }
        assert_eq!(loader.get().simulation.paths, 6);
        assert_eq!(shared.read().simulation.paths, 6);

        // An invalid edit keeps the previous config.
        replace_file(&config_path, "[simulation]\npaths = 0\n");
        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(loader.get().simulation.paths, 6);
    }

    #[test]
    fn test_config_loader_reload() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("tether.toml");

        std::fs::write(&config_path, "[simulation]\npaths = 3\n").unwrap();
        let loader = ConfigLoader::load(Some(config_path.as_path())).unwrap();
        assert_eq!(loader.get().simulation.paths, 3);

        std::fs::write(&config_path, "[simulation]\npaths = 5\n").unwrap();
        loader.reload().unwrap();
        assert_eq!(loader.get().simulation.paths, 5);

        // An invalid edit keeps the previous config.
        std::fs::write(&config_path, "[simulation]\npaths = 0\n").unwrap();
        assert!(loader.reload().is_err());
        assert_eq!(loader.get().simulation.paths, 5);
    }
}
