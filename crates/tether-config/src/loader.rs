use notify::{Event as NotifyEvent, EventKind, RecursiveMode, Watcher};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use tether_core::{Result, TetherError};

use crate::schema::TetherConfig;

/// Loads and optionally hot-reloads the Tether configuration.
pub struct ConfigLoader {
    config: Arc<RwLock<TetherConfig>>,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > TETHER_CONFIG env > ~/.tether/tether.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("TETHER_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".tether")
            .join("tether.toml")
    }

    /// Load the config from disk, falling back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            Self::parse_file(&config_path)?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            TetherConfig::default()
        };

        let config = Self::apply_env_overrides(config);

        // Log warnings, fail on errors
        match config.validate() {
            Ok(warnings) => {
                for w in &warnings {
                    warn!("{}", w);
                }
            }
            Err(e) => {
                return Err(TetherError::Config(e));
            }
        }

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
        })
    }

    /// Parse the config at the resolved path with env overrides applied, skipping validation.
    /// A missing file yields defaults.
    pub fn inspect(path: Option<&Path>) -> Result<(PathBuf, TetherConfig)> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            Self::parse_file(&config_path)?
        } else {
            TetherConfig::default()
        };
        Ok((config_path, Self::apply_env_overrides(config)))
    }

    /// Get a read snapshot of the current config.
    pub fn get(&self) -> TetherConfig {
        self.config.read().clone()
    }

    /// Get a shared reference for subscription.
    pub fn shared(&self) -> Arc<RwLock<TetherConfig>> {
        Arc::clone(&self.config)
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    fn parse_file(path: &Path) -> Result<TetherConfig> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str::<TetherConfig>(&raw).map_err(|e| {
            TetherError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Apply env var overrides (TETHER_LOG_LEVEL, TETHER_BUDGET, etc.)
    fn apply_env_overrides(mut config: TetherConfig) -> TetherConfig {
        if let Ok(v) = std::env::var("TETHER_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Ok(v) = std::env::var("TETHER_BUDGET") {
            if let Ok(budget) = v.parse::<f64>() {
                config.constraints.budget = Some(budget);
            }
        }
        if let Ok(v) = std::env::var("TETHER_TIME_LIMIT") {
            if let Ok(secs) = v.parse::<u64>() {
                config.constraints.time_limit_secs = Some(secs);
            }
        }
        if let Ok(v) = std::env::var("TETHER_RELIABILITY_THRESHOLD") {
            if let Ok(threshold) = v.parse::<f64>() {
                config.reliability.threshold = threshold;
            }
        }
        if let Ok(v) = std::env::var("TETHER_STORE_PATH") {
            config.store.path = PathBuf::from(v);
        }
        config
    }

    /// Reload the config from disk.
    pub fn reload(&self) -> Result<()> {
        if !self.config_path.exists() {
            return Err(TetherError::Config(format!(
                "config file not found: {}",
                self.config_path.display()
            )));
        }
        let new_config = Self::apply_env_overrides(Self::parse_file(&self.config_path)?);
        new_config.validate().map_err(TetherError::Config)?;
        *self.config.write() = new_config;
        info!("configuration reloaded");
        Ok(())
    }

    /// Start a background file watcher that swaps in the new config when the file changes.
    /// Returns a handle to the watcher (must be kept alive for watching to continue).
    pub fn watch(&self) -> Result<notify::RecommendedWatcher> {
        let config = Arc::clone(&self.config);
        let path_for_event = self.config_path.clone();

        info!(config_path = ?self.config_path, "starting config file watcher");

        let mut watcher =
            notify::recommended_watcher(move |res: std::result::Result<NotifyEvent, notify::Error>| {
                let event = match res {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(error = %e, "file watcher error");
                        return;
                    }
                };
                if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    return;
                }
                let is_our_file = event
                    .paths
                    .iter()
                    .any(|p| p.file_name() == path_for_event.file_name());
                if !is_our_file {
                    return;
                }

                info!("config file changed, reloading");
                match Self::parse_file(&path_for_event) {
                    Ok(new_config) => {
                        let new_config = Self::apply_env_overrides(new_config);
                        if let Err(e) = new_config.validate() {
                            warn!(error = %e, "config file has errors, keeping current config");
                            return;
                        }
                        *config.write() = new_config;
                        info!("configuration hot-reloaded successfully");
                    }
                    Err(e) => {
                        warn!(error = %e, "config file has errors, keeping current config");
                    }
                }
            })
            .map_err(|e| TetherError::Config(format!("failed to create file watcher: {}", e)))?;

        // Watch the parent directory (some editors create temp files + rename)
        let watch_path = self.config_path.parent().unwrap_or(Path::new("."));
        watcher
            .watch(watch_path, RecursiveMode::NonRecursive)
            .map_err(|e| TetherError::Config(format!("failed to watch config directory: {}", e)))?;

        Ok(watcher)
    }
}
