use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::{debug, warn};

use tether_core::{Event, EventBus, ToolHealth};

/// Weight of the newest observation in the moving averages.
pub const SMOOTHING_FACTOR: f64 = 0.1;

pub const DEFAULT_RELIABILITY_THRESHOLD: f64 = 0.85;

/// Smoothed response time (seconds) above which a performance alert fires.
pub const DEFAULT_PERFORMANCE_THRESHOLD_SECS: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    /// Success rate fell below the reliability threshold.
    Reliability,
    /// Average response time rose above the performance threshold.
    Performance,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reliability => "reliability",
            Self::Performance => "performance",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolAlert {
    pub timestamp: DateTime<Utc>,
    pub tool: String,
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub value: f64,
    pub message: String,
}

/// Receives tool alerts on the thread that reported the execution.
pub trait AlertSink: Send + Sync {
    fn on_alert(&self, alert: &ToolAlert) -> anyhow::Result<()>;
}

impl<F> AlertSink for F
where
    F: Fn(&ToolAlert) -> anyhow::Result<()> + Send + Sync,
{
    fn on_alert(&self, alert: &ToolAlert) -> anyhow::Result<()> {
        self(alert)
    }
}

/// Tracks how reliable each external tool actually is.
///
/// Every tool has its own lock, so concurrent reports for the same tool are
/// serialized while reports for different tools never contend.
pub struct ReliabilityMonitor {
    threshold: f64,
    performance_threshold: f64,
    tools: DashMap<String, Arc<Mutex<ToolHealth>>>,
    /// Tool names in registration order.
    order: RwLock<Vec<String>>,
    sinks: RwLock<Vec<Arc<dyn AlertSink>>>,
    events: Option<EventBus>,
}

impl Default for ReliabilityMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_RELIABILITY_THRESHOLD)
    }
}

impl ReliabilityMonitor {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            performance_threshold: DEFAULT_PERFORMANCE_THRESHOLD_SECS,
            tools: DashMap::new(),
            order: RwLock::new(Vec::new()),
            sinks: RwLock::new(Vec::new()),
            events: None,
        }
    }

    pub fn with_performance_threshold(mut self, secs: f64) -> Self {
        self.performance_threshold = secs;
        self
    }

    /// Republish every alert on the given bus.
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Start monitoring a tool. Registering a known tool keeps its history.
    pub fn register(&self, tool_name: &str) {
        self.entry(tool_name);
    }

    pub fn add_sink(&self, sink: Arc<dyn AlertSink>) {
        self.sinks.write().push(sink);
    }

    /// Fold one execution outcome into the tool's health and fire any alerts.
    /// Returns the updated health.
    pub fn record_execution(&self, tool_name: &str, success: bool, response_time: f64) -> ToolHealth {
        let response_time = if response_time.is_finite() && response_time >= 0.0 {
            response_time
        } else {
            warn!(tool = tool_name, response_time, "ignoring invalid response time");
            0.0
        };
        let entry = self.entry(tool_name);

        let (snapshot, alerts) = {
            let mut health = entry.lock();
            let observed = if success { 1.0 } else { 0.0 };
            health.success_rate = (SMOOTHING_FACTOR * observed
                + (1.0 - SMOOTHING_FACTOR) * health.success_rate)
                .clamp(0.0, 1.0);
            health.avg_response_time = SMOOTHING_FACTOR * response_time
                + (1.0 - SMOOTHING_FACTOR) * health.avg_response_time;

            if !success {
                health.failure_count += 1;
                health.last_failure = Some(Utc::now());
            }

            let mut alerts = Vec::new();
            if health.success_rate < self.threshold {
                health.drift_detected = true;
                alerts.push(alert(tool_name, AlertKind::Reliability, health.success_rate));
            }
            if health.avg_response_time > self.performance_threshold {
                alerts.push(alert(tool_name, AlertKind::Performance, health.avg_response_time));
            }
            (health.clone(), alerts)
        };

        debug!(
            tool = tool_name,
            success,
            success_rate = snapshot.success_rate,
            avg_response_time = snapshot.avg_response_time,
            "recorded tool execution"
        );

        for alert in &alerts {
            self.dispatch(alert);
        }
        snapshot
    }

    pub fn get_tool_health(&self, tool_name: &str) -> Option<ToolHealth> {
        self.tools.get(tool_name).map(|e| e.value().lock().clone())
    }

    /// Health of every known tool, in registration order.
    pub fn all_health(&self) -> Vec<ToolHealth> {
        let order = self.order.read();
        order
            .iter()
            .filter_map(|name| self.get_tool_health(name))
            .collect()
    }

    /// Names of tools currently below the reliability threshold, in registration order.
    pub fn get_unreliable_tools(&self) -> Vec<String> {
        self.all_health()
            .into_iter()
            .filter(|h| h.success_rate < self.threshold)
            .map(|h| h.tool_name)
            .collect()
    }

    fn entry(&self, tool_name: &str) -> Arc<Mutex<ToolHealth>> {
        if let Some(existing) = self.tools.get(tool_name) {
            return Arc::clone(existing.value());
        }
        // Lock order: `order` before any map shard.
        let mut order = self.order.write();
        let entry = self
            .tools
            .entry(tool_name.to_string())
            .or_insert_with(|| {
                order.push(tool_name.to_string());
                debug!(tool = tool_name, "registered tool for monitoring");
                Arc::new(Mutex::new(ToolHealth::new(tool_name)))
            });
        Arc::clone(entry.value())
    }

    /// Deliver to every sink in registration order. A failing or panicking
    /// sink is logged and skipped.
    fn dispatch(&self, alert: &ToolAlert) {
        warn!(
            tool = %alert.tool,
            kind = alert.kind.as_str(),
            value = alert.value,
            "{}",
            alert.message
        );

        let sinks: Vec<Arc<dyn AlertSink>> = self.sinks.read().clone();
        for (index, sink) in sinks.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| sink.on_alert(alert))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(sink = index, error = %e, "alert sink failed"),
                Err(_) => warn!(sink = index, "alert sink panicked"),
            }
        }

        if let Some(ref events) = self.events {
            events.publish(Event::ToolAlert {
                tool: alert.tool.clone(),
                alert_type: alert.kind.as_str().to_string(),
                value: alert.value,
                timestamp: alert.timestamp,
            });
        }
    }
}

fn alert(tool: &str, kind: AlertKind, value: f64) -> ToolAlert {
    ToolAlert {
        timestamp: Utc::now(),
        tool: tool.to_string(),
        kind,
        value,
        message: format!("{} {} issue detected: {:.2}", tool, kind.as_str(), value),
    }
}
