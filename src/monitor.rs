//! Pipeline monitoring: metric snapshots, threshold alerts, health scoring.
//!
//! A periodic task collects one `SystemMetrics` snapshot per interval, keeps
//! a rolling 24h in-memory history, mirrors the headline numbers into the
//! Prometheus recorder, and raises/resolves threshold alerts. Alert fan-out
//! goes through the optional webhook notifier.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::MonitoringConfig;
use crate::notify::{AlertPayload, AlertSeverity, WebhookNotifier};
use crate::store::Store;

/// Snapshots older than this are pruned from the in-memory history.
const HISTORY_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Clone, Serialize)]
pub struct SystemMetrics {
    pub timestamp: DateTime<Utc>,
    pub total_messages: usize,
    pub queue_length: usize,
    pub processing_messages: usize,
    pub completed_messages: usize,
    pub failed_messages: usize,
    pub manual_review_messages: usize,
    pub total_resources: usize,
    pub verified_resources: usize,
    pub error_rate: f32,
    pub average_confidence: f32,
    pub average_processing_time_ms: f64,
    pub memory_usage: f32,
    pub disk_usage: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id: Uuid,
    pub kind: String,
    pub severity: AlertSeverity,
    pub message: String,
    pub value: f64,
    pub threshold: f64,
    pub raised_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub score: i32,
    pub issues: Vec<String>,
    pub metrics: SystemMetrics,
    pub active_alerts: Vec<Alert>,
}

pub struct Monitor {
    config: MonitoringConfig,
    store: Arc<Store>,
    notifier: Option<WebhookNotifier>,
    history: Mutex<VecDeque<SystemMetrics>>,
    active_alerts: Mutex<HashMap<String, Alert>>,
}

impl Monitor {
    pub fn new(config: MonitoringConfig, store: Arc<Store>) -> Self {
        let notifier = if config.enable_notifications {
            WebhookNotifier::from_env()
        } else {
            None
        };
        Self {
            config,
            store,
            notifier,
            history: Mutex::new(VecDeque::new()),
            active_alerts: Mutex::new(HashMap::new()),
        }
    }

    /// Take one snapshot: read store aggregates, record history, mirror
    /// gauges, evaluate thresholds. Returns the fresh snapshot.
    pub async fn collect(&self) -> SystemMetrics {
        let stats = self.store.stats();
        let attempts = stats.completed_messages + stats.failed_messages;
        let error_rate = if attempts > 0 {
            stats.failed_messages as f32 / attempts as f32
        } else {
            0.0
        };

        let snapshot = SystemMetrics {
            timestamp: Utc::now(),
            total_messages: stats.total_messages,
            queue_length: stats.pending_messages,
            processing_messages: stats.processing_messages,
            completed_messages: stats.completed_messages,
            failed_messages: stats.failed_messages,
            manual_review_messages: stats.manual_review_messages,
            total_resources: stats.total_resources,
            verified_resources: stats.verified_resources,
            error_rate,
            average_confidence: stats.average_confidence,
            average_processing_time_ms: stats.average_processing_time_ms,
            memory_usage: memory_usage_fraction(),
            disk_usage: disk_usage_fraction(),
        };

        {
            let mut history = self.history.lock().expect("history mutex poisoned");
            history.push_back(snapshot.clone());
            let cutoff = snapshot.timestamp - chrono::Duration::hours(HISTORY_WINDOW_HOURS);
            while history.front().map(|m| m.timestamp < cutoff).unwrap_or(false) {
                history.pop_front();
            }
        }

        if self.config.enable_metrics {
            record_prometheus(&snapshot);
        }
        self.evaluate_thresholds(&snapshot).await;
        snapshot
    }

    /// Snapshots recorded since `since` (the whole window when `None`).
    pub fn history(&self, since: Option<DateTime<Utc>>) -> Vec<SystemMetrics> {
        let history = self.history.lock().expect("history mutex poisoned");
        history
            .iter()
            .filter(|m| since.map(|t| m.timestamp >= t).unwrap_or(true))
            .cloned()
            .collect()
    }

    pub fn active_alerts(&self) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self
            .active_alerts
            .lock()
            .expect("alerts mutex poisoned")
            .values()
            .cloned()
            .collect();
        alerts.sort_by_key(|a| a.raised_at);
        alerts
    }

    /// Health report derived from the latest snapshot (collecting one if
    /// the history is empty).
    pub async fn health(&self) -> HealthReport {
        let latest = {
            let history = self.history.lock().expect("history mutex poisoned");
            history.back().cloned()
        };
        let metrics = match latest {
            Some(m) => m,
            None => self.collect().await,
        };
        let active_alerts = self.active_alerts();

        let mut score = 100i32;
        let mut issues = Vec::new();
        if metrics.error_rate > self.config.alert_thresholds.error_rate {
            score -= 30;
            issues.push(format!("error rate {:.1}%", metrics.error_rate * 100.0));
        }
        if metrics.queue_length > self.config.alert_thresholds.queue_length {
            score -= 20;
            issues.push(format!("queue backlog {}", metrics.queue_length));
        }
        if metrics.memory_usage > 0.8 {
            score -= 15;
            issues.push(format!("memory usage {:.0}%", metrics.memory_usage * 100.0));
        }
        score -= 5 * active_alerts.len() as i32;
        score = score.max(0);

        let status = if score >= 80 {
            HealthStatus::Healthy
        } else if score >= 60 {
            HealthStatus::Warning
        } else {
            HealthStatus::Critical
        };

        HealthReport {
            status,
            score,
            issues,
            metrics,
            active_alerts,
        }
    }

    async fn evaluate_thresholds(&self, m: &SystemMetrics) {
        let t = &self.config.alert_thresholds;
        let checks: [(&str, AlertSeverity, f64, f64, String); 3] = [
            (
                "error_rate",
                AlertSeverity::Critical,
                m.error_rate as f64,
                t.error_rate as f64,
                format!("error rate {:.1}% above threshold", m.error_rate * 100.0),
            ),
            (
                "queue_length",
                AlertSeverity::Warning,
                m.queue_length as f64,
                t.queue_length as f64,
                format!("queue backlog at {} messages", m.queue_length),
            ),
            (
                "processing_latency",
                AlertSeverity::Warning,
                m.average_processing_time_ms,
                t.processing_latency_ms,
                format!(
                    "average processing time {:.0}ms above threshold",
                    m.average_processing_time_ms
                ),
            ),
        ];

        for (kind, severity, value, threshold, message) in checks {
            self.update_alert(kind, severity, value, threshold, message)
                .await;
        }
        self.update_alert(
            "memory_usage",
            AlertSeverity::Warning,
            m.memory_usage as f64,
            t.memory_usage as f64,
            format!("memory usage at {:.0}%", m.memory_usage * 100.0),
        )
        .await;
        self.update_alert(
            "disk_usage",
            AlertSeverity::Warning,
            m.disk_usage as f64,
            t.disk_usage as f64,
            format!("disk usage at {:.0}%", m.disk_usage * 100.0),
        )
        .await;
    }

    /// Raise the alert when `value > threshold`, resolve it when it drops
    /// back. Raising an already-active alert is a no-op.
    async fn update_alert(
        &self,
        kind: &str,
        severity: AlertSeverity,
        value: f64,
        threshold: f64,
        message: String,
    ) {
        let breached = value > threshold;
        let transition = {
            let mut alerts = self.active_alerts.lock().expect("alerts mutex poisoned");
            if breached && !alerts.contains_key(kind) {
                let alert = Alert {
                    id: Uuid::new_v4(),
                    kind: kind.to_string(),
                    severity,
                    message: message.clone(),
                    value,
                    threshold,
                    raised_at: Utc::now(),
                };
                alerts.insert(kind.to_string(), alert);
                Some(true)
            } else if !breached && alerts.remove(kind).is_some() {
                Some(false)
            } else {
                None
            }
        };

        match transition {
            Some(true) => {
                warn!(kind, value, threshold, "alert raised: {message}");
                counter!("info_receiver_alerts_total", "kind" => kind.to_string()).increment(1);
                if let Some(notifier) = &self.notifier {
                    let payload = AlertPayload {
                        severity,
                        kind: kind.to_string(),
                        message,
                        value,
                        threshold,
                        timestamp: Utc::now(),
                    };
                    if let Err(e) = notifier.send_alert(&payload).await {
                        warn!(kind, "alert delivery failed: {e:#}");
                    }
                }
            }
            Some(false) => info!(kind, "alert resolved"),
            None => {}
        }
    }

    /// Periodic collection loop; runs until the process exits.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let interval = Duration::from_secs(self.config.metrics_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.collect().await;
            }
        })
    }
}

fn record_prometheus(m: &SystemMetrics) {
    ensure_metrics_described();
    gauge!("info_receiver_queue_length").set(m.queue_length as f64);
    gauge!("info_receiver_messages_total").set(m.total_messages as f64);
    gauge!("info_receiver_messages_failed").set(m.failed_messages as f64);
    gauge!("info_receiver_resources_total").set(m.total_resources as f64);
    gauge!("info_receiver_resources_verified").set(m.verified_resources as f64);
    gauge!("info_receiver_error_rate").set(m.error_rate as f64);
    gauge!("info_receiver_avg_confidence").set(m.average_confidence as f64);
    gauge!("info_receiver_avg_processing_ms").set(m.average_processing_time_ms);
    gauge!("info_receiver_memory_usage").set(m.memory_usage as f64);
    gauge!("info_receiver_disk_usage").set(m.disk_usage as f64);
}

fn ensure_metrics_described() {
    static DESCRIBED: OnceCell<()> = OnceCell::new();
    DESCRIBED.get_or_init(|| {
        describe_gauge!("info_receiver_queue_length", "Pending messages awaiting processing");
        describe_gauge!("info_receiver_messages_total", "Raw messages received");
        describe_gauge!("info_receiver_messages_failed", "Messages in terminal FAILED state");
        describe_gauge!("info_receiver_resources_total", "Resources persisted");
        describe_gauge!("info_receiver_resources_verified", "Resources auto-verified");
        describe_gauge!("info_receiver_error_rate", "Failed / attempted message ratio");
        describe_gauge!("info_receiver_avg_confidence", "Mean extraction confidence");
        describe_gauge!("info_receiver_avg_processing_ms", "Mean pipeline latency, ms");
        describe_gauge!("info_receiver_memory_usage", "Resident memory fraction");
        describe_gauge!("info_receiver_disk_usage", "Data volume usage fraction");
        describe_counter!("info_receiver_alerts_total", "Threshold alerts raised");
    });
}

/// Resident-set fraction of total memory, via procfs. Best effort; 0.0
/// wherever the files are unavailable.
fn memory_usage_fraction() -> f32 {
    fn read_kb(path: &str, key: &str) -> Option<u64> {
        let text = std::fs::read_to_string(path).ok()?;
        text.lines()
            .find(|l| l.starts_with(key))?
            .split_whitespace()
            .nth(1)?
            .parse()
            .ok()
    }
    let rss = read_kb("/proc/self/status", "VmRSS:");
    let total = read_kb("/proc/meminfo", "MemTotal:");
    match (rss, total) {
        (Some(rss), Some(total)) if total > 0 => (rss as f32 / total as f32).clamp(0.0, 1.0),
        _ => 0.0,
    }
}

/// Data-volume usage fraction. The store is in-memory for now, so there is
/// no volume to sample; reports 0.0 until a persistent backend lands.
/// The threshold and alert plumbing are live regardless.
fn disk_usage_fraction() -> f32 {
    0.0
}
