//! Unified pipeline configuration.
//!
//! Defaults mirror production values; an optional `config/info_receiver.toml`
//! overlay can replace whole sections, and secrets (API key, allow-lists)
//! come from the environment so they never land in a config file.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "config/info_receiver.toml";
pub const ENV_CONFIG_PATH: &str = "INFO_RECEIVER_CONFIG_PATH";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// "openai" covers any OpenAI-compatible chat-completions endpoint.
    pub provider: String,
    pub model: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub base_url: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
    pub fallback_models: Vec<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            model: "deepseek-chat".into(),
            api_key: None,
            base_url: "https://api.deepseek.com".into(),
            max_tokens: 2000,
            temperature: 0.1,
            timeout_secs: 30,
            fallback_models: vec!["gpt-4o-mini".into(), "gpt-3.5-turbo".into()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    pub timeout_secs: u64,
    pub max_retries: u32,
    /// Base backoff in milliseconds; attempt N sleeps `delay_ms * N`.
    pub delay_ms: u64,
    pub user_agent: String,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            max_retries: 3,
            delay_ms: 1000,
            user_agent: "ArtSlave InfoReceiver Bot 1.0".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeduplicationConfig {
    pub threshold: f32,
    pub enable_similarity_check: bool,
}

impl Default for DeduplicationConfig {
    fn default() -> Self {
        Self {
            threshold: 0.8,
            enable_similarity_check: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub batch_size: usize,
    pub max_concurrency: usize,
    /// Confidence at or above this auto-verifies the resource.
    pub confidence_threshold: f32,
    /// Confidence below this routes the message to manual review.
    pub manual_review_threshold: f32,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_concurrency: 3,
            confidence_threshold: 0.6,
            manual_review_threshold: 0.4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub max_retries: u32,
    /// Base retry backoff in milliseconds; retry N is scheduled `retry_delay_ms * N` out.
    pub retry_delay_ms: u64,
    /// Background worker tick, seconds.
    pub worker_interval_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 5000,
            worker_interval_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    pub error_rate: f32,
    pub queue_length: usize,
    pub processing_latency_ms: f64,
    pub disk_usage: f32,
    pub memory_usage: f32,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            error_rate: 0.1,
            queue_length: 100,
            processing_latency_ms: 10_000.0,
            disk_usage: 0.9,
            memory_usage: 0.9,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub enable_metrics: bool,
    pub metrics_interval_secs: u64,
    pub enable_notifications: bool,
    pub alert_thresholds: AlertThresholds,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enable_metrics: true,
            metrics_interval_secs: 60,
            enable_notifications: false,
            alert_thresholds: AlertThresholds::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InfoReceiverConfig {
    pub llm: LlmConfig,
    pub crawler: CrawlerConfig,
    pub deduplication: DeduplicationConfig,
    pub processing: ProcessingConfig,
    pub queue: QueueConfig,
    pub monitoring: MonitoringConfig,
}

impl InfoReceiverConfig {
    /// Load the TOML overlay (if any) and pull secrets from the environment.
    ///
    /// Resolution order for the overlay path:
    /// 1) `$INFO_RECEIVER_CONFIG_PATH`
    /// 2) `config/info_receiver.toml`
    /// A missing file is not an error; defaults apply.
    pub fn load() -> Result<Self> {
        let path = std::env::var(ENV_CONFIG_PATH).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        let mut cfg = if Path::new(&path).exists() {
            Self::from_toml_file(&path)?
        } else {
            Self::default()
        };
        cfg.apply_env();
        Ok(cfg)
    }

    pub fn from_toml_file(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config from {path}"))?;
        toml::from_str(&raw).with_context(|| format!("parsing config from {path}"))
    }

    /// Secrets and deploy-specific overrides come from env only.
    pub fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("DEEPSEEK_API_KEY").or_else(|_| std::env::var("OPENAI_API_KEY")) {
            if !key.is_empty() {
                self.llm.api_key = Some(key);
            }
        }
        if let Ok(url) = std::env::var("LLM_BASE_URL") {
            if !url.is_empty() {
                self.llm.base_url = url;
            }
        }
        if let Ok(model) = std::env::var("LLM_MODEL") {
            if !model.is_empty() {
                self.llm.model = model;
            }
        }
    }

    /// Email addresses the intake webhook accepts mail for.
    pub fn intake_emails() -> Vec<String> {
        std::env::var("INTAKE_EMAILS")
            .unwrap_or_else(|_| "intake@artslave.com".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_production_values() {
        let cfg = InfoReceiverConfig::default();
        assert_eq!(cfg.deduplication.threshold, 0.8);
        assert_eq!(cfg.processing.confidence_threshold, 0.6);
        assert_eq!(cfg.processing.manual_review_threshold, 0.4);
        assert_eq!(cfg.queue.max_retries, 3);
        assert_eq!(cfg.crawler.max_retries, 3);
        assert_eq!(cfg.monitoring.alert_thresholds.queue_length, 100);
    }

    #[test]
    fn partial_toml_overlay_keeps_other_sections_default() {
        let cfg: InfoReceiverConfig = toml::from_str(
            r#"
            [processing]
            batch_size = 5
            max_concurrency = 2

            [deduplication]
            threshold = 0.9
            "#,
        )
        .unwrap();
        assert_eq!(cfg.processing.batch_size, 5);
        assert_eq!(cfg.processing.max_concurrency, 2);
        assert_eq!(cfg.deduplication.threshold, 0.9);
        // untouched sections fall back to defaults
        assert_eq!(cfg.queue.retry_delay_ms, 5000);
        assert_eq!(cfg.llm.model, "deepseek-chat");
    }
}
