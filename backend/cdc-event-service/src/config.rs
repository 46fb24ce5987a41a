use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{CdcError, Result};

/// Kafka consumer configuration
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    /// Kafka brokers (comma-separated)
    pub brokers: String,
    /// Consumer group ID
    pub group_id: String,
    /// Topics carrying raw change events
    pub topics: Vec<String>,
}

impl KafkaConfig {
    pub fn from_env() -> Self {
        Self {
            brokers: env::var("KAFKA_BROKERS").unwrap_or_else(|_| "kafka:9092".to_string()),
            group_id: env::var("CDC_CONSUMER_GROUP")
                .unwrap_or_else(|_| "cdc-event-service-v1".to_string()),
            topics: env::var("CDC_TOPICS")
                .unwrap_or_else(|_| "cdc.events".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }
}

/// Reconciliation engine tuning, read from `CDC_`-prefixed variables
#[derive(Debug, Clone, Deserialize)]
pub struct ReconcilerConfig {
    /// How long a DELETE waits for its matching INSERT
    #[serde(default = "default_correlation_window_ms")]
    pub correlation_window_ms: u64,
    /// Period of the stale pending-delete sweep
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Age after which the sweep discards a pending delete
    #[serde(default = "default_stale_threshold_secs")]
    pub stale_threshold_secs: u64,
    /// Reclassify INSERTs whose email looks like `updated_*` as UPDATE
    #[serde(default = "default_email_update_heuristic")]
    pub email_update_heuristic: bool,
    /// Append event records to this file instead of the tracing sink
    #[serde(default)]
    pub event_log_path: Option<PathBuf>,
}

fn default_correlation_window_ms() -> u64 {
    500
}

fn default_sweep_interval_secs() -> u64 {
    30
}

fn default_stale_threshold_secs() -> u64 {
    5
}

fn default_email_update_heuristic() -> bool {
    true
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            correlation_window_ms: default_correlation_window_ms(),
            sweep_interval_secs: default_sweep_interval_secs(),
            stale_threshold_secs: default_stale_threshold_secs(),
            email_update_heuristic: default_email_update_heuristic(),
            event_log_path: None,
        }
    }
}

/// One hour
const MAX_CORRELATION_WINDOW_MS: u64 = 3_600_000;

/// One day
const MAX_PERIOD_SECS: u64 = 86_400;

fn check_range(name: &str, value: u64, max: u64) -> Result<()> {
    if value == 0 || value > max {
        return Err(CdcError::Config(format!(
            "{} must be between 1 and {}, got {}",
            name, max, value
        )));
    }
    Ok(())
}

impl ReconcilerConfig {
    pub fn from_env() -> Result<Self> {
        let config: ReconcilerConfig = envy::prefixed("CDC_").from_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        check_range(
            "CDC_CORRELATION_WINDOW_MS",
            self.correlation_window_ms,
            MAX_CORRELATION_WINDOW_MS,
        )?;
        check_range(
            "CDC_SWEEP_INTERVAL_SECS",
            self.sweep_interval_secs,
            MAX_PERIOD_SECS,
        )?;
        check_range(
            "CDC_STALE_THRESHOLD_SECS",
            self.stale_threshold_secs,
            MAX_PERIOD_SECS,
        )?;
        Ok(())
    }

    pub fn correlation_window(&self) -> Duration {
        Duration::from_millis(self.correlation_window_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn stale_threshold(&self) -> Duration {
        Duration::from_secs(self.stale_threshold_secs)
    }
}

/// Top-level service configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub kafka: KafkaConfig,
    pub reconciler: ReconcilerConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let http_port = env::var("HTTP_PORT")
            .ok()
            .map(|s| {
                s.parse::<u16>()
                    .map_err(|e| CdcError::Config(format!("Invalid HTTP_PORT '{}': {}", s, e)))
            })
            .transpose()?
            .unwrap_or(8080);

        Ok(Self {
            http_port,
            kafka: KafkaConfig::from_env(),
            reconciler: ReconcilerConfig::from_env()?,
        })
    }
}
