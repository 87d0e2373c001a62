//! Pipeline configuration
//!
//! The JSON file deserializes into [`Config`], where every knob is optional.
//! [`Config::resolve`] fills in defaults and converts raw seconds into
//! [`Duration`]s, producing the [`PipelineConfig`] the pipeline runs with.

use std::path::PathBuf;
use std::time::Duration;

use tracing::trace;

use crate::pipeline::bootstrap::RetryPolicy;

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Config {
    /// Leading subject token for every topic
    pub namespace: Option<String>,

    pub bus: Option<BusConfig>,

    pub storage: Option<StorageConfig>,

    pub bootstrap: Option<BootstrapConfig>,

    pub batch: Option<BatchConfig>,

    pub monitor: Option<MonitorConfig>,

    pub alerts: Option<AlertConfig>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct BusConfig {
    #[serde(default = "default_bus_url")]
    pub url: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_sqlite_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct BootstrapConfig {
    pub store_attempts: Option<u32>,
    pub bus_attempts: Option<u32>,
    pub retry_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct BatchConfig {
    pub interval_secs: Option<u64>,
    pub window_secs: Option<u64>,
    pub bucket_secs: Option<u64>,
    pub attribute: Option<String>,
    pub retention_days: Option<u32>,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct MonitorConfig {
    pub interval_secs: Option<u64>,
    pub source: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct AlertConfig {
    pub cpu_threshold: Option<f64>,
    pub memory_threshold: Option<f64>,
}

/// Fully resolved runtime configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub namespace: String,
    pub store_retry: RetryPolicy,
    pub bus_retry: RetryPolicy,
    pub batch: BatchSettings,
    pub monitor: MonitorSettings,
    pub thresholds: Thresholds,
}

#[derive(Debug, Clone)]
pub struct BatchSettings {
    /// How often aggregation and retention run
    pub interval: Duration,

    /// Length of the trailing aggregation window
    pub window: Duration,

    /// Width of an aggregate time bucket
    pub bucket: Duration,

    /// Numeric attribute being aggregated
    pub attribute: String,

    /// Raw events older than this are deleted
    pub retention: Duration,
}

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub interval: Duration,
    pub source: String,
    pub category: String,
}

/// Alerting limits; a value strictly above the limit alerts
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub cpu: f64,
    pub memory: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cpu: DEFAULT_CPU_THRESHOLD,
            memory: DEFAULT_MEMORY_THRESHOLD,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Config::default().resolve()
    }
}

const DEFAULT_NAMESPACE: &str = "telemetry";
const DEFAULT_STORE_ATTEMPTS: u32 = 15;
const DEFAULT_BUS_ATTEMPTS: u32 = 10;
const DEFAULT_RETRY_INTERVAL_SECS: u64 = 2;
const DEFAULT_BATCH_INTERVAL_SECS: u64 = 5 * 60;
const DEFAULT_WINDOW_SECS: u64 = 60 * 60;
const DEFAULT_BUCKET_SECS: u64 = 60 * 60;
const DEFAULT_ATTRIBUTE: &str = "cpu_usage";
const DEFAULT_RETENTION_DAYS: u32 = 30;
const DEFAULT_MONITOR_INTERVAL_SECS: u64 = 30;
const DEFAULT_MONITOR_SOURCE: &str = "system";
const DEFAULT_MONITOR_CATEGORY: &str = "host";
const DEFAULT_CPU_THRESHOLD: f64 = 90.0;
const DEFAULT_MEMORY_THRESHOLD: f64 = 85.0;

fn default_bus_url() -> String {
    "nats://127.0.0.1:4222".to_string()
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./telemetry.db")
}

impl Config {
    pub fn resolve(&self) -> PipelineConfig {
        let bootstrap = self.bootstrap.clone().unwrap_or_default();
        let batch = self.batch.clone().unwrap_or_default();
        let monitor = self.monitor.clone().unwrap_or_default();
        let alerts = self.alerts.clone().unwrap_or_default();

        let retry_interval = Duration::from_secs(
            bootstrap
                .retry_interval_secs
                .unwrap_or(DEFAULT_RETRY_INTERVAL_SECS),
        );

        let retention_days = batch.retention_days.unwrap_or(DEFAULT_RETENTION_DAYS);

        PipelineConfig {
            namespace: self
                .namespace
                .clone()
                .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            store_retry: RetryPolicy {
                max_attempts: bootstrap.store_attempts.unwrap_or(DEFAULT_STORE_ATTEMPTS),
                interval: retry_interval,
            },
            bus_retry: RetryPolicy {
                max_attempts: bootstrap.bus_attempts.unwrap_or(DEFAULT_BUS_ATTEMPTS),
                interval: retry_interval,
            },
            batch: BatchSettings {
                interval: Duration::from_secs(
                    batch.interval_secs.unwrap_or(DEFAULT_BATCH_INTERVAL_SECS),
                ),
                window: Duration::from_secs(batch.window_secs.unwrap_or(DEFAULT_WINDOW_SECS)),
                bucket: Duration::from_secs(batch.bucket_secs.unwrap_or(DEFAULT_BUCKET_SECS)),
                attribute: batch
                    .attribute
                    .unwrap_or_else(|| DEFAULT_ATTRIBUTE.to_string()),
                retention: Duration::from_secs(retention_days as u64 * 24 * 60 * 60),
            },
            monitor: MonitorSettings {
                interval: Duration::from_secs(
                    monitor
                        .interval_secs
                        .unwrap_or(DEFAULT_MONITOR_INTERVAL_SECS),
                ),
                source: monitor
                    .source
                    .unwrap_or_else(|| DEFAULT_MONITOR_SOURCE.to_string()),
                category: monitor
                    .category
                    .unwrap_or_else(|| DEFAULT_MONITOR_CATEGORY.to_string()),
            },
            thresholds: Thresholds {
                cpu: alerts.cpu_threshold.unwrap_or(DEFAULT_CPU_THRESHOLD),
                memory: alerts.memory_threshold.unwrap_or(DEFAULT_MEMORY_THRESHOLD),
            },
        }
    }

    /// Bus URL, with the environment taking precedence over the file
    pub fn bus_url(&self) -> String {
        crate::util::get_bus_url().unwrap_or_else(|| {
            self.bus
                .as_ref()
                .map(|bus| bus.url.clone())
                .unwrap_or_else(default_bus_url)
        })
    }

    /// Database path, with the environment taking precedence over the file
    pub fn db_path(&self) -> PathBuf {
        crate::util::get_db_path().unwrap_or_else(|| {
            self.storage
                .as_ref()
                .map(|storage| storage.path.clone())
                .unwrap_or_else(default_sqlite_path)
        })
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    parse_config(&file_content)
}

pub fn parse_config(content: &str) -> anyhow::Result<Config> {
    serde_json::from_str(content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
