//! Layered configuration for every process this crate builds (dispatcher,
//! status tracker, zombie detector, failed-occurrence handler, worker).
//! Each concern is a named block with `#[serde(default = "...")]` on every
//! field so a partial TOML override is enough; `Config::from_env` falls
//! back through `SCHEDULER_CONFIG`, a couple of default paths, then
//! built-in defaults, the same layering the database config this crate
//! was adapted from used.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::bus::amqp::AmqpConfig;
use crate::coordination::CoordinationConfig;
use crate::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub coordination: CoordinationConfig,
    pub bus: BusConfig,
    pub logging: LoggingConfig,
    pub dispatcher: DispatcherConfig,
    pub status_tracker: StatusTrackerConfig,
    pub zombie_detector: ZombieDetectorConfig,
    pub failed_occurrence_handler: FailedOccurrenceHandlerConfig,
    pub worker: WorkerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            coordination: CoordinationConfig::default(),
            bus: BusConfig::default(),
            logging: LoggingConfig::default(),
            dispatcher: DispatcherConfig::default(),
            status_tracker: StatusTrackerConfig::default(),
            zombie_detector: ZombieDetectorConfig::default(),
            failed_occurrence_handler: FailedOccurrenceHandlerConfig::default(),
            worker: WorkerConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|err| Error::config(format!("failed to read config file: {err}")))?;
        let config: Config = toml::from_str(&contents).map_err(|err| Error::config(format!("failed to parse config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self> {
        if let Ok(config_path) = std::env::var("SCHEDULER_CONFIG") {
            return Self::load(&config_path);
        }

        let default_paths = ["./config/default.toml", "./config/production.toml", "/etc/scheduler/config.toml"];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::load(path);
            }
        }

        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.pool_size == 0 {
            return Err(Error::config("database pool size must be > 0"));
        }
        if self.worker.worker_id.trim().is_empty() {
            return Err(Error::config("worker.worker_id must not be empty"));
        }
        if self.worker.max_parallel_jobs == 0 {
            return Err(Error::config("worker.max_parallel_jobs must be > 0"));
        }
        if self.dispatcher.lock_ttl_seconds == 0 {
            return Err(Error::config("dispatcher.lock_ttl_seconds must be > 0"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub pool_size: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "scheduler".to_string(),
            username: "scheduler".to_string(),
            password: "scheduler".to_string(),
            pool_size: 20,
        }
    }
}

/// Wraps [`AmqpConfig`] with the same `#[serde(default)]` block pattern
/// every other config section in this crate uses, since `AmqpConfig`
/// itself lives next to the bus implementation it configures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub url: String,
    pub connection_name: String,
    pub max_connect_retries: u32,
    pub retry_delay_ms: u64,
    pub prefetch_count: u16,
}

impl Default for BusConfig {
    fn default() -> Self {
        let amqp = AmqpConfig::default();
        Self {
            url: amqp.url,
            connection_name: amqp.connection_name,
            max_connect_retries: amqp.max_connect_retries,
            retry_delay_ms: amqp.retry_delay_ms,
            prefetch_count: amqp.prefetch_count,
        }
    }
}

impl From<BusConfig> for AmqpConfig {
    fn from(config: BusConfig) -> Self {
        AmqpConfig {
            url: config.url,
            connection_name: config.connection_name,
            max_connect_retries: config.max_connect_retries,
            retry_delay_ms: config.retry_delay_ms,
            prefetch_count: config.prefetch_count,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum LogFormat {
    Json,
    Text,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: LogFormat::Json, file_path: None }
    }
}

/// Mirrors §4.1: polling interval, batch size, leadership lease TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub enabled: bool,
    pub polling_interval_seconds: u64,
    pub batch_size: usize,
    pub lock_ttl_seconds: u64,
    pub startup_recovery_enabled: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            polling_interval_seconds: 10,
            batch_size: 100,
            lock_ttl_seconds: 600,
            startup_recovery_enabled: true,
        }
    }
}

/// Mirrors §4.4: batching and auto-disable circuit breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusTrackerConfig {
    pub enabled: bool,
    pub batch_size: usize,
    pub batch_interval_ms: u64,
    pub auto_disable_threshold: u32,
    pub failure_window_minutes: i64,
    pub auto_re_enable_cooldown_minutes: Option<i64>,
}

impl Default for StatusTrackerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: 50,
            batch_interval_ms: 500,
            auto_disable_threshold: 5,
            failure_window_minutes: 60,
            auto_re_enable_cooldown_minutes: None,
        }
    }
}

/// Mirrors §4.5.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZombieDetectorConfig {
    pub enabled: bool,
    pub check_interval_seconds: u64,
    pub default_zombie_timeout_minutes: i64,
    pub batch_size: usize,
}

impl Default for ZombieDetectorConfig {
    fn default() -> Self {
        Self { enabled: true, check_interval_seconds: 300, default_zombie_timeout_minutes: 10, batch_size: 100 }
    }
}

/// Mirrors §4.6.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FailedOccurrenceHandlerConfig {
    pub enabled: bool,
    pub batch_size: usize,
}

impl Default for FailedOccurrenceHandlerConfig {
    fn default() -> Self {
        Self { enabled: true, batch_size: 50 }
    }
}

/// Per-worker-process settings: identity, capacity, per-job-type routing
/// and capacity, heartbeat cadence, default execution timeout, and the
/// outbox's local storage path for offline resilience.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub instance_id: String,
    pub max_parallel_jobs: u32,
    pub job_heartbeat_interval_seconds: u64,
    pub worker_heartbeat_interval_seconds: u64,
    pub execution_timeout_seconds: Option<i64>,
    pub outbox_path: String,
    pub job_types: Vec<JobTypeConfig>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: "default-worker".to_string(),
            instance_id: uuid::Uuid::new_v4().to_string(),
            max_parallel_jobs: 10,
            job_heartbeat_interval_seconds: 60,
            worker_heartbeat_interval_seconds: 30,
            execution_timeout_seconds: None,
            outbox_path: "./data/outbox".to_string(),
            job_types: Vec::new(),
        }
    }
}

/// Per-`(workerId, jobNameInWorker)` consumer settings: routing pattern
/// and the consumer-type capacity gate from §4.2.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobTypeConfig {
    pub job_name_in_worker: String,
    pub routing_pattern: String,
    pub max_parallel_jobs: u32,
    pub execution_timeout_seconds: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_pool_size() {
        let mut config = Config::default();
        config.database.pool_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_empty_worker_id() {
        let mut config = Config::default();
        config.worker.worker_id = "  ".to_string();
        assert!(config.validate().is_err());
    }
}
