use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Connection and retry settings for the Redis-backed coordination store.
/// Field shape follows the same layered-config pattern the rest of this
/// crate's configuration uses: every field has a sane default so a
/// partial TOML override is enough.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    pub url: String,
    pub pool_size: u32,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub retry_on_failure: bool,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub key_prefix: String,
    pub default_ttl_secs: u64,
}

impl CoordinationConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            pool_size: 16,
            connect_timeout_ms: 5_000,
            read_timeout_ms: 2_000,
            write_timeout_ms: 2_000,
            retry_on_failure: true,
            max_retries: 5,
            retry_delay_ms: 200,
            key_prefix: "Milvaion:JobScheduler:".to_string(),
            default_ttl_secs: 86_400,
        }
    }
}
