use serde::{Deserialize, Serialize};

use crate::listener::decoder::TopicLayout;
use crate::utils::retry::RetryConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listener: ListenerConfig,
    pub decoder: TopicLayout,
    pub retry: RetryQueueConfig,
    pub health: HealthConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    pub ws_url: Option<String>,
    pub contract_address: Option<String>,
    pub restart_cooldown_secs: u64,
    pub auto_start: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            ws_url: None,
            contract_address: None,
            restart_cooldown_secs: 5,
            auto_start: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryQueueConfig {
    pub drain_interval_secs: u64,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub capacity: usize,
    // None keeps failed entries parked until they succeed
    pub max_drain_cycles: Option<u32>,
}

impl Default for RetryQueueConfig {
    fn default() -> Self {
        Self {
            drain_interval_secs: 300,
            max_attempts: 3,
            base_delay_ms: 1_000,
            capacity: 10_000,
            max_drain_cycles: None,
        }
    }
}

impl RetryQueueConfig {
    /// Per-entry backoff used by the drain task: plain doubling, no jitter.
    pub fn backoff(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts.max(1),
            base_delay_ms: self.base_delay_ms,
            max_delay_ms: self
                .base_delay_ms
                .saturating_mul(1 << self.max_attempts.min(16)),
            exponential: 2.0,
            jitter: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub stale_after_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub mongodb_uri: Option<String>,
    pub database: String,
    pub collection: String,
    pub timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            mongodb_uri: None,
            database: "0xmart".to_string(),
            collection: "transactions".to_string(),
            timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub address: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}
