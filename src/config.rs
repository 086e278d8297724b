use anyhow::{bail, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::time::Duration;

use crate::gateway::retry::RetryBackoff;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub gateway: GatewayConfig,
    pub batch: BatchConfig,
    pub downstream: DownstreamConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub max_concurrent: usize,
    pub max_queue_size: usize,
    pub processing_delay_ms: u64,
    pub retry_delay_ms: u64,
    pub max_retries: u32,
    pub retry_backoff: RetryBackoff,
    /// Timeout per operation category, in milliseconds
    pub timeouts: HashMap<String, u64>,
    /// Applied to categories missing from `timeouts`
    pub default_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    pub chunk_size: usize,
    /// Inputs at or below this size are not worth chunking
    pub batch_threshold: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DownstreamConfig {
    pub base_url: String,
    pub api_key: String,
    pub request_timeout_ms: u64,
}

pub const DEFAULT_TIMEOUTS: &str = "quick:5000,normal:15000,heavy:60000";

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            max_queue_size: 100,
            processing_delay_ms: 200,
            retry_delay_ms: 2000,
            max_retries: 3,
            retry_backoff: RetryBackoff::Fixed,
            timeouts: parse_timeouts(DEFAULT_TIMEOUTS).unwrap_or_default(),
            default_timeout_ms: 30_000,
        }
    }
}

impl GatewayConfig {
    pub fn processing_delay(&self) -> Duration {
        Duration::from_millis(self.processing_delay_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            chunk_size: 50,
            batch_threshold: 100,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            host: "0.0.0.0".to_string(),
        }
    }
}

impl Default for DownstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            api_key: String::new(),
            request_timeout_ms: 60_000,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            gateway: GatewayConfig::default(),
            batch: BatchConfig::default(),
            downstream: DownstreamConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            server: ServerConfig {
                port: var_or("PORT", "3000").parse()?,
                host: var_or("HOST", "0.0.0.0"),
            },
            gateway: GatewayConfig {
                max_concurrent: var_or("GATEWAY_MAX_CONCURRENT", "5").parse()?,
                max_queue_size: var_or("GATEWAY_MAX_QUEUE_SIZE", "100").parse()?,
                processing_delay_ms: var_or("GATEWAY_PROCESSING_DELAY_MS", "200").parse()?,
                retry_delay_ms: var_or("GATEWAY_RETRY_DELAY_MS", "2000").parse()?,
                max_retries: var_or("GATEWAY_MAX_RETRIES", "3").parse()?,
                retry_backoff: var_or("GATEWAY_RETRY_BACKOFF", "fixed").parse()?,
                timeouts: parse_timeouts(&var_or("GATEWAY_TIMEOUTS", DEFAULT_TIMEOUTS))?,
                default_timeout_ms: var_or("GATEWAY_DEFAULT_TIMEOUT_MS", "30000").parse()?,
            },
            batch: BatchConfig {
                chunk_size: var_or("BATCH_CHUNK_SIZE", "50").parse()?,
                batch_threshold: var_or("BATCH_THRESHOLD", "100").parse()?,
            },
            downstream: DownstreamConfig {
                base_url: var_or("INVOICING_API_URL", "http://localhost:8080"),
                api_key: env::var("INVOICING_API_KEY").unwrap_or_default(),
                request_timeout_ms: var_or("INVOICING_HTTP_TIMEOUT_MS", "60000").parse()?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.gateway.max_concurrent == 0 {
            bail!("GATEWAY_MAX_CONCURRENT must be at least 1");
        }
        if self.gateway.max_queue_size == 0 {
            bail!("GATEWAY_MAX_QUEUE_SIZE must be at least 1");
        }
        if self.batch.chunk_size == 0 {
            bail!("BATCH_CHUNK_SIZE must be at least 1");
        }
        Ok(())
    }
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse a `category:millis` list such as `quick:5000,normal:15000`
pub fn parse_timeouts(raw: &str) -> Result<HashMap<String, u64>> {
    let mut timeouts = HashMap::new();
    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let Some((category, millis)) = entry.split_once(':') else {
            bail!("Invalid timeout entry '{}', expected category:millis", entry);
        };
        let category = category.trim();
        if category.is_empty() {
            bail!("Invalid timeout entry '{}', category is empty", entry);
        }
        timeouts.insert(category.to_string(), millis.trim().parse()?);
    }
    Ok(timeouts)
}
