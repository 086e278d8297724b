// Retry classification and delay policy

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::config::GatewayConfig;
use crate::types::GatewayError;

/// Whether a failure is worth retrying.
///
/// Timeouts and network-class downstream failures are transient. Capacity
/// errors, validation failures and anything unrecognised are permanent so
/// logic errors are never masked as retryable.
pub fn is_transient(error: &GatewayError) -> bool {
    match error {
        GatewayError::Timeout { .. } => true,
        GatewayError::Downstream(e) => e.is_transient(),
        GatewayError::CapacityExceeded { .. } | GatewayError::Stopped => false,
    }
}

/// Priority of an item after `retries` retries
pub fn decayed_priority(original: u32, retries: u32) -> u32 {
    original.saturating_sub(retries)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryBackoff {
    /// Same delay before every retry
    #[default]
    Fixed,
    /// Delay doubles per attempt, capped at 32x the base delay
    Exponential,
}

impl FromStr for RetryBackoff {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fixed" => Ok(RetryBackoff::Fixed),
            "exponential" => Ok(RetryBackoff::Exponential),
            other => Err(anyhow::anyhow!("Unknown retry backoff: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
    pub backoff: RetryBackoff,
}

impl RetryPolicy {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            delay: config.retry_delay(),
            backoff: config.retry_backoff,
        }
    }

    /// `retries` is the number of retries already performed
    pub fn should_retry(&self, error: &GatewayError, retries: u32) -> bool {
        retries < self.max_retries && is_transient(error)
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            RetryBackoff::Fixed => self.delay,
            RetryBackoff::Exponential => {
                let exponent = attempt.saturating_sub(1).min(5);
                self.delay.saturating_mul(2u32.pow(exponent))
            }
        }
    }
}
