//! Timeout Policy
//!
//! Maps an operation category to a duration and bounds execution with it.
//! Categories are an open set of labels: unknown ones fall back to a
//! conservative default so new call sites work without policy changes.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use crate::config::GatewayConfig;
use crate::downstream::DownstreamError;
use crate::types::GatewayError;

/// Well-known operation categories
pub mod category {
    /// Catalog lookups and other millisecond-scale reads
    pub const QUICK: &str = "quick";
    pub const NORMAL: &str = "normal";
    /// Invoice issuance and other multi-second calls
    pub const HEAVY: &str = "heavy";
}

#[derive(Debug, Clone)]
pub struct TimeoutPolicy {
    timeouts: HashMap<String, Duration>,
    fallback: Duration,
}

impl TimeoutPolicy {
    /// Policy with no categories; everything uses `fallback`
    pub fn new(fallback: Duration) -> Self {
        Self {
            timeouts: HashMap::new(),
            fallback,
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        let policy = Self::new(Duration::from_millis(config.default_timeout_ms));
        config
            .timeouts
            .iter()
            .fold(policy, |policy, (category, millis)| {
                policy.with_category(category.clone(), Duration::from_millis(*millis))
            })
    }

    /// Set the timeout for a category
    pub fn with_category(mut self, category: impl Into<String>, timeout: Duration) -> Self {
        self.timeouts.insert(category.into(), timeout);
        self
    }

    pub fn timeout_for(&self, category: &str) -> Duration {
        self.timeouts.get(category).copied().unwrap_or(self.fallback)
    }

    /// Run `operation`, failing with [`GatewayError::Timeout`] once the
    /// category's bound elapses. The timed-out future is dropped.
    pub async fn execute<T, F>(&self, category: &str, operation: F) -> Result<T, GatewayError>
    where
        F: Future<Output = Result<T, DownstreamError>>,
    {
        let limit = self.timeout_for(category);
        match tokio::time::timeout(limit, operation).await {
            Ok(result) => result.map_err(GatewayError::from),
            Err(_) => Err(GatewayError::Timeout {
                category: category.to_string(),
                timeout_ms: limit.as_millis() as u64,
            }),
        }
    }
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self::from_config(&GatewayConfig::default())
    }
}
