// Running gateway counters, read by health checks

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Lifecycle of a gateway instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayState {
    /// Constructed, dispatcher not started
    #[default]
    Idle,
    Running,
    Stopped,
}

/// Point-in-time view of the gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayStats {
    pub state: GatewayState,
    pub processed: u64,
    pub failed: u64,
    pub retried: u64,
    pub current_depth: usize,
    pub current_in_flight: usize,
    pub scheduled_retries: usize,
    pub max_concurrent: usize,
    pub max_queue_size: usize,
    pub average_wait_ms: f64,
    /// processed / (processed + failed); 1.0 before anything completed
    pub success_rate: f64,
}

/// Live values owned by the queue and dispatcher, merged into a snapshot
#[derive(Debug, Clone, Copy)]
pub struct LiveGauges {
    pub state: GatewayState,
    pub current_depth: usize,
    pub current_in_flight: usize,
    pub scheduled_retries: usize,
    pub max_concurrent: usize,
    pub max_queue_size: usize,
}

#[derive(Debug, Default)]
struct WaitAverage {
    samples: u64,
    average_ms: f64,
}

/// Counters mutated by the dispatcher after each completion
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    processed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    wait: Mutex<WaitAverage>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a success and fold its queue wait into the rolling average
    pub fn record_success(&self, wait: Duration) {
        let wait_ms = wait.as_secs_f64() * 1000.0;
        let mut avg = self.wait.lock().unwrap_or_else(PoisonError::into_inner);
        avg.samples += 1;
        let n = avg.samples as f64;
        avg.average_ms = (avg.average_ms * (n - 1.0) + wait_ms) / n;
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn retried(&self) -> u64 {
        self.retried.load(Ordering::Relaxed)
    }

    pub fn average_wait_ms(&self) -> f64 {
        self.wait.lock().unwrap_or_else(PoisonError::into_inner).average_ms
    }

    pub fn snapshot(&self, gauges: LiveGauges) -> GatewayStats {
        let processed = self.processed();
        let failed = self.failed();
        let completed = processed + failed;
        let success_rate = if completed == 0 {
            1.0
        } else {
            processed as f64 / completed as f64
        };

        GatewayStats {
            state: gauges.state,
            processed,
            failed,
            retried: self.retried(),
            current_depth: gauges.current_depth,
            current_in_flight: gauges.current_in_flight,
            scheduled_retries: gauges.scheduled_retries,
            max_concurrent: gauges.max_concurrent,
            max_queue_size: gauges.max_queue_size,
            average_wait_ms: self.average_wait_ms(),
            success_rate,
        }
    }
}
