// Type definitions shared across the gateway and the batch pipeline

use serde::{Deserialize, Serialize};

use crate::downstream::DownstreamError;

/// Free-form request metadata. Carried for logging and metrics only, never
/// interpreted by the queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    pub tenant_id: Option<String>,
    pub operation: String,
}

impl RequestContext {
    /// Context without a tenant (system-level calls)
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            tenant_id: None,
            operation: operation.into(),
        }
    }

    /// Context scoped to a tenant
    pub fn for_tenant(tenant_id: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            tenant_id: Some(tenant_id.into()),
            operation: operation.into(),
        }
    }

    pub fn tenant(&self) -> &str {
        self.tenant_id.as_deref().unwrap_or("-")
    }
}

/// Coarse error taxonomy reported to callers and health consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Queue full, surfaced immediately and never retried by the gateway
    CapacityExceeded,
    /// Operation exceeded its category's bound
    Timeout,
    /// Network-class failure, eligible for retry
    Transient,
    /// Validation, business-rule rejection or anything unrecognised
    Permanent,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::CapacityExceeded => write!(f, "capacity_exceeded"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::Transient => write!(f, "transient"),
            ErrorKind::Permanent => write!(f, "permanent"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    #[error("Request queue is full (max: {max})")]
    CapacityExceeded { max: usize },

    #[error("Operation in category '{category}' timed out after {timeout_ms}ms")]
    Timeout { category: String, timeout_ms: u64 },

    #[error("Downstream error: {0}")]
    Downstream(#[from] DownstreamError),

    #[error("Gateway stopped before the request completed")]
    Stopped,
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            GatewayError::Timeout { .. } => ErrorKind::Timeout,
            GatewayError::Downstream(e) if e.is_transient() => ErrorKind::Transient,
            GatewayError::Downstream(_) | GatewayError::Stopped => ErrorKind::Permanent,
        }
    }
}
