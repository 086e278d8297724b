//! Downstream Invoicing API
//!
//! The gateway treats every downstream call as an opaque async operation
//! returning `Result<T, DownstreamError>`. Adapters (such as the HTTP client
//! in [`http`]) translate transport and status failures into the closed set
//! of variants below so retry classification never inspects strings.
//!
//! [`DownstreamError::from_message`] is the heuristic fallback for errors
//! raised outside the gateway's control (third-party SDKs, shell-outs).

pub mod http;

pub use http::InvoicingClient;

/// Failure of a single downstream call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DownstreamError {
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Connection reset: {0}")]
    ConnectionReset(String),

    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    #[error("DNS lookup failed: {0}")]
    DnsFailure(String),

    #[error("Socket hang up: {0}")]
    SocketHangUp(String),

    #[error("Rate limited by provider (retry after: {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Request rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("{0}")]
    Other(String),
}

impl DownstreamError {
    /// Network and timeout class failures. Everything else is permanent.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DownstreamError::Timeout(_)
                | DownstreamError::ConnectionReset(_)
                | DownstreamError::ConnectionRefused(_)
                | DownstreamError::DnsFailure(_)
                | DownstreamError::SocketHangUp(_)
        )
    }

    /// Classify a foreign error by its message.
    ///
    /// Recognises errno-style codes (`ETIMEDOUT`, `ECONNRESET`, `ECONNREFUSED`,
    /// `ENOTFOUND`, `EAI_AGAIN`) as well as the usual English phrasings.
    /// Unrecognised messages become [`DownstreamError::Other`].
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();

        if lower.contains("etimedout") || lower.contains("timed out") || lower.contains("timeout") {
            DownstreamError::Timeout(message)
        } else if lower.contains("econnreset") || lower.contains("connection reset") {
            DownstreamError::ConnectionReset(message)
        } else if lower.contains("econnrefused") || lower.contains("connection refused") {
            DownstreamError::ConnectionRefused(message)
        } else if lower.contains("enotfound")
            || lower.contains("eai_again")
            || lower.contains("dns error")
            || lower.contains("failed to lookup address")
            || lower.contains("name or service not known")
        {
            DownstreamError::DnsFailure(message)
        } else if lower.contains("socket hang up")
            || lower.contains("connection closed before message completed")
            || lower.contains("incomplete message")
        {
            DownstreamError::SocketHangUp(message)
        } else {
            DownstreamError::Other(message)
        }
    }
}

impl From<anyhow::Error> for DownstreamError {
    fn from(err: anyhow::Error) -> Self {
        DownstreamError::from_message(format!("{:#}", err))
    }
}
