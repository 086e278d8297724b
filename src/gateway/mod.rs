//! Outbound Request Gateway
//!
//! Mediates every call to the downstream invoicing API under a hard
//! concurrency ceiling, per-category timeouts and bounded retries.
//!
//! # Components
//!
//! ```text
//! ┌──────────────┐   enqueue    ┌──────────────┐   pop    ┌─────────────────────┐
//! │   callers    │─────────────▶│ RequestQueue │─────────▶│ DispatchCoordinator │
//! │ (bot, batch) │◀─── Ticket ──│ (priority,   │          │  (Gateway)          │
//! └──────────────┘              │  admission)  │◀─retry───│                     │
//!                               └──────────────┘          └──────────┬──────────┘
//!                                                                    │
//!                     ┌───────────────┬──────────────────────┬───────┴─────────┐
//!                     ▼               ▼                      ▼                 ▼
//!              TimeoutPolicy   RetryClassifier        MetricsRegistry    downstream op
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use invoice_gateway::config::GatewayConfig;
//! use invoice_gateway::downstream::DownstreamError;
//! use invoice_gateway::gateway::{category, Gateway};
//! use invoice_gateway::types::RequestContext;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let gateway = Gateway::new(GatewayConfig::default());
//! gateway.start()?;
//!
//! let folio = gateway
//!     .submit(
//!         || async { Ok::<_, DownstreamError>("A-1001".to_string()) },
//!         category::HEAVY,
//!         RequestContext::for_tenant("tenant-7", "issue_invoice"),
//!         1,
//!     )
//!     .await?;
//! # let _ = folio;
//! gateway.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod dispatcher;
pub mod metrics;
pub mod queue;
pub mod retry;
pub mod timeout;

pub use dispatcher::{Gateway, Ticket};
pub use metrics::{GatewayState, GatewayStats, MetricsRegistry};
pub use queue::{QueueItem, RequestQueue};
pub use retry::{is_transient, RetryBackoff, RetryPolicy};
pub use timeout::{category, TimeoutPolicy};
