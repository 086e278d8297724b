//! Batch enrichment pipeline
//!
//! Bulk operations (catalog enrichment, invoice imports) are split into
//! chunks by [`BatchEnricher`], routed item by item through the request
//! gateway, and narrated to the user through a [`ProgressReporter`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use invoice_gateway::batch::{BatchEnricher, LogSink, ProgressReporter};
//! use invoice_gateway::simulate::SimulatedCatalog;
//! use invoice_gateway::Gateway;
//!
//! # async fn run(gateway: Gateway) {
//! let enricher = BatchEnricher::new(gateway);
//! let mut progress = ProgressReporter::new(Arc::new(LogSink), "chat-message-42");
//! let items = (0..250).map(|i| format!("SKU-{:04}", i)).collect();
//! let result = enricher
//!     .process(items, 50, Arc::new(SimulatedCatalog::default()), &mut progress)
//!     .await;
//! println!("{}", result.summary());
//! # }
//! ```

pub mod catalog;
pub mod enricher;
pub mod progress;

pub use catalog::CatalogLookup;
pub use enricher::{
    BatchEnricher, BatchJob, BatchSummary, EnrichError, EnrichmentResult, ItemEnricher, ItemOutcome,
};
pub use progress::{render_progress_bar, LogSink, NotificationSink, ProgressReporter, Renderer};
