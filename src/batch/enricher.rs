//! Batch Enricher
//!
//! Splits a large item collection into contiguous chunks and submits each
//! chunk's items through the [`Gateway`]. Chunks run strictly one after
//! another so progress moves forward in stable steps; items inside a chunk
//! run concurrently up to the gateway's own limit.
//!
//! `process` never fails. Every input item comes back paired with either
//! its enriched output or the error that stopped it, in input order.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::progress::ProgressReporter;
use crate::config::BatchConfig;
use crate::downstream::DownstreamError;
use crate::gateway::{category, Gateway};
use crate::types::{GatewayError, RequestContext};

// =============================================================================
// Enrichment step
// =============================================================================

/// Per-item work performed by a batch
#[async_trait]
pub trait ItemEnricher: Send + Sync + 'static {
    type Item: Clone + Send + Sync + 'static;
    type Output: Send + 'static;

    /// Timeout category for `enrich`
    fn category(&self) -> &str {
        category::NORMAL
    }

    fn priority(&self) -> u32 {
        0
    }

    fn context(&self, _item: &Self::Item) -> RequestContext {
        RequestContext::new("enrich")
    }

    /// Shared precondition for a chunk, such as refreshing a catalog page.
    /// Failing here fails every item of the chunk.
    async fn prepare_chunk(&self, _chunk_index: usize, _items: &[Self::Item]) -> Result<(), DownstreamError> {
        Ok(())
    }

    async fn enrich(&self, item: Self::Item) -> Result<Self::Output, DownstreamError>;
}

// =============================================================================
// Results
// =============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EnrichError {
    /// The chunk's shared precondition failed, or the gateway stopped
    /// before the item could be submitted
    #[error("Chunk {chunk_index} failed: {error}")]
    Chunk { chunk_index: usize, error: GatewayError },

    /// This item's operation failed after exhausting retries
    #[error("Item failed: {0}")]
    Item(GatewayError),
}

#[derive(Debug, Clone)]
pub struct ItemOutcome<I, O> {
    /// Position in the input collection
    pub index: usize,
    pub item: I,
    pub result: Result<O, EnrichError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl std::fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} of {} processed, {} failed", self.succeeded, self.total, self.failed)
    }
}

#[derive(Debug, Clone)]
pub struct EnrichmentResult<I, O> {
    pub outcomes: Vec<ItemOutcome<I, O>>,
    pub chunks_total: usize,
}

impl<I, O> EnrichmentResult<I, O> {
    fn empty() -> Self {
        Self {
            outcomes: Vec::new(),
            chunks_total: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn succeeded(&self) -> impl Iterator<Item = (&I, &O)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok().map(|out| (&o.item, out)))
    }

    pub fn failed(&self) -> impl Iterator<Item = (&I, &EnrichError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|err| (&o.item, err)))
    }

    pub fn summary(&self) -> BatchSummary {
        let failed = self.failed().count();
        BatchSummary {
            total: self.outcomes.len(),
            succeeded: self.outcomes.len() - failed,
            failed,
        }
    }
}

// =============================================================================
// Batch job bookkeeping
// =============================================================================

/// One user-initiated bulk operation
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub total_items: usize,
    pub chunk_size: usize,
    pub chunks_total: usize,
    pub completed_chunks: usize,
    pub failed_items: Vec<(usize, EnrichError)>,
    pub started_at: DateTime<Utc>,
}

impl BatchJob {
    pub fn new(total_items: usize, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            total_items,
            chunk_size,
            chunks_total: total_items.div_ceil(chunk_size),
            completed_chunks: 0,
            failed_items: Vec::new(),
            started_at: Utc::now(),
        }
    }

    pub fn record_chunk(&mut self) {
        self.completed_chunks = (self.completed_chunks + 1).min(self.chunks_total);
    }

    pub fn record_failure(&mut self, index: usize, error: EnrichError) {
        self.failed_items.push((index, error));
    }

    /// `floor(completed * 100 / total)`; 100 for a job with no chunks
    pub fn percent(&self) -> u8 {
        if self.chunks_total == 0 {
            return 100;
        }
        (self.completed_chunks * 100 / self.chunks_total) as u8
    }
}

// =============================================================================
// Batch Enricher
// =============================================================================

#[derive(Clone)]
pub struct BatchEnricher {
    gateway: Gateway,
    batch_threshold: usize,
}

impl BatchEnricher {
    pub fn new(gateway: Gateway) -> Self {
        Self::from_config(gateway, &BatchConfig::default())
    }

    pub fn from_config(gateway: Gateway, config: &BatchConfig) -> Self {
        Self {
            gateway,
            batch_threshold: config.batch_threshold,
        }
    }

    /// Whether `item_count` items are worth chunking. Smaller inputs are
    /// simpler to run as a single chunk.
    pub fn should_batch(&self, item_count: usize) -> bool {
        item_count > self.batch_threshold
    }

    /// Enrich every item, chunk by chunk, reporting progress after each
    /// chunk. The result always has exactly one outcome per input item.
    pub async fn process<E: ItemEnricher>(
        &self,
        items: Vec<E::Item>,
        chunk_size: usize,
        enricher: Arc<E>,
        reporter: &mut ProgressReporter,
    ) -> EnrichmentResult<E::Item, E::Output> {
        if items.is_empty() {
            return EnrichmentResult::empty();
        }

        let chunk_size = chunk_size.max(1).min(items.len());
        let mut job = BatchJob::new(items.len(), chunk_size);
        let started = Instant::now();
        info!(
            total_items = job.total_items,
            chunk_size,
            chunks_total = job.chunks_total,
            "Starting batch enrichment"
        );

        if !self.gateway.is_running() {
            warn!(total_items = job.total_items, "Gateway is not running, batch cannot start");
            reporter.fail("the request gateway is not running").await;
            return Self::reject_all(items, chunk_size, job.chunks_total);
        }

        let mut outcomes = Vec::with_capacity(items.len());
        for (chunk_index, chunk) in items.chunks(chunk_size).enumerate() {
            let base = chunk_index * chunk_size;

            match self.run_chunk(chunk_index, chunk, &enricher).await {
                Ok(results) => {
                    for (offset, (item, result)) in chunk.iter().zip(results).enumerate() {
                        if let Err(e) = &result {
                            job.record_failure(base + offset, e.clone());
                        }
                        outcomes.push(ItemOutcome {
                            index: base + offset,
                            item: item.clone(),
                            result,
                        });
                    }
                }
                Err(error) => {
                    warn!(chunk_index, items = chunk.len(), error = %error, "Chunk failed");
                    for (offset, item) in chunk.iter().enumerate() {
                        let failure = EnrichError::Chunk {
                            chunk_index,
                            error: error.clone(),
                        };
                        job.record_failure(base + offset, failure.clone());
                        outcomes.push(ItemOutcome {
                            index: base + offset,
                            item: item.clone(),
                            result: Err(failure),
                        });
                    }
                }
            }

            job.record_chunk();
            let message = format!(
                "Processed {} of {} chunks ({} of {} items, {} failed)",
                job.completed_chunks,
                job.chunks_total,
                outcomes.len(),
                job.total_items,
                job.failed_items.len()
            );
            reporter.report(job.percent(), &message).await;
        }

        let result = EnrichmentResult {
            outcomes,
            chunks_total: job.chunks_total,
        };
        let summary = result.summary();
        info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            started_at = %job.started_at,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Batch enrichment finished"
        );
        reporter.complete(&summary.to_string()).await;
        result
    }

    /// Run one chunk. `Err` means the chunk's precondition failed and no
    /// item was submitted.
    ///
    /// Items are admitted as queue space allows: when the gateway is full the
    /// chunk waits for one of its own requests to finish (or, holding none,
    /// for the idle re-check interval) and submits again. Capacity is never
    /// reported as an item failure.
    async fn run_chunk<E: ItemEnricher>(
        &self,
        chunk_index: usize,
        chunk: &[E::Item],
        enricher: &Arc<E>,
    ) -> Result<Vec<Result<E::Output, EnrichError>>, GatewayError> {
        enricher.prepare_chunk(chunk_index, chunk).await?;

        let mut results: Vec<Option<Result<E::Output, EnrichError>>> = chunk.iter().map(|_| None).collect();
        let mut pending = FuturesUnordered::new();
        let backoff = self.gateway.config().processing_delay().max(Duration::from_millis(1));

        let mut offset = 0;
        while offset < chunk.len() {
            let item = &chunk[offset];
            let step = Arc::clone(enricher);
            let owned = item.clone();
            let operation = move || {
                let step = Arc::clone(&step);
                let item = owned.clone();
                async move { step.enrich(item).await }
            };

            match self.gateway.enqueue(
                operation,
                enricher.category(),
                enricher.context(item),
                enricher.priority(),
            ) {
                Ok(ticket) => {
                    pending.push(async move { (offset, ticket.await) });
                    offset += 1;
                }
                Err(GatewayError::CapacityExceeded { max }) => match pending.next().await {
                    Some((done, result)) => results[done] = Some(result.map_err(EnrichError::Item)),
                    None => {
                        debug!(chunk_index, max, "Gateway queue full, waiting for room");
                        sleep(backoff).await;
                    }
                },
                Err(GatewayError::Stopped) => {
                    warn!(
                        chunk_index,
                        refused = chunk.len() - offset,
                        "Gateway stopped mid-chunk, remaining items not submitted"
                    );
                    for slot in &mut results[offset..] {
                        *slot = Some(Err(EnrichError::Chunk {
                            chunk_index,
                            error: GatewayError::Stopped,
                        }));
                    }
                    break;
                }
                Err(e) => {
                    results[offset] = Some(Err(EnrichError::Item(e)));
                    offset += 1;
                }
            }
        }

        while let Some((done, result)) = pending.next().await {
            results[done] = Some(result.map_err(EnrichError::Item));
        }

        Ok(results
            .into_iter()
            .map(|slot| slot.unwrap_or_else(|| Err(EnrichError::Item(GatewayError::Stopped))))
            .collect())
    }

    fn reject_all<I, O>(items: Vec<I>, chunk_size: usize, chunks_total: usize) -> EnrichmentResult<I, O> {
        let outcomes = items
            .into_iter()
            .enumerate()
            .map(|(index, item)| ItemOutcome {
                index,
                item,
                result: Err(EnrichError::Chunk {
                    chunk_index: index / chunk_size,
                    error: GatewayError::Stopped,
                }),
            })
            .collect();
        EnrichmentResult { outcomes, chunks_total }
    }
}

// =============================================================================
// Tests
// =============================================================================
