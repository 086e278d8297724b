//! Request Queue
//!
//! Admission-controlled, priority-ordered holding area for pending work.
//! Higher priority dequeues first; ties are broken by insertion order so
//! equal-priority submissions are served FIFO.
//!
//! All mutation is synchronous. The gateway keeps the queue behind a short
//! exclusive lock so `enqueue` never suspends.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future;

use futures::future::BoxFuture;
use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

use super::retry::decayed_priority;
use super::timeout::TimeoutPolicy;
use crate::downstream::DownstreamError;
use crate::types::{GatewayError, RequestContext};

// =============================================================================
// Type-erased work
// =============================================================================

/// A re-invocable operation plus the caller's completion channel
trait Job: Send {
    /// Build and run one attempt, keeping its output for `settle`
    fn attempt(&mut self) -> BoxFuture<'_, Result<(), DownstreamError>>;

    /// Deliver the final outcome to the caller
    fn settle(self: Box<Self>, outcome: Result<(), GatewayError>);
}

struct TypedJob<T, F> {
    operation: F,
    output: Option<T>,
    responder: oneshot::Sender<Result<T, GatewayError>>,
}

impl<T, F, Fut> Job for TypedJob<T, F>
where
    T: Send + 'static,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, DownstreamError>> + Send + 'static,
{
    fn attempt(&mut self) -> BoxFuture<'_, Result<(), DownstreamError>> {
        let pending = (self.operation)();
        let output = &mut self.output;
        Box::pin(async move {
            *output = Some(pending.await?);
            Ok(())
        })
    }

    fn settle(self: Box<Self>, outcome: Result<(), GatewayError>) {
        let TypedJob { output, responder, .. } = *self;
        let result = outcome.and_then(|()| output.ok_or(GatewayError::Stopped));
        // The caller may have stopped listening; the work still ran.
        let _ = responder.send(result);
    }
}

// =============================================================================
// Queue Item
// =============================================================================

/// A unit of pending work.
///
/// Dropping an item without settling it closes the caller's channel, which
/// the caller observes as [`GatewayError::Stopped`].
pub struct QueueItem {
    pub id: Uuid,
    pub category: String,
    pub context: RequestContext,
    pub priority: u32,
    pub original_priority: u32,
    pub enqueued_at: Instant,
    pub retries: u32,
    pub max_retries: u32,
    sequence: u64,
    job: Box<dyn Job>,
}

impl QueueItem {
    /// Create an item and the receiver its outcome will be delivered on
    pub fn new<T, F, Fut>(
        operation: F,
        category: impl Into<String>,
        context: RequestContext,
        priority: u32,
        max_retries: u32,
    ) -> (Self, oneshot::Receiver<Result<T, GatewayError>>)
    where
        T: Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, DownstreamError>> + Send + 'static,
    {
        let (responder, receiver) = oneshot::channel();
        let item = Self {
            id: Uuid::new_v4(),
            category: category.into(),
            context,
            priority,
            original_priority: priority,
            enqueued_at: Instant::now(),
            retries: 0,
            max_retries,
            sequence: 0,
            job: Box::new(TypedJob {
                operation,
                output: None,
                responder,
            }),
        };
        (item, receiver)
    }

    /// Run one attempt bounded by the category's timeout
    pub async fn run(&mut self, timeouts: &TimeoutPolicy) -> Result<(), GatewayError> {
        timeouts.execute(&self.category, self.job.attempt()).await
    }

    /// Count a retry and lower the priority accordingly
    pub fn record_retry(&mut self) {
        debug_assert!(self.retries < self.max_retries);
        self.retries = (self.retries + 1).min(self.max_retries);
        self.priority = decayed_priority(self.original_priority, self.retries);
    }

    /// Deliver the outcome to the caller, consuming the item
    pub fn settle(self, outcome: Result<(), GatewayError>) {
        self.job.settle(outcome);
    }
}

impl std::fmt::Debug for QueueItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueItem")
            .field("id", &self.id)
            .field("category", &self.category)
            .field("context", &self.context)
            .field("priority", &self.priority)
            .field("retries", &self.retries)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

/// Heap ordering: higher priority first, then lower sequence (older) first
struct Entry(QueueItem);

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.0.priority == other.0.priority && self.0.sequence == other.0.sequence
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.0.priority.cmp(&other.0.priority) {
            Ordering::Equal => other.0.sequence.cmp(&self.0.sequence),
            ord => ord,
        }
    }
}

// =============================================================================
// Request Queue
// =============================================================================

pub struct RequestQueue {
    heap: BinaryHeap<Entry>,
    max_size: usize,
    /// Slots held for items waiting out a retry delay
    reserved: usize,
    next_sequence: u64,
    closed: bool,
}

impl RequestQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            heap: BinaryHeap::new(),
            max_size,
            reserved: 0,
            next_sequence: 0,
            closed: false,
        }
    }

    /// Admit an item, or reject it when the queue is closed or at capacity.
    /// A rejected item is dropped.
    pub fn enqueue(&mut self, item: QueueItem) -> Result<(), GatewayError> {
        if self.closed {
            return Err(GatewayError::Stopped);
        }
        if self.heap.len() + self.reserved >= self.max_size {
            return Err(GatewayError::CapacityExceeded { max: self.max_size });
        }
        self.push(item);
        Ok(())
    }

    /// Hold a slot for an item that will come back after a retry delay
    pub fn reserve_retry(&mut self) {
        self.reserved += 1;
    }

    /// Return a retried item into its reserved slot. Only a closed queue
    /// refuses it, handing the item back.
    pub fn reinsert(&mut self, item: QueueItem) -> Result<(), QueueItem> {
        if self.closed {
            return Err(item);
        }
        self.reserved = self.reserved.saturating_sub(1);
        self.push(item);
        Ok(())
    }

    /// Pop the highest-priority item
    pub fn pop(&mut self) -> Option<QueueItem> {
        self.heap.pop().map(|entry| entry.0)
    }

    /// Refuse all further work and hand back every queued item, highest
    /// priority first
    pub fn close(&mut self) -> Vec<QueueItem> {
        self.closed = true;
        self.reserved = 0;
        let mut items = Vec::with_capacity(self.heap.len());
        while let Some(item) = self.pop() {
            items.push(item);
        }
        items
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn reserved(&self) -> usize {
        self.reserved
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_full(&self) -> bool {
        self.heap.len() + self.reserved >= self.max_size
    }

    fn push(&mut self, mut item: QueueItem) {
        item.sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(Entry(item));
    }
}

// =============================================================================
// Tests
// =============================================================================
