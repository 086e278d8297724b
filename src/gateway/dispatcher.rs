//! Dispatch Coordinator
//!
//! A single control loop per [`Gateway`] pulls from the [`RequestQueue`] and
//! starts each item as its own task, never more than `max_concurrent` at a
//! time. The loop itself never awaits downstream I/O.
//!
//! ```text
//!  enqueue() ──▶ RequestQueue ──notify──▶ dispatch loop ──spawn──▶ execute()
//!                     ▲                    (1 permit / item)          │
//!                     │                                               ▼
//!                     └──── reinsert ◀── RetryScheduler ◀ transient ◀─┤
//!                                                                     │
//!                                  caller's Ticket ◀── success / final failure
//! ```
//!
//! The loop waits on a [`Notify`] rather than polling; `processing_delay`
//! only bounds how long it sleeps before re-checking an apparently empty
//! queue.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::{oneshot, watch, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::metrics::{GatewayState, GatewayStats, LiveGauges, MetricsRegistry};
use super::queue::{QueueItem, RequestQueue};
use super::retry::RetryPolicy;
use super::timeout::TimeoutPolicy;
use crate::config::GatewayConfig;
use crate::downstream::DownstreamError;
use crate::types::{GatewayError, RequestContext};

// =============================================================================
// Ticket
// =============================================================================

/// Awaitable result of an admitted request.
///
/// Dropping a ticket does not cancel the operation; it still runs to
/// completion or timeout.
#[derive(Debug)]
pub struct Ticket<T> {
    receiver: oneshot::Receiver<Result<T, GatewayError>>,
}

impl<T> Future for Ticket<T> {
    type Output = Result<T, GatewayError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(GatewayError::Stopped)))
    }
}

// =============================================================================
// Delayed retries
// =============================================================================

/// Pending re-insertions, keyed by item id so `stop()` can cancel them
#[derive(Default)]
struct RetryScheduler {
    pending: Mutex<HashMap<Uuid, JoinHandle<()>>>,
}

impl RetryScheduler {
    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, JoinHandle<()>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Abort every pending retry. Aborted items are dropped, which the
    /// waiting callers observe as `Stopped`.
    fn cancel_all(&self) -> usize {
        let pending: Vec<_> = self.lock().drain().collect();
        for (_, handle) in &pending {
            handle.abort();
        }
        pending.len()
    }
}

// =============================================================================
// Gateway
// =============================================================================

struct Lifecycle {
    state: GatewayState,
    dispatcher: Option<JoinHandle<()>>,
}

struct Shared {
    config: GatewayConfig,
    queue: Mutex<RequestQueue>,
    wakeup: Notify,
    permits: Arc<Semaphore>,
    timeouts: TimeoutPolicy,
    retry_policy: RetryPolicy,
    metrics: MetricsRegistry,
    lifecycle: Mutex<Lifecycle>,
    shutdown: watch::Sender<bool>,
    retries: RetryScheduler,
}

impl Shared {
    fn lock_queue(&self) -> MutexGuard<'_, RequestQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn queue_len(&self) -> usize {
        self.lock_queue().len()
    }

    fn pop(&self) -> Option<QueueItem> {
        self.lock_queue().pop()
    }

    fn state(&self) -> GatewayState {
        self.lock_lifecycle().state
    }

    fn in_flight(&self) -> usize {
        self.config
            .max_concurrent
            .saturating_sub(self.permits.available_permits())
    }

    /// Re-insert `item` after `delay` unless the gateway stops first
    fn schedule_retry(self: &Arc<Self>, item: QueueItem, delay: Duration) {
        let id = item.id;

        // Both locks are held until the task is registered, so `stop()` either
        // sees the task in `cancel_all` or this sees the closed queue.
        let mut queue = self.lock_queue();
        if queue.is_closed() {
            drop(queue);
            debug!(item_id = %id, "Gateway stopped before retry could be scheduled");
            item.settle(Err(GatewayError::Stopped));
            return;
        }
        queue.reserve_retry();
        let mut pending = self.retries.lock();
        let shared = Arc::clone(self);
        let handle = tokio::spawn(async move {
            sleep(delay).await;
            shared.retries.lock().remove(&id);

            let reinserted = shared.lock_queue().reinsert(item);
            match reinserted {
                Ok(()) => shared.wakeup.notify_one(),
                Err(item) => {
                    debug!(item_id = %item.id, "Gateway stopped during retry delay");
                    item.settle(Err(GatewayError::Stopped));
                }
            }
        });
        pending.insert(id, handle);
    }
}

/// Handle to the outbound request gateway. Cheap to clone; all clones share
/// one queue, one dispatcher and one set of metrics.
#[derive(Clone)]
pub struct Gateway {
    shared: Arc<Shared>,
}

impl Gateway {
    pub fn new(config: GatewayConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        let max_concurrent = config.max_concurrent.max(1);
        let config = GatewayConfig {
            max_concurrent,
            ..config
        };

        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(RequestQueue::new(config.max_queue_size)),
                wakeup: Notify::new(),
                permits: Arc::new(Semaphore::new(max_concurrent)),
                timeouts: TimeoutPolicy::from_config(&config),
                retry_policy: RetryPolicy::from_config(&config),
                metrics: MetricsRegistry::new(),
                lifecycle: Mutex::new(Lifecycle {
                    state: GatewayState::Idle,
                    dispatcher: None,
                }),
                shutdown,
                retries: RetryScheduler::default(),
                config,
            }),
        }
    }

    /// Spawn the dispatch loop. Idempotent while running; a stopped gateway
    /// cannot be restarted.
    pub fn start(&self) -> Result<(), GatewayError> {
        let mut lifecycle = self.shared.lock_lifecycle();
        match lifecycle.state {
            GatewayState::Running => Ok(()),
            GatewayState::Stopped => Err(GatewayError::Stopped),
            GatewayState::Idle => {
                let shutdown = self.shared.shutdown.subscribe();
                let shared = Arc::clone(&self.shared);
                lifecycle.dispatcher = Some(tokio::spawn(dispatch_loop(shared, shutdown)));
                lifecycle.state = GatewayState::Running;

                info!(
                    max_concurrent = self.shared.config.max_concurrent,
                    max_queue_size = self.shared.config.max_queue_size,
                    "Request gateway started"
                );
                Ok(())
            }
        }
    }

    /// Stop dispatching, cancel pending retries and fail every queued item
    /// with `Stopped`. Operations already in flight run to completion.
    pub async fn stop(&self) {
        let dispatcher = {
            let mut lifecycle = self.shared.lock_lifecycle();
            if lifecycle.state == GatewayState::Stopped {
                return;
            }
            lifecycle.state = GatewayState::Stopped;
            lifecycle.dispatcher.take()
        };

        self.shared.shutdown.send_replace(true);
        if let Some(handle) = dispatcher {
            if let Err(e) = handle.await {
                warn!(error = %e, "Dispatch loop ended abnormally");
            }
        }

        // Close first so no retry can be scheduled after the cancellation
        let abandoned = self.shared.lock_queue().close();
        let cancelled = self.shared.retries.cancel_all();
        let abandoned_count = abandoned.len();
        for item in abandoned {
            item.settle(Err(GatewayError::Stopped));
        }

        info!(
            abandoned = abandoned_count,
            cancelled_retries = cancelled,
            in_flight = self.shared.in_flight(),
            "Request gateway stopped"
        );
    }

    /// Admit an operation, returning a ticket for its eventual result.
    ///
    /// Never suspends. Fails immediately with `CapacityExceeded` when the
    /// queue is full, or `Stopped` after `stop()`.
    pub fn enqueue<T, F, Fut>(
        &self,
        operation: F,
        category: &str,
        context: RequestContext,
        priority: u32,
    ) -> Result<Ticket<T>, GatewayError>
    where
        T: Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, DownstreamError>> + Send + 'static,
    {
        let (item, receiver) = QueueItem::new(
            operation,
            category,
            context,
            priority,
            self.shared.retry_policy.max_retries,
        );
        let id = item.id;

        let admitted = self.shared.lock_queue().enqueue(item);
        if let Err(error) = admitted {
            warn!(category, priority, error = %error, "Request rejected");
            return Err(error);
        }

        self.shared.wakeup.notify_one();
        debug!(item_id = %id, category, priority, "Request enqueued");
        Ok(Ticket { receiver })
    }

    /// Enqueue and wait for the result
    pub async fn submit<T, F, Fut>(
        &self,
        operation: F,
        category: &str,
        context: RequestContext,
        priority: u32,
    ) -> Result<T, GatewayError>
    where
        T: Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, DownstreamError>> + Send + 'static,
    {
        self.enqueue(operation, category, context, priority)?.await
    }

    pub fn state(&self) -> GatewayState {
        self.shared.state()
    }

    pub fn is_running(&self) -> bool {
        self.state() == GatewayState::Running
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.shared.config
    }

    pub fn queue_len(&self) -> usize {
        self.shared.queue_len()
    }

    pub fn in_flight(&self) -> usize {
        self.shared.in_flight()
    }

    /// Whether new submissions would be rejected. Counts slots held by
    /// items waiting out a retry delay.
    pub fn is_saturated(&self) -> bool {
        self.shared.lock_queue().is_full()
    }

    /// Snapshot for health checks. Never waits on the dispatcher.
    pub fn stats(&self) -> GatewayStats {
        let (current_depth, scheduled_retries) = {
            let queue = self.shared.lock_queue();
            (queue.len(), queue.reserved())
        };
        let gauges = LiveGauges {
            state: self.state(),
            current_depth,
            current_in_flight: self.in_flight(),
            scheduled_retries,
            max_concurrent: self.shared.config.max_concurrent,
            max_queue_size: self.shared.config.max_queue_size,
        };
        self.shared.metrics.snapshot(gauges)
    }
}

// =============================================================================
// Dispatch loop
// =============================================================================

async fn dispatch_loop(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let idle_recheck = shared.config.processing_delay().max(Duration::from_millis(1));
    debug!("Dispatch loop running");

    loop {
        // Wait for work before taking a permit so in-flight counts stay exact
        while shared.queue_len() == 0 {
            tokio::select! {
                _ = shutdown.changed() => return,
                _ = shared.wakeup.notified() => {}
                _ = sleep(idle_recheck) => {}
            }
        }

        let permit = tokio::select! {
            _ = shutdown.changed() => return,
            permit = Arc::clone(&shared.permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return,
            },
        };

        let Some(item) = shared.pop() else {
            continue;
        };

        debug!(
            item_id = %item.id,
            category = %item.category,
            tenant = %item.context.tenant(),
            operation = %item.context.operation,
            priority = item.priority,
            attempt = item.retries + 1,
            "Dispatching request"
        );
        tokio::spawn(execute(Arc::clone(&shared), item, permit));
    }
}

async fn execute(shared: Arc<Shared>, mut item: QueueItem, permit: OwnedSemaphorePermit) {
    let wait = item.enqueued_at.elapsed();
    let outcome = item.run(&shared.timeouts).await;
    drop(permit);

    match outcome {
        Ok(()) => {
            shared.metrics.record_success(wait);
            debug!(
                item_id = %item.id,
                operation = %item.context.operation,
                wait_ms = wait.as_millis() as u64,
                retries = item.retries,
                "Request completed"
            );
            item.settle(Ok(()));
        }
        Err(error)
            if shared.state() == GatewayState::Running
                && shared.retry_policy.should_retry(&error, item.retries) =>
        {
            item.record_retry();
            shared.metrics.record_retry();
            let delay = shared.retry_policy.delay_for(item.retries);

            warn!(
                item_id = %item.id,
                category = %item.category,
                tenant = %item.context.tenant(),
                operation = %item.context.operation,
                retry = item.retries,
                max_retries = item.max_retries,
                priority = item.priority,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient failure, scheduling retry"
            );
            shared.schedule_retry(item, delay);
        }
        Err(error) => {
            shared.metrics.record_failure();
            error!(
                item_id = %item.id,
                category = %item.category,
                tenant = %item.context.tenant(),
                operation = %item.context.operation,
                retries = item.retries,
                kind = %error.kind(),
                error = %error,
                "Request failed"
            );
            item.settle(Err(error));
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::timeout::category;
    use futures::future::join_all;
    use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
    use tokio::time::Instant;

    fn config(max_concurrent: usize, max_queue_size: usize) -> GatewayConfig {
        GatewayConfig {
            max_concurrent,
            max_queue_size,
            ..GatewayConfig::default()
        }
    }

    fn ctx(operation: &str) -> RequestContext {
        RequestContext::for_tenant("tenant-1", operation)
    }

    #[tokio::test(start_paused = true)]
    async fn test_admission_control_rejects_beyond_capacity() {
        let gateway = Gateway::new(config(5, 10));
        let mut tickets = Vec::new();
        let mut rejected = Vec::new();

        for i in 0..12u32 {
            match gateway.enqueue(
                move || async move { Ok::<_, DownstreamError>(i) },
                category::QUICK,
                ctx("lookup_product"),
                0,
            ) {
                Ok(ticket) => tickets.push(ticket),
                Err(e) => rejected.push((i, e)),
            }
            assert!(gateway.queue_len() <= 10);
        }

        assert_eq!(
            rejected,
            vec![
                (10, GatewayError::CapacityExceeded { max: 10 }),
                (11, GatewayError::CapacityExceeded { max: 10 }),
            ]
        );

        gateway.start().unwrap();
        let results = join_all(tickets).await;
        assert_eq!(results, (0..10).map(Ok::<u32, GatewayError>).collect::<Vec<_>>());
        assert_eq!(gateway.stats().processed, 10);
        assert_eq!(gateway.queue_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_never_exceeds_limit() {
        let gateway = Gateway::new(config(3, 100));
        gateway.start().unwrap();

        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tickets: Vec<_> = (0..20)
            .map(|_| {
                let current = Arc::clone(&current);
                let peak = Arc::clone(&peak);
                gateway
                    .enqueue(
                        move || {
                            let current = Arc::clone(&current);
                            let peak = Arc::clone(&peak);
                            async move {
                                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                                peak.fetch_max(now, Ordering::SeqCst);
                                sleep(Duration::from_millis(50)).await;
                                current.fetch_sub(1, Ordering::SeqCst);
                                Ok::<_, DownstreamError>(())
                            }
                        },
                        category::NORMAL,
                        ctx("issue_invoice"),
                        0,
                    )
                    .unwrap()
            })
            .collect();

        for result in join_all(tickets).await {
            result.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 3);
        assert_eq!(gateway.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_waves_with_two_slots() {
        let gateway = Gateway::new(config(2, 10));
        gateway.start().unwrap();
        let started = Instant::now();

        let tickets: Vec<_> = (0..3)
            .map(|_| {
                gateway
                    .enqueue(
                        || async {
                            sleep(Duration::from_millis(100)).await;
                            Ok::<_, DownstreamError>(())
                        },
                        category::NORMAL,
                        ctx("issue_invoice"),
                        1,
                    )
                    .unwrap()
            })
            .collect();
        join_all(tickets).await;

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(200), "finished too early: {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(300), "ran serially: {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_higher_priority_starts_first() {
        let gateway = Gateway::new(config(1, 10));
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut tickets = Vec::new();
        for (name, priority) in [("low", 1u32), ("high", 5), ("mid", 3), ("high-2", 5)] {
            let order = Arc::clone(&order);
            tickets.push(
                gateway
                    .enqueue(
                        move || {
                            let order = Arc::clone(&order);
                            async move {
                                order.lock().unwrap().push(name);
                                Ok::<_, DownstreamError>(())
                            }
                        },
                        category::QUICK,
                        ctx(name),
                        priority,
                    )
                    .unwrap(),
            );
        }

        gateway.start().unwrap();
        join_all(tickets).await;
        assert_eq!(*order.lock().unwrap(), vec!["high", "high-2", "mid", "low"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_retried_until_success() {
        let gateway = Gateway::new(config(5, 10));
        gateway.start().unwrap();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let started = Instant::now();

        let result = gateway
            .submit(
                move || {
                    let counter = Arc::clone(&counter);
                    async move {
                        let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
                        if attempt <= 2 {
                            Err(DownstreamError::from_message("connect ETIMEDOUT 10.0.0.7:443"))
                        } else {
                            Ok("folio-42")
                        }
                    }
                },
                category::HEAVY,
                ctx("issue_invoice"),
                2,
            )
            .await;

        assert_eq!(result, Ok("folio-42"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        // Two fixed 2s delays
        assert!(started.elapsed() >= Duration::from_millis(4000));

        let stats = gateway.stats();
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.retried, 2);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.scheduled_retries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted_returns_original_error() {
        let gateway = Gateway::new(GatewayConfig {
            max_retries: 2,
            retry_delay_ms: 100,
            ..config(5, 10)
        });
        gateway.start().unwrap();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let result = gateway
            .submit(
                move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>(DownstreamError::ConnectionReset("ECONNRESET".to_string())) }
                },
                category::NORMAL,
                ctx("sync_customers"),
                0,
            )
            .await;

        assert_eq!(
            result,
            Err(GatewayError::Downstream(DownstreamError::ConnectionReset(
                "ECONNRESET".to_string()
            )))
        );
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        let stats = gateway.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.retried, 2);
        assert_eq!(stats.processed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_not_retried() {
        let gateway = Gateway::new(config(5, 10));
        gateway.start().unwrap();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let err = gateway
            .submit(
                move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>(DownstreamError::Validation("invalid postal code".to_string())) }
                },
                category::HEAVY,
                ctx("issue_invoice"),
                0,
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), crate::types::ErrorKind::Permanent);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(gateway.stats().retried, 0);
        assert_eq!(gateway.stats().failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_category_timeout_applies() {
        let mut gateway_config = GatewayConfig {
            max_retries: 0,
            ..config(5, 10)
        };
        gateway_config.timeouts.insert(category::QUICK.to_string(), 50);
        let gateway = Gateway::new(gateway_config);
        gateway.start().unwrap();

        let err = gateway
            .submit(
                || async {
                    sleep(Duration::from_secs(1)).await;
                    Ok::<_, DownstreamError>(())
                },
                category::QUICK,
                ctx("lookup_product"),
                0,
            )
            .await
            .unwrap_err();

        assert_eq!(
            err,
            GatewayError::Timeout {
                category: "quick".to_string(),
                timeout_ms: 50
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_retried() {
        let mut gateway_config = GatewayConfig {
            max_retries: 1,
            retry_delay_ms: 10,
            ..config(5, 10)
        };
        gateway_config.timeouts.insert(category::QUICK.to_string(), 50);
        let gateway = Gateway::new(gateway_config);
        gateway.start().unwrap();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let result = gateway
            .submit(
                move || {
                    let first = counter.fetch_add(1, Ordering::SeqCst) == 0;
                    async move {
                        if first {
                            sleep(Duration::from_secs(1)).await;
                        }
                        Ok::<_, DownstreamError>("ok")
                    }
                },
                category::QUICK,
                ctx("lookup_product"),
                0,
            )
            .await;

        assert_eq!(result, Ok("ok"));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_fails_queued_items() {
        let gateway = Gateway::new(config(5, 10));
        let tickets: Vec<_> = (0..3)
            .map(|i| {
                gateway
                    .enqueue(
                        move || async move { Ok::<_, DownstreamError>(i) },
                        category::QUICK,
                        ctx("lookup_product"),
                        0,
                    )
                    .unwrap()
            })
            .collect();

        gateway.stop().await;
        for result in join_all(tickets).await {
            assert_eq!(result, Err(GatewayError::Stopped));
        }

        assert_eq!(gateway.state(), GatewayState::Stopped);
        assert_eq!(gateway.start(), Err(GatewayError::Stopped));
        let late = gateway.enqueue(
            || async { Ok::<_, DownstreamError>(()) },
            category::QUICK,
            ctx("lookup_product"),
            0,
        );
        assert_eq!(late.unwrap_err(), GatewayError::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_pending_retries() {
        let gateway = Gateway::new(config(5, 10));
        gateway.start().unwrap();

        let ticket = gateway
            .enqueue(
                || async { Err::<(), _>(DownstreamError::SocketHangUp("socket hang up".to_string())) },
                category::NORMAL,
                ctx("issue_invoice"),
                0,
            )
            .unwrap();

        sleep(Duration::from_millis(100)).await;
        assert_eq!(gateway.stats().scheduled_retries, 1);

        gateway.stop().await;
        assert_eq!(ticket.await, Err(GatewayError::Stopped));
        assert_eq!(gateway.stats().scheduled_retries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_ticket_still_runs() {
        let gateway = Gateway::new(config(5, 10));
        gateway.start().unwrap();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);

        let ticket = gateway
            .enqueue(
                move || {
                    let flag = Arc::clone(&flag);
                    async move {
                        sleep(Duration::from_millis(50)).await;
                        flag.store(true, Ordering::SeqCst);
                        Ok::<_, DownstreamError>(())
                    }
                },
                category::NORMAL,
                ctx("issue_invoice"),
                0,
            )
            .unwrap();
        drop(ticket);

        sleep(Duration::from_millis(100)).await;
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(gateway.stats().processed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_report_depth_and_in_flight() {
        let gateway = Gateway::new(config(2, 10));
        gateway.start().unwrap();

        let tickets: Vec<_> = (0..3)
            .map(|_| {
                gateway
                    .enqueue(
                        || async {
                            sleep(Duration::from_secs(1)).await;
                            Ok::<_, DownstreamError>(())
                        },
                        category::HEAVY,
                        ctx("issue_invoice"),
                        0,
                    )
                    .unwrap()
            })
            .collect();

        sleep(Duration::from_millis(10)).await;
        let stats = gateway.stats();
        assert_eq!(stats.state, GatewayState::Running);
        assert_eq!(stats.current_in_flight, 2);
        assert_eq!(stats.current_depth, 1);

        join_all(tickets).await;
        let stats = gateway.stats();
        assert_eq!(stats.processed, 3);
        assert_eq!(stats.current_in_flight, 0);
        assert_eq!(stats.success_rate, 1.0);
        // Third request waited for the first wave
        assert!(stats.average_wait_ms > 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_stop_settles_immediately() {
        let gateway = Gateway::new(config(5, 10));
        gateway.start().unwrap();
        gateway.stop().await;

        // A failed attempt that finishes after stop() must not wait out its delay
        let (item, receiver) = QueueItem::new(
            || async { Ok::<_, DownstreamError>(()) },
            category::NORMAL,
            ctx("issue_invoice"),
            0,
            3,
        );
        gateway.shared.schedule_retry(item, Duration::from_secs(60));

        let settled = tokio::time::timeout(Duration::from_millis(1), receiver)
            .await
            .expect("retry was scheduled on a stopped gateway");
        assert_eq!(settled.unwrap(), Err(GatewayError::Stopped));
        assert_eq!(gateway.stats().scheduled_retries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_saturated_counts_reserved_retry_slots() {
        let gateway = Gateway::new(config(1, 1));
        gateway.start().unwrap();

        let ticket = gateway
            .enqueue(
                || async { Err::<(), _>(DownstreamError::ConnectionReset("ECONNRESET".to_string())) },
                category::NORMAL,
                ctx("issue_invoice"),
                0,
            )
            .unwrap();

        sleep(Duration::from_millis(100)).await;
        assert_eq!(gateway.queue_len(), 0);
        assert_eq!(gateway.stats().scheduled_retries, 1);
        assert!(gateway.is_saturated());

        let late = gateway.enqueue(
            || async { Ok::<_, DownstreamError>(()) },
            category::QUICK,
            ctx("lookup_product"),
            0,
        );
        assert_eq!(late.unwrap_err(), GatewayError::CapacityExceeded { max: 1 });

        gateway.stop().await;
        assert_eq!(ticket.await, Err(GatewayError::Stopped));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_enqueue_from_many_threads_respects_bounds() {
        const THREADS: usize = 4;
        const PER_THREAD: usize = 50;
        const MAX_QUEUE: usize = 20;

        let gateway = Gateway::new(config(4, MAX_QUEUE));
        gateway.start().unwrap();
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let (tickets, rejected) = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..THREADS)
                .map(|thread| {
                    let gateway = gateway.clone();
                    let current = Arc::clone(&current);
                    let peak = Arc::clone(&peak);
                    scope.spawn(move || {
                        let mut tickets = Vec::new();
                        let mut rejected = 0;
                        for i in 0..PER_THREAD {
                            let current = Arc::clone(&current);
                            let peak = Arc::clone(&peak);
                            let admitted = gateway.enqueue(
                                move || {
                                    let current = Arc::clone(&current);
                                    let peak = Arc::clone(&peak);
                                    async move {
                                        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                                        peak.fetch_max(now, Ordering::SeqCst);
                                        sleep(Duration::from_millis(2)).await;
                                        current.fetch_sub(1, Ordering::SeqCst);
                                        Ok::<_, DownstreamError>(thread * PER_THREAD + i)
                                    }
                                },
                                category::QUICK,
                                ctx("lookup_product"),
                                0,
                            );
                            match admitted {
                                Ok(ticket) => tickets.push(ticket),
                                Err(e) => {
                                    assert_eq!(e, GatewayError::CapacityExceeded { max: MAX_QUEUE });
                                    rejected += 1;
                                }
                            }
                            assert!(gateway.queue_len() <= MAX_QUEUE);
                        }
                        (tickets, rejected)
                    })
                })
                .collect();

            handles
                .into_iter()
                .fold((Vec::new(), 0), |(mut all, rejected), handle| {
                    let (tickets, refused) = handle.join().unwrap();
                    all.extend(tickets);
                    (all, rejected + refused)
                })
        });

        let admitted = tickets.len();
        assert!(admitted >= MAX_QUEUE);
        assert_eq!(admitted + rejected, THREADS * PER_THREAD);

        for result in join_all(tickets).await {
            assert!(result.is_ok());
        }
        let stats = gateway.stats();
        assert_eq!(stats.processed as usize, admitted);
        assert_eq!(stats.current_depth, 0);
        assert!(peak.load(Ordering::SeqCst) <= 4);

        gateway.stop().await;
    }
}
