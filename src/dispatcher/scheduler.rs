//! FIFO admission queue for credential acquisition
//!
//! Callers enqueue and suspend; a single drain task resolves each waiting
//! request with a selected credential or a timeout. Exactly one drain pass
//! runs at a time, which serializes selection and keeps per-credential
//! metrics from being double-counted. The drain loop exits when the queue
//! empties and is restarted by the next `acquire`.

use super::credential::Credential;
use super::pool::{CredentialPool, Selection};
use crate::config::Settings;
use crate::error::DispatchError;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{sleep_until, Instant};

// ============================================================================
// Scheduler Configuration
// ============================================================================

/// Configuration for the admission queue
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How long a caller may wait before being failed with a timeout
    pub admission_timeout: Duration,
    /// Safety margin added when sleeping until a cooldown expires
    pub select_retry_margin: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            admission_timeout: Duration::from_secs(30),
            select_retry_margin: Duration::from_millis(100),
        }
    }
}

impl SchedulerConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            admission_timeout: settings.admission_timeout(),
            select_retry_margin: settings.select_retry_margin(),
        }
    }

    pub fn with_admission_timeout(mut self, timeout: Duration) -> Self {
        self.admission_timeout = timeout;
        self
    }
}

// ============================================================================
// Queued Request
// ============================================================================

/// One caller waiting for a credential
struct QueuedRequest {
    /// Completion handle the drain pass resolves.
    tx: oneshot::Sender<Result<Arc<Credential>, DispatchError>>,
    enqueued_at: Instant,
}

// ============================================================================
// Request Scheduler
// ============================================================================

/// FIFO admission queue in front of the credential pool.
///
/// Cheap to clone; all clones share one queue and one drain gate.
#[derive(Clone)]
pub struct RequestScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    pool: Arc<CredentialPool>,
    queue: Mutex<VecDeque<QueuedRequest>>,
    /// Drain-pass gate. Set while a drain task is running.
    draining: AtomicBool,
    /// Set while the drain pass holds a popped request, so `queue_len`
    /// still counts a caller who is waiting out a cooldown.
    resolving: AtomicBool,
    config: SchedulerConfig,
}

impl RequestScheduler {
    pub fn new(pool: Arc<CredentialPool>, config: SchedulerConfig) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                pool,
                queue: Mutex::new(VecDeque::new()),
                draining: AtomicBool::new(false),
                resolving: AtomicBool::new(false),
                config,
            }),
        }
    }

    /// Acquire a credential, waiting in FIFO order behind earlier callers.
    ///
    /// Fails with [`DispatchError::AcquireTimeout`] if no credential is
    /// assigned within the admission window, or with
    /// [`DispatchError::PoolExhausted`] if the pool cannot recover.
    pub async fn acquire(&self) -> Result<Arc<Credential>, DispatchError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut queue = self.inner.queue.lock().unwrap();
            queue.push_back(QueuedRequest {
                tx,
                enqueued_at: Instant::now(),
            });
        }
        self.kick_drain();

        match rx.await {
            Ok(result) => result,
            // The drain task never drops a request without resolving it;
            // a closed channel means the runtime is shutting down.
            Err(_) => Err(DispatchError::PoolExhausted),
        }
    }

    /// Number of callers currently waiting, including one whose request
    /// the drain pass has picked up but not yet resolved
    pub fn queue_len(&self) -> usize {
        let queued = self.inner.queue.lock().unwrap().len();
        queued + self.inner.resolving.load(Ordering::SeqCst) as usize
    }

    /// Start a drain task unless one is already running
    fn kick_drain(&self) {
        if self
            .inner
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                inner.drain().await;
            });
        }
    }
}

impl SchedulerInner {
    /// Process the queue strictly in FIFO order until it empties.
    ///
    /// Holds the drain gate for its whole run: no two passes ever observe a
    /// partial update to the same credential's metrics.
    async fn drain(self: Arc<Self>) {
        loop {
            let next = {
                // Flag the popped request before releasing the queue lock
                // so queue_len never momentarily drops it.
                let mut queue = self.queue.lock().unwrap();
                let next = queue.pop_front();
                if next.is_some() {
                    self.resolving.store(true, Ordering::SeqCst);
                }
                next
            };

            let Some(request) = next else {
                self.draining.store(false, Ordering::SeqCst);
                // Re-check: a caller may have enqueued between the pop and
                // releasing the gate, and seen the gate still held.
                let refill = !self.queue.lock().unwrap().is_empty();
                if refill
                    && self
                        .draining
                        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok()
                {
                    continue;
                }
                return;
            };

            if !request.tx.is_closed() {
                self.resolve(request).await;
            }
            self.resolving.store(false, Ordering::SeqCst);
        }
    }

    /// Resolve one queued request with a credential, a timeout, or a
    /// pool-exhausted failure
    async fn resolve(&self, request: QueuedRequest) {
        let deadline = request.enqueued_at + self.config.admission_timeout;

        loop {
            if Instant::now() >= deadline {
                tracing::warn!(
                    waited_ms = self.config.admission_timeout.as_millis() as u64,
                    "Admission window elapsed, failing queued request"
                );
                let _ = request
                    .tx
                    .send(Err(DispatchError::AcquireTimeout(self.config.admission_timeout)));
                return;
            }

            match self.pool.select_best() {
                Selection::Ready(credential) => {
                    let _ = request.tx.send(Ok(credential));
                    return;
                }
                Selection::RetryAt(at) => {
                    // Sleep until the soonest cooldown expires, but never
                    // past this request's deadline.
                    let wake = (at + self.config.select_retry_margin).min(deadline);
                    sleep_until(wake).await;
                }
                Selection::Exhausted => {
                    let _ = request.tx.send(Err(DispatchError::PoolExhausted));
                    return;
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::pool::PoolConfig;
    use tokio::time::{advance, Duration};

    fn scheduler_with(
        credentials: usize,
        config: SchedulerConfig,
    ) -> (RequestScheduler, Arc<CredentialPool>) {
        let secrets = (0..credentials).map(|i| format!("sk-test-{}", i)).collect();
        let pool = Arc::new(CredentialPool::new(secrets, PoolConfig::default()).unwrap());
        let scheduler = RequestScheduler::new(Arc::clone(&pool), config);
        (scheduler, pool)
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_resolves_immediately_when_available() {
        let (scheduler, _pool) = scheduler_with(1, SchedulerConfig::default());

        let credential = scheduler.acquire().await.unwrap();
        assert_eq!(credential.index(), 0);
        assert_eq!(credential.requests(), 1);
        assert_eq!(scheduler.queue_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_order_under_contention() {
        let (scheduler, pool) = scheduler_with(1, SchedulerConfig::default());

        // Park the only credential on a short cooldown so all three callers
        // queue up behind it.
        pool.get(0)
            .unwrap()
            .set_rate_limited_until(Instant::now() + Duration::from_secs(2));

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for label in ["a", "b", "c"] {
            let scheduler = scheduler.clone();
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                scheduler.acquire().await.unwrap();
                order.lock().unwrap().push(label);
            }));
            // Make enqueue order deterministic.
            tokio::task::yield_now().await;
        }

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_times_out_when_cooldown_outlasts_window() {
        let (scheduler, pool) = scheduler_with(
            1,
            SchedulerConfig::default().with_admission_timeout(Duration::from_secs(1)),
        );
        pool.get(0)
            .unwrap()
            .set_rate_limited_until(Instant::now() + Duration::from_secs(60));

        let started = Instant::now();
        let err = scheduler.acquire().await.unwrap_err();
        assert_eq!(err, DispatchError::AcquireTimeout(Duration::from_secs(1)));
        // Failed at the deadline, not after the full cooldown.
        assert!(started.elapsed() < Duration::from_secs(2));

        // The timed-out request is gone for good; the credential stays
        // untouched even after its cooldown expires.
        advance(Duration::from_secs(120)).await;
        assert_eq!(pool.get(0).unwrap().requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_out_short_cooldown() {
        let (scheduler, pool) = scheduler_with(1, SchedulerConfig::default());
        pool.get(0)
            .unwrap()
            .set_rate_limited_until(Instant::now() + Duration::from_secs(2));

        let started = Instant::now();
        let credential = scheduler.acquire().await.unwrap();
        assert_eq!(credential.index(), 0);
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_fails_fast_when_pool_cannot_recover() {
        let (scheduler, pool) = scheduler_with(2, SchedulerConfig::default());
        pool.get(0).unwrap().set_healthy(false);
        pool.get(1).unwrap().set_healthy(false);

        let err = scheduler.acquire().await.unwrap_err();
        assert_eq!(err, DispatchError::PoolExhausted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_len_counts_request_waiting_out_cooldown() {
        let (scheduler, pool) = scheduler_with(1, SchedulerConfig::default());
        pool.get(0)
            .unwrap()
            .set_rate_limited_until(Instant::now() + Duration::from_secs(5));

        let handle = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.acquire().await }
        });
        // Let the drain task pop the request and park on the cooldown.
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }

        // The caller is still waiting even though its request left the queue.
        assert_eq!(scheduler.queue_len(), 1);

        handle.await.unwrap().unwrap();
        assert_eq!(scheduler.queue_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_restarts_after_queue_empties() {
        let (scheduler, _pool) = scheduler_with(1, SchedulerConfig::default());

        scheduler.acquire().await.unwrap();
        advance(Duration::from_secs(1)).await;
        scheduler.acquire().await.unwrap();
        assert_eq!(scheduler.queue_len(), 0);
    }
}
