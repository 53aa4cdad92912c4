//! Failover executor: the public entry point for dispatched work
//!
//! The [`Dispatcher`] owns the credential pool, the admission queue, and the
//! health monitor. Callers hand it a unit of work that performs exactly one
//! upstream call with the credential it is given; the dispatcher decides
//! which credential handles the call, when to wait, and how to retry.

use super::credential::{Credential, CredentialStatus};
use super::monitor::HealthMonitor;
use super::pool::CredentialPool;
use super::scheduler::{RequestScheduler, SchedulerConfig};
use crate::config::Settings;
use crate::error::{AttemptError, DispatchError, UpstreamError};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use uuid::Uuid;

// ============================================================================
// Executor Configuration
// ============================================================================

/// Configuration for retry and backoff behavior
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Attempts per dispatched unit of work
    pub max_attempts: u32,
    /// Base delay for exponential backoff between attempts
    pub backoff_base: Duration,
    /// Cap on the backoff delay
    pub backoff_cap: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(1_000),
            backoff_cap: Duration::from_millis(5_000),
        }
    }
}

impl ExecutorConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_attempts: settings.max_retry_attempts,
            backoff_base: settings.backoff_base(),
            backoff_cap: settings.backoff_cap(),
        }
    }

    /// Backoff delay after `completed_attempts` failures:
    /// `base * 2^(completed_attempts - 1)`, capped.
    pub fn backoff_delay(&self, completed_attempts: u32) -> Duration {
        let exp = completed_attempts.saturating_sub(1).min(16);
        (self.backoff_base * (1u32 << exp)).min(self.backoff_cap)
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// The outbound request dispatcher.
///
/// One instance per process, constructed explicitly at startup and passed by
/// reference to call sites; there is no ambient global state. Dropping the
/// dispatcher without calling [`Dispatcher::shutdown`] leaves the monitor
/// task running until the runtime stops.
pub struct Dispatcher {
    pool: Arc<CredentialPool>,
    scheduler: RequestScheduler,
    monitor: HealthMonitor,
    config: ExecutorConfig,
}

impl Dispatcher {
    /// Build a dispatcher from settings and start its health monitor.
    /// Must be called from within a tokio runtime.
    pub fn new(settings: &Settings) -> Result<Self, DispatchError> {
        let pool = Arc::new(CredentialPool::from_settings(settings)?);
        let scheduler = RequestScheduler::new(
            Arc::clone(&pool),
            SchedulerConfig::from_settings(settings),
        );
        let monitor = HealthMonitor::spawn(Arc::clone(&pool), settings.health_check_interval());

        tracing::info!(
            credentials = pool.len(),
            max_attempts = settings.max_retry_attempts,
            "Dispatcher initialized"
        );

        Ok(Self {
            pool,
            scheduler,
            monitor,
            config: ExecutorConfig::from_settings(settings),
        })
    }

    /// Execute a unit of work with the configured attempt budget
    pub async fn execute<T, F, Fut>(&self, work: F) -> Result<T, DispatchError>
    where
        F: FnMut(Arc<Credential>) -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        self.execute_with_attempts(work, self.config.max_attempts)
            .await
    }

    /// Execute a unit of work, retrying on a (likely different) credential
    /// with exponential backoff, up to `max_attempts`.
    ///
    /// Admission timeouts and upstream failures deliberately share the same
    /// attempt counter. An admission timeout consumes an attempt without a
    /// backoff sleep, since the caller already waited out the full window.
    pub async fn execute_with_attempts<T, F, Fut>(
        &self,
        mut work: F,
        max_attempts: u32,
    ) -> Result<T, DispatchError>
    where
        F: FnMut(Arc<Credential>) -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let max_attempts = max_attempts.max(1);
        let request_id = Uuid::new_v4();
        let mut attempt: u32 = 0;
        let mut last_failure = AttemptError::Timeout;

        while attempt < max_attempts {
            let credential = match self.scheduler.acquire().await {
                Ok(credential) => credential,
                Err(DispatchError::AcquireTimeout(waited)) => {
                    attempt += 1;
                    last_failure = AttemptError::Timeout;
                    tracing::warn!(
                        request_id = %request_id,
                        attempt,
                        waited_ms = waited.as_millis() as u64,
                        "No credential assigned within the admission window"
                    );
                    continue;
                }
                // A pool that cannot recover is surfaced immediately,
                // never retried.
                Err(err) => {
                    tracing::error!(request_id = %request_id, error = %err, "Acquire failed");
                    return Err(err);
                }
            };

            match work(Arc::clone(&credential)).await {
                Ok(value) => {
                    self.pool.record_success(&credential);
                    tracing::debug!(
                        request_id = %request_id,
                        credential = credential.index(),
                        attempt = attempt + 1,
                        "Dispatch succeeded"
                    );
                    return Ok(value);
                }
                Err(err) => {
                    self.pool.record_error(&credential, &err);
                    attempt += 1;
                    tracing::warn!(
                        request_id = %request_id,
                        credential = credential.index(),
                        attempt,
                        error = %err,
                        "Dispatch attempt failed"
                    );
                    last_failure = AttemptError::Upstream(err);

                    if attempt < max_attempts {
                        let delay = self.config.backoff_delay(attempt);
                        tracing::debug!(
                            request_id = %request_id,
                            delay_ms = delay.as_millis() as u64,
                            "Backing off before retry"
                        );
                        sleep(delay).await;
                    }
                }
            }
        }

        tracing::error!(
            request_id = %request_id,
            attempts = attempt,
            last = %last_failure,
            "Dispatch exhausted all attempts"
        );
        Err(DispatchError::RetriesExhausted {
            attempts: attempt,
            last: last_failure,
        })
    }

    /// Point-in-time snapshot for observability endpoints
    pub fn status(&self) -> DispatcherStatus {
        let pool = self.pool.status();
        DispatcherStatus {
            total_credentials: pool.total_credentials,
            healthy_credentials: pool.healthy_credentials,
            queue_length: self.scheduler.queue_len(),
            per_credential: pool.per_credential,
        }
    }

    /// Stop the health monitor and release the dispatcher
    pub async fn shutdown(self) {
        self.monitor.shutdown().await;
        tracing::info!("Dispatcher shutdown complete");
    }
}

// ============================================================================
// Dispatcher Status
// ============================================================================

/// Observable dispatcher state, shaped for health-check endpoints
#[derive(Debug, Clone, Serialize)]
pub struct DispatcherStatus {
    pub total_credentials: usize,
    pub healthy_credentials: usize,
    pub queue_length: usize,
    pub per_credential: Vec<CredentialStatus>,
}

// ============================================================================
// Tests
// ============================================================================
