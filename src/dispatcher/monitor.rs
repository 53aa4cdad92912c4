//! Background health monitor
//!
//! Runs the pool's passive recovery pass on a fixed period. The task is
//! owned by the dispatcher and cancelled on shutdown so no timers leak
//! across test runs.

use super::pool::CredentialPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Handle to the periodic recovery task
pub struct HealthMonitor {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl HealthMonitor {
    /// Spawn the monitor task. Must be called from within a tokio runtime.
    pub fn spawn(pool: Arc<CredentialPool>, interval: Duration) -> Self {
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; skip it so the first
            // recovery pass happens one full period after startup.
            ticker.tick().await;

            tracing::debug!(interval_ms = interval.as_millis() as u64, "Health monitor started");

            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    _ = ticker.tick() => pool.run_recovery_pass(),
                }
            }

            tracing::debug!("Health monitor stopped");
        });

        Self { cancel, handle }
    }

    /// Stop the monitor and wait for the task to finish
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::pool::PoolConfig;
    use tokio::time::{advance, Instant};

    fn test_pool() -> Arc<CredentialPool> {
        Arc::new(CredentialPool::new(vec!["sk-test".to_string()], PoolConfig::default()).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_runs_recovery_on_period() {
        let pool = test_pool();
        let cred = Arc::clone(pool.get(0).unwrap());
        cred.mark_selected(Instant::now());
        for _ in 0..6 {
            cred.record_error();
        }
        cred.set_healthy(false);

        let monitor = HealthMonitor::spawn(Arc::clone(&pool), Duration::from_secs(300));

        // The ticks inside the first advance land before the idle window
        // expires; the five that follow each decay one error.
        advance(Duration::from_secs(601)).await;
        for _ in 0..5 {
            advance(Duration::from_secs(300)).await;
            tokio::task::yield_now().await;
        }

        assert!(cred.errors() <= 2);
        assert!(cred.is_healthy());

        monitor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_ticking() {
        let pool = test_pool();
        let cred = Arc::clone(pool.get(0).unwrap());
        cred.record_error();

        let monitor = HealthMonitor::spawn(Arc::clone(&pool), Duration::from_secs(300));
        monitor.shutdown().await;

        // Idle well past the decay window: no passes run after shutdown.
        advance(Duration::from_secs(3600)).await;
        tokio::task::yield_now().await;
        assert_eq!(cred.errors(), 1);
    }
}
