//! Credential type and live usage metrics
//!
//! A [`Credential`] is one upstream access token plus the health and usage
//! bookkeeping the pool needs for selection. The secret itself is opaque to
//! this crate: it is handed to the caller's unit of work to construct an
//! upstream client, never logged, and redacted from `Debug` output.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::time::{Duration, Instant};

/// One upstream credential with its live metrics.
///
/// All metrics use interior mutability so the pool can hand out
/// `Arc<Credential>` freely; timestamp fields sit behind a `Mutex` since
/// `Instant` is not atomic.
pub struct Credential {
    /// Stable position in the pool. The only identifier used in logs
    /// and status output.
    index: usize,
    /// The opaque upstream secret. Never logged.
    secret: String,
    /// Total selections, monotonic.
    requests: AtomicU64,
    /// Accumulated error weight, decayed by the health monitor.
    errors: AtomicU32,
    /// Eligibility flag derived from error weight (and fatal rejections).
    healthy: AtomicBool,
    /// When this credential was last selected.
    last_used_at: Mutex<Option<Instant>>,
    /// Cooldown expiry after a rate-limit rejection, if throttled.
    rate_limited_until: Mutex<Option<Instant>>,
}

impl Credential {
    pub fn new(index: usize, secret: impl Into<String>) -> Self {
        Self {
            index,
            secret: secret.into(),
            requests: AtomicU64::new(0),
            errors: AtomicU32::new(0),
            healthy: AtomicBool::new(true),
            last_used_at: Mutex::new(None),
            rate_limited_until: Mutex::new(None),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Get the upstream secret. Callers use this to build an upstream
    /// client; it must not appear in logs or serialized output.
    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn errors(&self) -> u32 {
        self.errors.load(Ordering::SeqCst)
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Record a selection: bump the request count and stamp the
    /// last-used time. Called by the pool inside the drain pass.
    pub fn mark_selected(&self, now: Instant) {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_used_at.lock() {
            *last = Some(now);
        }
    }

    /// Record one error and return the new count
    pub fn record_error(&self) -> u32 {
        self.errors.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Decay one error, flooring at zero
    pub fn decay_error(&self) {
        let _ = self
            .errors
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |e| e.checked_sub(1));
    }

    pub fn last_used_at(&self) -> Option<Instant> {
        self.last_used_at.lock().ok().and_then(|g| *g)
    }

    /// Seconds since the last selection. A credential that has never been
    /// used counts as infinitely stale, which makes it the most attractive
    /// candidate under the selection score.
    pub fn seconds_since_last_use(&self, now: Instant) -> f64 {
        match self.last_used_at() {
            Some(at) => now.duration_since(at).as_secs_f64(),
            None => f64::INFINITY,
        }
    }

    /// Error weight per request, the other half of the selection score
    pub fn error_rate(&self) -> f64 {
        f64::from(self.errors()) / self.requests().max(1) as f64
    }

    pub fn set_rate_limited_until(&self, until: Instant) {
        if let Ok(mut guard) = self.rate_limited_until.lock() {
            *guard = Some(until);
        }
    }

    pub fn rate_limited_until(&self) -> Option<Instant> {
        self.rate_limited_until.lock().ok().and_then(|g| *g)
    }

    pub fn clear_rate_limit(&self) {
        if let Ok(mut guard) = self.rate_limited_until.lock() {
            *guard = None;
        }
    }

    pub fn is_rate_limited(&self, now: Instant) -> bool {
        matches!(self.rate_limited_until(), Some(until) if until > now)
    }

    /// Check if the credential has been idle longer than `idle`.
    /// Never-used credentials count as idle.
    pub fn idle_longer_than(&self, now: Instant, idle: Duration) -> bool {
        match self.last_used_at() {
            Some(at) => now.duration_since(at) > idle,
            None => true,
        }
    }

    /// Point-in-time snapshot for status reporting
    pub fn snapshot(&self, now: Instant) -> CredentialStatus {
        let rate_limit_remaining_ms = self
            .rate_limited_until()
            .filter(|until| *until > now)
            .map(|until| until.duration_since(now).as_millis() as u64)
            .unwrap_or(0);

        CredentialStatus {
            index: self.index,
            requests: self.requests(),
            errors: self.errors(),
            healthy: self.is_healthy(),
            rate_limit_remaining_ms,
        }
    }
}

// Redact the secret; everything else is fair game for logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("index", &self.index)
            .field("secret", &"***")
            .field("requests", &self.requests())
            .field("errors", &self.errors())
            .field("healthy", &self.is_healthy())
            .finish()
    }
}

/// Observable state of one credential, as exposed by status endpoints
#[derive(Debug, Clone, Serialize)]
pub struct CredentialStatus {
    pub index: usize,
    pub requests: u64,
    pub errors: u32,
    pub healthy: bool,
    pub rate_limit_remaining_ms: u64,
}
