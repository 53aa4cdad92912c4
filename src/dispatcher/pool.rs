//! Credential pool: selection policy and health bookkeeping
//!
//! The pool owns the credential set and implements the selection heuristic:
//! among healthy, non-throttled credentials, prefer the one that is least
//! recently used and least error prone. Selection is a fairness heuristic,
//! not a hard guarantee.

use super::credential::{Credential, CredentialStatus};
use crate::config::Settings;
use crate::error::{DispatchError, UpstreamError};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

// ============================================================================
// Pool Configuration
// ============================================================================

/// Configuration for credential pool behavior
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Error count above which a credential is marked unhealthy
    pub unhealthy_error_threshold: u32,
    /// Cooldown applied after a rate-limit rejection
    pub rate_limit_cooldown: Duration,
    /// Error count at or below which the recovery pass restores health
    pub healthy_error_floor: u32,
    /// Idle time after which the recovery pass decays one error
    pub error_decay_idle: Duration,
    /// Buffer past a cooldown before the recovery pass clears it
    pub rate_limit_clear_buffer: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            unhealthy_error_threshold: 5,
            rate_limit_cooldown: Duration::from_secs(60),
            healthy_error_floor: 2,
            error_decay_idle: Duration::from_secs(600),
            rate_limit_clear_buffer: Duration::from_secs(60),
        }
    }
}

impl PoolConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            unhealthy_error_threshold: settings.unhealthy_error_threshold,
            rate_limit_cooldown: settings.rate_limit_cooldown(),
            healthy_error_floor: settings.healthy_error_floor,
            error_decay_idle: settings.error_decay_idle(),
            rate_limit_clear_buffer: settings.rate_limit_clear_buffer(),
        }
    }

    pub fn with_unhealthy_error_threshold(mut self, threshold: u32) -> Self {
        self.unhealthy_error_threshold = threshold;
        self
    }

    pub fn with_rate_limit_cooldown(mut self, cooldown: Duration) -> Self {
        self.rate_limit_cooldown = cooldown;
        self
    }

    pub fn with_healthy_error_floor(mut self, floor: u32) -> Self {
        self.healthy_error_floor = floor;
        self
    }

    pub fn with_error_decay_idle(mut self, idle: Duration) -> Self {
        self.error_decay_idle = idle;
        self
    }
}

// ============================================================================
// Selection Outcome
// ============================================================================

/// Outcome of one selection attempt
#[derive(Debug)]
pub enum Selection {
    /// A credential qualified; its request count and last-used time have
    /// already been updated.
    Ready(Arc<Credential>),
    /// Nothing qualifies right now, but a cooldown expires at this instant.
    /// The caller should suspend until then (plus a margin) and retry.
    RetryAt(Instant),
    /// No credential qualifies and none is expected to recover on its own.
    Exhausted,
}

// ============================================================================
// Credential Pool
// ============================================================================

/// A pool of interchangeable upstream credentials
pub struct CredentialPool {
    credentials: Vec<Arc<Credential>>,
    config: PoolConfig,
}

impl CredentialPool {
    /// Create a pool from opaque secrets. Fails fast on an empty list.
    pub fn new(secrets: Vec<String>, config: PoolConfig) -> Result<Self, DispatchError> {
        if secrets.is_empty() {
            return Err(DispatchError::NoCredentials);
        }
        let credentials = secrets
            .into_iter()
            .enumerate()
            .map(|(index, secret)| Arc::new(Credential::new(index, secret)))
            .collect();
        Ok(Self {
            credentials,
            config,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, DispatchError> {
        Self::new(
            settings.credential_list.clone(),
            PoolConfig::from_settings(settings),
        )
    }

    /// Select the best available credential.
    ///
    /// Candidates are healthy and not on cooldown. Each is scored as
    /// `errors / max(requests, 1) + seconds_since_last_use` and the maximum
    /// wins, which favors the least-recently-used, least-error-prone
    /// credential. Selection itself updates the winner's metrics so that two
    /// back-to-back selections do not pick the same credential for the wrong
    /// reason.
    pub fn select_best(&self) -> Selection {
        let now = Instant::now();

        let mut best: Option<&Arc<Credential>> = None;
        let mut best_score = f64::NEG_INFINITY;
        for cred in &self.credentials {
            if !cred.is_healthy() || cred.is_rate_limited(now) {
                continue;
            }
            let score = cred.error_rate() + cred.seconds_since_last_use(now);
            if score > best_score || best.is_none() {
                best = Some(cred);
                best_score = score;
            }
        }

        if let Some(cred) = best {
            cred.mark_selected(now);
            tracing::trace!(credential = cred.index(), "Selected credential");
            return Selection::Ready(Arc::clone(cred));
        }

        // Nothing qualifies. If some cooldown still lies in the future the
        // caller can wait it out; otherwise the pool will not recover on
        // its own.
        let soonest_reset = self
            .credentials
            .iter()
            .filter_map(|c| c.rate_limited_until())
            .filter(|until| *until > now)
            .min();

        match soonest_reset {
            Some(at) => Selection::RetryAt(at),
            None => Selection::Exhausted,
        }
    }

    /// Record a successful call on a credential
    pub fn record_success(&self, credential: &Credential) {
        credential.set_healthy(true);
        tracing::trace!(credential = credential.index(), "Recorded success");
    }

    /// Record a failed call on a credential.
    ///
    /// Rate-limit rejections start the cooldown window; fatal rejections
    /// quarantine the credential immediately; accumulated errors above the
    /// threshold quarantine it as well.
    pub fn record_error(&self, credential: &Credential, error: &UpstreamError) {
        let errors = credential.record_error();

        if error.is_rate_limit() {
            let until = Instant::now() + self.config.rate_limit_cooldown;
            credential.set_rate_limited_until(until);
            tracing::warn!(
                credential = credential.index(),
                cooldown_ms = self.config.rate_limit_cooldown.as_millis() as u64,
                "Credential rate limited, cooling down"
            );
        }

        if error.is_fatal() {
            credential.set_healthy(false);
            tracing::warn!(
                credential = credential.index(),
                "Credential rejected by upstream, marked unhealthy"
            );
        } else if errors > self.config.unhealthy_error_threshold {
            credential.set_healthy(false);
            tracing::warn!(
                credential = credential.index(),
                errors,
                threshold = self.config.unhealthy_error_threshold,
                "Credential exceeded error threshold, marked unhealthy"
            );
        }
    }

    /// One pass of passive recovery, run periodically by the health monitor.
    ///
    /// Credentials idle past the decay window shed one error per pass;
    /// credentials whose error weight has dropped to the floor are restored;
    /// cooldowns that expired more than the buffer ago are cleared. No
    /// active probing: an optimistically recovered credential is simply
    /// re-penalized by the executor if it fails again.
    pub fn run_recovery_pass(&self) {
        let now = Instant::now();

        for cred in &self.credentials {
            if cred.errors() > 0 && cred.idle_longer_than(now, self.config.error_decay_idle) {
                cred.decay_error();
                tracing::debug!(
                    credential = cred.index(),
                    errors = cred.errors(),
                    "Decayed error count for idle credential"
                );
            }

            if !cred.is_healthy() && cred.errors() <= self.config.healthy_error_floor {
                cred.set_healthy(true);
                tracing::info!(credential = cred.index(), "Credential recovered");
            }

            if let Some(until) = cred.rate_limited_until() {
                if now > until + self.config.rate_limit_clear_buffer {
                    cred.clear_rate_limit();
                    tracing::debug!(credential = cred.index(), "Cleared expired rate limit");
                }
            }
        }
    }

    /// Get the number of credentials
    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    /// Check if the pool is empty
    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    /// Get the number of currently selectable credentials
    pub fn healthy_count(&self) -> usize {
        let now = Instant::now();
        self.credentials
            .iter()
            .filter(|c| c.is_healthy() && !c.is_rate_limited(now))
            .count()
    }

    /// Get a credential by pool index
    pub fn get(&self, index: usize) -> Option<&Arc<Credential>> {
        self.credentials.get(index)
    }

    /// Get pool statistics
    pub fn status(&self) -> PoolStatus {
        let now = Instant::now();
        PoolStatus {
            total_credentials: self.credentials.len(),
            healthy_credentials: self.healthy_count(),
            per_credential: self.credentials.iter().map(|c| c.snapshot(now)).collect(),
        }
    }
}

// ============================================================================
// Pool Statistics
// ============================================================================

/// Statistics about a credential pool
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub total_credentials: usize,
    pub healthy_credentials: usize,
    pub per_credential: Vec<CredentialStatus>,
}

// ============================================================================
// Tests
// ============================================================================
