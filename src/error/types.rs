//! Dispatcher error types

use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Upstream Errors
// ============================================================================

/// Classified outcome of a single failed upstream call.
///
/// Classification is authoritative at the unit-of-work boundary: the caller
/// inspects the provider response once and tags the failure, so the
/// dispatcher never pattern-matches on error text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    /// Upstream signaled a quota/429-style rejection.
    #[error("upstream rate limit exceeded")]
    RateLimited,

    /// Upstream transient unavailability (503-style).
    #[error("upstream overloaded: {0}")]
    Overloaded(String),

    /// Credential invalid or unauthorized.
    #[error("credential rejected by upstream: {0}")]
    Fatal(String),

    /// Unclassified upstream failure.
    #[error("unknown upstream error: {0}")]
    Unknown(String),
}

impl UpstreamError {
    /// Check if this error should place the credential on cooldown
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, UpstreamError::RateLimited)
    }

    /// Check if this error permanently disqualifies the credential
    /// (until health-monitor recovery)
    pub fn is_fatal(&self) -> bool {
        matches!(self, UpstreamError::Fatal(_))
    }
}

// ============================================================================
// Attempt Failures
// ============================================================================

/// The failure recorded for one dispatch attempt.
///
/// Admission timeouts and upstream failures share the same attempt counter,
/// so an exhausted dispatch must be able to report either as its last error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttemptError {
    /// No credential was assigned within the admission window.
    #[error("no credential assigned within the admission window")]
    Timeout,

    /// The upstream call itself failed.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

// ============================================================================
// Dispatch Errors
// ============================================================================

/// Errors surfaced by the dispatcher to its callers
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The admission queue could not assign a credential within the window.
    #[error("timed out after {0:?} waiting for a credential")]
    AcquireTimeout(Duration),

    /// No credential can be selected and none is expected to recover on its
    /// own. Always surfaced, never retried.
    #[error("credential pool exhausted: no credential is expected to recover")]
    PoolExhausted,

    /// Every attempt failed. Distinguished from [`DispatchError::PoolExhausted`]
    /// so callers can choose a user-facing message.
    #[error("all {attempts} attempts failed, last error: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: AttemptError,
    },

    /// The dispatcher was constructed with an empty credential list.
    #[error("no credentials configured")]
    NoCredentials,
}

impl DispatchError {
    /// Check if the failure is a whole-pool condition rather than
    /// an exhausted retry budget
    pub fn is_pool_exhausted(&self) -> bool {
        matches!(self, DispatchError::PoolExhausted)
    }
}
