//! llm-dispatch
//!
//! An in-process outbound request dispatcher for rate-limited AI generation
//! services. It owns a pool of interchangeable credentials, load-balances
//! calls across them, quarantines unhealthy or throttled credentials, queues
//! callers in FIFO order under contention, and retries failed calls with
//! bounded, backed-off failover across the pool.

// Public modules
pub mod config;
pub mod dispatcher;
pub mod error;

// Re-export commonly used types
pub use config::Settings;
pub use dispatcher::{Credential, Dispatcher, DispatcherStatus};
pub use error::{AttemptError, DispatchError, UpstreamError};
