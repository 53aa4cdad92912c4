//! Error types for the dispatcher

pub mod types;

pub use types::{AttemptError, DispatchError, UpstreamError};
