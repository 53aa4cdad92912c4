//! Outbound Request Dispatcher
//!
//! This module coordinates calls against a rate-limited external generation
//! service across a pool of interchangeable credentials.
//!
//! # Components
//! - [`Credential`]: one upstream secret plus its live metrics
//! - [`CredentialPool`]: selection policy and health bookkeeping
//! - [`RequestScheduler`]: FIFO admission queue, single active drain pass
//! - [`HealthMonitor`]: periodic passive recovery task
//! - [`Dispatcher`]: retry-with-failover execution, the public entry point
//!
//! # Example
//! ```ignore
//! use llm_dispatch::{Dispatcher, Settings, UpstreamError};
//!
//! let settings = Settings::load()?;
//! let dispatcher = Dispatcher::new(&settings)?;
//!
//! let analysis = dispatcher
//!     .execute(|credential| async move {
//!         call_generation_service(credential.secret()).await
//!     })
//!     .await?;
//! ```

mod credential;
mod executor;
mod monitor;
mod pool;
mod scheduler;

pub use credential::{Credential, CredentialStatus};
pub use executor::{Dispatcher, DispatcherStatus, ExecutorConfig};
pub use monitor::HealthMonitor;
pub use pool::{CredentialPool, PoolConfig, PoolStatus, Selection};
pub use scheduler::{RequestScheduler, SchedulerConfig};
