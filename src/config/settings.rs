//! Application settings and configuration
//!
//! This module provides configuration management for the dispatcher,
//! loading settings from environment variables with sensible defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Dispatcher settings
///
/// All timing values are expressed in milliseconds in the environment and
/// exposed as [`Duration`] via accessor methods.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    /// Log level for the process (trace, debug, info, warn, error)
    pub log_level: String,

    /// Upstream credentials, one opaque secret per pool slot.
    /// Never serialized and never logged.
    #[serde(skip_serializing)]
    pub credential_list: Vec<String>,

    /// Maximum attempts per dispatched unit of work
    pub max_retry_attempts: u32,

    /// Cooldown applied to a credential after a rate-limit rejection
    pub rate_limit_cooldown_ms: u64,

    /// How long a caller may wait in the admission queue
    pub admission_timeout_ms: u64,

    /// Period of the background health monitor
    pub health_check_interval_ms: u64,

    /// Error count above which a credential is marked unhealthy
    pub unhealthy_error_threshold: u32,

    /// Idle time after which the monitor decays one error per pass
    pub error_decay_idle_ms: u64,

    /// Error count at or below which the monitor restores health
    pub healthy_error_floor: u32,

    /// Extra buffer past a cooldown before the monitor clears it
    pub rate_limit_clear_buffer_ms: u64,

    /// Base delay for exponential retry backoff
    pub backoff_base_ms: u64,

    /// Cap on the retry backoff delay
    pub backoff_cap_ms: u64,

    /// Safety margin added when waiting for a cooldown to expire
    pub select_retry_margin_ms: u64,
}

impl Settings {
    /// Load settings from environment variables with defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists (ignored in production typically)
        dotenvy::dotenv().ok();

        let settings = Self {
            log_level: env_or_default("LOG_LEVEL", "info"),

            credential_list: parse_credential_list(&env_or_default("CREDENTIAL_LIST", "")),

            max_retry_attempts: env_or_default("MAX_RETRY_ATTEMPTS", "3")
                .parse()
                .context("Invalid MAX_RETRY_ATTEMPTS value")?,

            rate_limit_cooldown_ms: env_or_default("RATE_LIMIT_COOLDOWN_MS", "60000")
                .parse()
                .context("Invalid RATE_LIMIT_COOLDOWN_MS value")?,

            admission_timeout_ms: env_or_default("ADMISSION_TIMEOUT_MS", "30000")
                .parse()
                .context("Invalid ADMISSION_TIMEOUT_MS value")?,

            health_check_interval_ms: env_or_default("HEALTH_CHECK_INTERVAL_MS", "300000")
                .parse()
                .context("Invalid HEALTH_CHECK_INTERVAL_MS value")?,

            unhealthy_error_threshold: env_or_default("UNHEALTHY_ERROR_THRESHOLD", "5")
                .parse()
                .context("Invalid UNHEALTHY_ERROR_THRESHOLD value")?,

            error_decay_idle_ms: env_or_default("ERROR_DECAY_IDLE_MS", "600000")
                .parse()
                .context("Invalid ERROR_DECAY_IDLE_MS value")?,

            healthy_error_floor: env_or_default("HEALTHY_ERROR_FLOOR", "2")
                .parse()
                .context("Invalid HEALTHY_ERROR_FLOOR value")?,

            rate_limit_clear_buffer_ms: env_or_default("RATE_LIMIT_CLEAR_BUFFER_MS", "60000")
                .parse()
                .context("Invalid RATE_LIMIT_CLEAR_BUFFER_MS value")?,

            backoff_base_ms: env_or_default("BACKOFF_BASE_MS", "1000")
                .parse()
                .context("Invalid BACKOFF_BASE_MS value")?,

            backoff_cap_ms: env_or_default("BACKOFF_CAP_MS", "5000")
                .parse()
                .context("Invalid BACKOFF_CAP_MS value")?,

            select_retry_margin_ms: env_or_default("SELECT_RETRY_MARGIN_MS", "100")
                .parse()
                .context("Invalid SELECT_RETRY_MARGIN_MS value")?,
        };

        settings.validate()?;

        Ok(settings)
    }

    /// Validate settings
    pub fn validate(&self) -> Result<()> {
        if self.credential_list.is_empty() {
            anyhow::bail!("CREDENTIAL_LIST must contain at least one credential");
        }

        if self.max_retry_attempts == 0 {
            anyhow::bail!("MAX_RETRY_ATTEMPTS must be > 0");
        }

        if self.admission_timeout_ms == 0 {
            anyhow::bail!("ADMISSION_TIMEOUT_MS must be > 0");
        }

        if self.health_check_interval_ms == 0 {
            anyhow::bail!("HEALTH_CHECK_INTERVAL_MS must be > 0");
        }

        if self.backoff_cap_ms < self.backoff_base_ms {
            anyhow::bail!("BACKOFF_CAP_MS must be >= BACKOFF_BASE_MS");
        }

        if self.healthy_error_floor > self.unhealthy_error_threshold {
            anyhow::bail!("HEALTHY_ERROR_FLOOR must be <= UNHEALTHY_ERROR_THRESHOLD");
        }

        Ok(())
    }

    pub fn rate_limit_cooldown(&self) -> Duration {
        Duration::from_millis(self.rate_limit_cooldown_ms)
    }

    pub fn admission_timeout(&self) -> Duration {
        Duration::from_millis(self.admission_timeout_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn error_decay_idle(&self) -> Duration {
        Duration::from_millis(self.error_decay_idle_ms)
    }

    pub fn rate_limit_clear_buffer(&self) -> Duration {
        Duration::from_millis(self.rate_limit_clear_buffer_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_millis(self.backoff_cap_ms)
    }

    pub fn select_retry_margin(&self) -> Duration {
        Duration::from_millis(self.select_retry_margin_ms)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            credential_list: Vec::new(),
            max_retry_attempts: 3,
            rate_limit_cooldown_ms: 60_000,
            admission_timeout_ms: 30_000,
            health_check_interval_ms: 300_000,
            unhealthy_error_threshold: 5,
            error_decay_idle_ms: 600_000,
            healthy_error_floor: 2,
            rate_limit_clear_buffer_ms: 60_000,
            backoff_base_ms: 1_000,
            backoff_cap_ms: 5_000,
            select_retry_margin_ms: 100,
        }
    }
}

/// Parse a comma-separated credential list, skipping empty entries
fn parse_credential_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Helper function to get environment variable with default
fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
