//! Failure categorisation and backoff for ingestion.
//!
//! - **Transient**: a dependency is down or slow (embedding, stopped store,
//!   timeouts). Redeliver with exponential backoff until `max_attempts`.
//! - **Permanent**: the delivery itself is bad. Dead-letter immediately.

use std::time::Duration;

use memento_core::config::IngestionConfig;
use memento_core::error::MementoError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Transient,
    Permanent,
}

impl ErrorCategory {
    pub fn of(err: &MementoError) -> Self {
        if err.is_transient() {
            ErrorCategory::Transient
        } else {
            ErrorCategory::Permanent
        }
    }
}

/// Redelivery policy derived from [`IngestionConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &IngestionConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_backoff: Duration::from_millis(config.base_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Delay before redelivering after failed attempt number `attempt`
    /// (1-based): `base * 2^(attempt - 1)`, capped at `max_backoff`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let base_ms = self.base_backoff.as_millis() as u64;
        let delay_ms = base_ms.saturating_mul(2u64.saturating_pow(exponent));
        Duration::from_millis(delay_ms).min(self.max_backoff)
    }

    /// Whether a failure on delivery `attempt` should be redelivered.
    pub fn should_retry(&self, category: ErrorCategory, attempt: u32) -> bool {
        category == ErrorCategory::Transient && attempt < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&IngestionConfig::default())
    }
}
