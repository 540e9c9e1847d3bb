//! Configuration for node access

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Node pool configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Per-request timeout (milliseconds)
    pub request_timeout_ms: u64,

    /// Extra attempts per node for idempotent reads on transient failures
    pub transport_retries: u32,

    /// First backoff delay (milliseconds)
    pub initial_retry_delay_ms: u64,

    /// Backoff delay cap (milliseconds)
    pub max_retry_delay_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            transport_retries: 3,
            initial_retry_delay_ms: 100,
            max_retry_delay_ms: 2_000,
        }
    }
}

impl PoolConfig {
    /// Request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// First backoff delay
    pub fn initial_retry_delay(&self) -> Duration {
        Duration::from_millis(self.initial_retry_delay_ms)
    }

    /// Backoff delay cap
    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }

    /// Validate invariants
    pub fn validate(&self) -> crate::Result<()> {
        if self.request_timeout_ms == 0 {
            return Err(crate::Error::Config(
                "request_timeout_ms must be positive".to_string(),
            ));
        }
        if self.initial_retry_delay_ms > self.max_retry_delay_ms {
            return Err(crate::Error::Config(format!(
                "initial_retry_delay_ms ({}) exceeds max_retry_delay_ms ({})",
                self.initial_retry_delay_ms, self.max_retry_delay_ms
            )));
        }
        Ok(())
    }
}
