//! Configuration for the client engine

use node_api::PoolConfig;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Engine configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Node access
    pub pool: PoolConfig,

    /// Confirmation loop
    pub retry: RetryConfig,

    /// Multi-address searches
    pub search: SearchConfig,

    /// Input selection
    pub selection: SelectionConfig,

    /// Network the transactions are built for
    pub network_id: u64,
}

/// Confirmation loop configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Wait between attempts (seconds)
    pub interval_secs: u64,

    /// Attempts before giving up
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            max_attempts: 40,
        }
    }
}

impl RetryConfig {
    /// Wait between attempts
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Search configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Pages followed per address before stopping
    pub max_pages_per_address: usize,

    /// Requests in flight per call
    pub max_concurrent_requests: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_pages_per_address: 1_000,
            max_concurrent_requests: 16,
        }
    }
}

/// Input selection configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// Inputs per transaction
    pub max_inputs: usize,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            max_inputs: node_api::types::INPUT_COUNT_MAX,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Some(v) = env_var("LEDGER_CLIENT_REQUEST_TIMEOUT_MS")? {
            config.pool.request_timeout_ms = v;
        }
        if let Some(v) = env_var("LEDGER_CLIENT_TRANSPORT_RETRIES")? {
            config.pool.transport_retries = v;
        }
        if let Some(v) = env_var("LEDGER_CLIENT_RETRY_INTERVAL_SECS")? {
            config.retry.interval_secs = v;
        }
        if let Some(v) = env_var("LEDGER_CLIENT_RETRY_MAX_ATTEMPTS")? {
            config.retry.max_attempts = v;
        }
        if let Some(v) = env_var("LEDGER_CLIENT_MAX_CONCURRENT_REQUESTS")? {
            config.search.max_concurrent_requests = v;
        }
        if let Some(v) = env_var("LEDGER_CLIENT_MAX_INPUTS")? {
            config.selection.max_inputs = v;
        }
        if let Some(v) = env_var("LEDGER_CLIENT_NETWORK_ID")? {
            config.network_id = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate invariants
    pub fn validate(&self) -> crate::Result<()> {
        self.pool
            .validate()
            .map_err(|e| crate::Error::Config(e.to_string()))?;
        if self.retry.max_attempts == 0 {
            return Err(crate::Error::Config(
                "retry.max_attempts must be positive".to_string(),
            ));
        }
        if self.search.max_concurrent_requests == 0 || self.search.max_pages_per_address == 0 {
            return Err(crate::Error::Config(
                "search limits must be positive".to_string(),
            ));
        }
        if self.selection.max_inputs == 0 || self.selection.max_inputs > node_api::types::INPUT_COUNT_MAX
        {
            return Err(crate::Error::Config(format!(
                "selection.max_inputs must be within 1..={}",
                node_api::types::INPUT_COUNT_MAX
            )));
        }
        Ok(())
    }
}

fn env_var<T: FromStr>(name: &str) -> crate::Result<Option<T>> {
    match std::env::var(name) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| crate::Error::Config(format!("{}: invalid value '{}'", name, value))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.retry.interval(), Duration::from_secs(5));
        assert_eq!(config.retry.max_attempts, 40);
        assert_eq!(config.selection.max_inputs, 128);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            network_id = 7

            [retry]
            max_attempts = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.network_id, 7);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.interval_secs, 5);
        assert_eq!(config.pool, PoolConfig::default());
    }

    #[test]
    fn test_from_file() {
        let path = std::env::temp_dir().join(format!("ledger-client-{}.toml", std::process::id()));
        std::fs::write(&path, "[selection]\nmax_inputs = 0\n").unwrap();
        assert!(matches!(Config::from_file(&path), Err(crate::Error::Config(_))));

        std::fs::write(&path, "[selection]\nmax_inputs = 16\n").unwrap();
        assert_eq!(Config::from_file(&path).unwrap().selection.max_inputs, 16);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_from_env() {
        std::env::set_var("LEDGER_CLIENT_RETRY_MAX_ATTEMPTS", "9");
        let config = Config::from_env().unwrap();
        assert_eq!(config.retry.max_attempts, 9);

        std::env::set_var("LEDGER_CLIENT_RETRY_MAX_ATTEMPTS", "many");
        assert!(Config::from_env().is_err());
        std::env::remove_var("LEDGER_CLIENT_RETRY_MAX_ATTEMPTS");
    }
}
