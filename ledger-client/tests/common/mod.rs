//! Shared helpers for integration tests

#![allow(dead_code)]

use ledger_client::{Client, Config};
use node_api::{Address, InMemoryNode, NodeClient, PoolConfig};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Install a test subscriber honouring RUST_LOG
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn address(seed: u8) -> Address {
    Address::new([seed; 32])
}

/// Short timeouts and a three-attempt confirmation limit
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.pool = PoolConfig {
        request_timeout_ms: 1_000,
        transport_retries: 1,
        initial_retry_delay_ms: 1,
        max_retry_delay_ms: 2,
    };
    config.retry.interval_secs = 0;
    config.retry.max_attempts = 3;
    config.network_id = 1;
    config
}

pub fn client(nodes: &[Arc<InMemoryNode>]) -> Client {
    client_with(nodes, test_config())
}

pub fn client_with(nodes: &[Arc<InMemoryNode>], config: Config) -> Client {
    init_tracing();
    let nodes = nodes
        .iter()
        .map(|n| n.clone() as Arc<dyn NodeClient>)
        .collect();
    Client::from_nodes(nodes, config).unwrap()
}
