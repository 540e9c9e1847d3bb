//! Ledger node interface
//!
//! Types and traits the client engine uses to talk to ledger nodes:
//!
//! - **Types**: block, transaction and output model with hash identifiers
//! - **NodeClient**: narrow async interface to one node
//! - **NodePool**: ordered set of nodes with failover and transparent retry
//!   of idempotent reads
//! - **InMemoryNode**: simulated node for tests and local development
//!
//! The transport behind a [`NodeClient`] (HTTP, MQTT, ...) is out of scope.

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod client;
pub mod config;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod pool;
pub mod types;

// Re-exports
pub use client::NodeClient;
pub use config::PoolConfig;
pub use error::{Error, Result};
pub use memory::{InMemoryNode, PendingHint};
pub use pool::NodePool;
pub use types::{
    Address, Block, BlockId, BlockMetadata, Feature, LedgerInclusionState, Output, OutputFilter,
    OutputId, OutputMetadata, OutputPage, OutputResponse, Payload, TaggedDataPayload,
    TransactionEssence, TransactionId, TransactionPayload, Unlock, UnlockCondition,
};
