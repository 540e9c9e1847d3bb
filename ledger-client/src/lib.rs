//! Ledger client engine
//!
//! Talks to the nodes of a milestone-confirmed block DAG through a
//! [`node_api::NodePool`]:
//!
//! - **OutputResolver**: concurrent output lookups by id
//! - **OutputSearcher**: multi-address output search spread over nodes
//! - **InputSelector**: deterministic choice of inputs covering an amount
//! - **ConfirmationDriver**: promotion / reattachment loop until inclusion
//! - **FundConsolidator**: sweeps an address range into its first address
//!
//! [`Client`] wires them together and exposes one method per operation.

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod client;
pub mod config;
pub mod confirmation;
pub mod consolidation;
pub mod error;
pub mod metrics;
pub mod resolver;
pub mod searcher;
pub mod selector;
pub mod signer;

// Re-exports
pub use client::Client;
pub use config::{Config, RetryConfig, SearchConfig, SelectionConfig};
pub use confirmation::{
    AttemptAction, AttemptRecord, ConfirmationDriver, ConfirmationState, Inclusion, PendingBlock,
    RetryOutcome,
};
pub use consolidation::{ConsolidationReport, ConsolidationTransfer, FundConsolidator};
pub use error::{Error, QueryFailure, Result};
pub use resolver::OutputResolver;
pub use searcher::OutputSearcher;
pub use selector::{InputSelector, InputSet, SelectedInput};
pub use signer::{Ed25519Signer, InputSigningData, Signer, SignerError};
