//! Error types for the client engine

use crate::confirmation::AttemptRecord;
use crate::consolidation::ConsolidationTransfer;
use node_api::{Address, BlockId, OutputResponse};
use thiserror::Error;

/// Result type for client operations
pub type Result<T> = std::result::Result<T, Error>;

/// One failed sub-query of a multi-address search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryFailure {
    /// Address whose query failed
    pub address: Address,
    /// Error message
    pub message: String,
}

/// Client errors
#[derive(Error, Debug)]
pub enum Error {
    /// Node error (not found, transport, timeout...)
    #[error("Node error: {0}")]
    Node(#[from] node_api::Error),

    /// Some sub-queries failed while others succeeded
    #[error("Partial result: {} output(s) found, {} query(ies) failed", found.len(), failures.len())]
    PartialResult {
        /// Outputs from the successful sub-queries
        found: Vec<OutputResponse>,
        /// Failed sub-queries
        failures: Vec<QueryFailure>,
    },

    /// Address still had a cursor pending after the page limit
    #[error("Outputs of {address} exceed {pages} page(s)")]
    PageLimitExceeded {
        /// Address being searched
        address: Address,
        /// Pages fetched before giving up
        pages: usize,
    },

    /// Addresses hold less than the requested amount
    #[error("Insufficient funds: {available} available, {required} required")]
    InsufficientFunds {
        /// Total over all addresses
        available: u64,
        /// Requested amount
        required: u64,
    },

    /// Amount cannot be covered within the input limit
    #[error("Input limit exceeded: {max_inputs} inputs cover {selected}, {required} required")]
    InputLimitExceeded {
        /// Maximum inputs per transaction
        max_inputs: usize,
        /// Amount covered by the maximum number of inputs
        selected: u64,
        /// Requested amount
        required: u64,
    },

    /// Retry or promotion not warranted
    #[error("Block {block_id} is not promotable: {reason}")]
    NotPromotable {
        /// Block id
        block_id: BlockId,
        /// Why
        reason: String,
    },

    /// Reattachment not warranted
    #[error("Block {block_id} is not reattachable: {reason}")]
    NotReattachable {
        /// Block id
        block_id: BlockId,
        /// Why
        reason: String,
    },

    /// Node does not consider a promotion useful
    #[error("Promotion of block {block_id} is unnecessary")]
    PromotionUnnecessary {
        /// Block id
        block_id: BlockId,
    },

    /// Block already included by a milestone
    #[error("Block {block_id} is already included")]
    AlreadyIncluded {
        /// Block id
        block_id: BlockId,
    },

    /// Attempts exhausted before inclusion
    #[error("Block {block_id} not included after {} attempt(s)", attempts.len())]
    NotIncluded {
        /// Original block id
        block_id: BlockId,
        /// One record per attempt
        attempts: Vec<AttemptRecord>,
    },

    /// Caller cancelled a long-running operation
    #[error("Cancelled while waiting for block {block_id} after {} attempt(s)", attempts.len())]
    Cancelled {
        /// Original block id
        block_id: BlockId,
        /// Attempts made before cancellation
        attempts: Vec<AttemptRecord>,
    },

    /// Signer capability failed
    #[error("Signing error: {0}")]
    Signing(#[from] crate::signer::SignerError),

    /// Consolidation stopped part way through the address range
    #[error(
        "Consolidation into {target} aborted at index {address_index} after {} transfer(s): {source}",
        completed.len()
    )]
    ConsolidationAborted {
        /// Consolidation target
        target: Address,
        /// Transfers confirmed before the failure
        completed: Vec<ConsolidationTransfer>,
        /// Index being processed when the failure happened
        address_index: u32,
        /// Address at that index, unless deriving it failed
        failed_address: Option<Address>,
        /// Underlying failure
        source: Box<Error>,
    },

    /// Cancelled between addresses of a consolidation
    #[error("Consolidation cancelled")]
    ConsolidationCancelled,

    /// Invalid argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Resource absent at every queried node
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Node(e) if e.is_not_found())
    }

    /// Guard refused a write; checking again later may succeed
    pub fn is_guard_rejection(&self) -> bool {
        matches!(
            self,
            Error::NotPromotable { .. }
                | Error::NotReattachable { .. }
                | Error::PromotionUnnecessary { .. }
                | Error::AlreadyIncluded { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let block_id = BlockId::new([1; 32]);
        assert!(Error::AlreadyIncluded { block_id }.is_guard_rejection());
        assert!(!Error::InsufficientFunds {
            available: 1,
            required: 2
        }
        .is_guard_rejection());

        let missing = Error::from(node_api::Error::not_found("output", "0x01:0"));
        assert!(missing.is_not_found());
    }

    #[test]
    fn test_messages_carry_context() {
        let err = Error::InsufficientFunds {
            available: 3,
            required: 6,
        };
        assert_eq!(err.to_string(), "Insufficient funds: 3 available, 6 required");

        let err = Error::NotIncluded {
            block_id: BlockId::new([0; 32]),
            attempts: Vec::new(),
        };
        assert!(err.to_string().contains("0 attempt(s)"));

        let err = Error::PageLimitExceeded {
            address: Address::new([2; 32]),
            pages: 2,
        };
        assert!(err.to_string().ends_with("exceed 2 page(s)"));
    }
}
