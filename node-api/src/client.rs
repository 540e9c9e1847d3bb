//! Node client trait

use crate::types::{
    Address, Block, BlockId, BlockMetadata, OutputFilter, OutputId, OutputPage, OutputResponse,
    TransactionId,
};
use crate::Result;
use async_trait::async_trait;

/// Access to one ledger node (or anything that behaves like one)
///
/// Implementations must be safe for concurrent use without external locking
/// and must not cache ledger state: confirmation status changes between
/// queries.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Node name, used in errors, logs and metrics
    fn name(&self) -> &str;

    /// Blocks a new block should reference
    async fn get_tips(&self) -> Result<Vec<BlockId>>;

    /// Submit a block, returning its id
    async fn submit_block(&self, block: &Block) -> Result<BlockId>;

    /// Get block by id
    async fn get_block(&self, block_id: &BlockId) -> Result<Block>;

    /// Get confirmation status of a block
    async fn get_block_metadata(&self, block_id: &BlockId) -> Result<BlockMetadata>;

    /// Get output by id
    async fn get_output(&self, output_id: &OutputId) -> Result<OutputResponse>;

    /// One page of unspent outputs owned by `address` matching `filter`
    async fn find_outputs_by_address(
        &self,
        address: &Address,
        filter: &OutputFilter,
        cursor: Option<String>,
    ) -> Result<OutputPage>;

    /// Block whose transaction the ledger included
    async fn get_included_block(&self, transaction_id: &TransactionId) -> Result<Block>;
}
