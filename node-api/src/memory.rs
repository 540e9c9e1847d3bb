//! In-process simulated node
//!
//! Keeps blocks, metadata and outputs in memory and answers the
//! [`NodeClient`] interface. Milestones are simulated by explicit
//! [`InMemoryNode::confirm_block`] calls (or immediately on submission when
//! auto-confirm is on). Failure injection covers the partial-failure paths
//! of the client: an unreachable node, a failing address query and a failing
//! output lookup.

use crate::{
    client::NodeClient,
    types::{
        Address, Block, BlockId, BlockMetadata, LedgerInclusionState, Output, OutputFilter,
        OutputId, OutputMetadata, OutputPage, OutputResponse, TransactionId,
    },
    Error, Result,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Default number of outputs per page
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// What the node suggests for blocks no milestone referenced yet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PendingHint {
    /// Block is recent, nothing to do
    #[default]
    Wait,
    /// Block is lagging behind, a promotion helps
    Promote,
    /// Block is below max depth, the payload must be reattached
    Reattach,
}

struct StoredBlock {
    block: Block,
    metadata: BlockMetadata,
}

struct NodeState {
    blocks: HashMap<BlockId, StoredBlock>,
    outputs: BTreeMap<OutputId, OutputResponse>,
    included_transactions: HashMap<TransactionId, BlockId>,
    tips: Vec<BlockId>,
    genesis: BlockId,
    milestone_index: u32,
    page_size: usize,
    auto_confirm: bool,
    pending_hint: PendingHint,
    unreachable: bool,
    request_limit: Option<u64>,
    failing_addresses: HashSet<Address>,
    failing_outputs: HashSet<OutputId>,
    submissions: Vec<BlockId>,
    synthetic_transactions: u64,
}

/// Simulated ledger node
pub struct InMemoryNode {
    name: String,
    state: RwLock<NodeState>,
    requests: AtomicU64,
}

impl std::fmt::Debug for InMemoryNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryNode")
            .field("name", &self.name)
            .field("requests", &self.requests.load(Ordering::Relaxed))
            .finish()
    }
}

impl InMemoryNode {
    /// Create new node holding only a genesis block
    pub fn new(name: impl Into<String>) -> Self {
        let genesis = Block::new(Vec::new(), None);
        let genesis_id = genesis.id();
        let mut metadata = BlockMetadata::pending(genesis_id, Vec::new());
        metadata.referenced_by_milestone_index = Some(0);
        metadata.ledger_inclusion_state = Some(LedgerInclusionState::NoTransaction);

        let mut blocks = HashMap::new();
        blocks.insert(
            genesis_id,
            StoredBlock {
                block: genesis,
                metadata,
            },
        );

        Self {
            name: name.into(),
            state: RwLock::new(NodeState {
                blocks,
                outputs: BTreeMap::new(),
                included_transactions: HashMap::new(),
                tips: vec![genesis_id],
                genesis: genesis_id,
                milestone_index: 0,
                page_size: DEFAULT_PAGE_SIZE,
                auto_confirm: true,
                pending_hint: PendingHint::default(),
                unreachable: false,
                request_limit: None,
                failing_addresses: HashSet::new(),
                failing_outputs: HashSet::new(),
                submissions: Vec::new(),
                synthetic_transactions: 0,
            }),
            requests: AtomicU64::new(0),
        }
    }

    /// Outputs returned per page
    pub fn set_page_size(&self, page_size: usize) {
        self.state.write().page_size = page_size.max(1);
    }

    /// Confirm submitted blocks immediately
    pub fn set_auto_confirm(&self, auto_confirm: bool) {
        self.state.write().auto_confirm = auto_confirm;
    }

    /// Hint reported for unreferenced blocks
    pub fn set_pending_hint(&self, hint: PendingHint) {
        self.state.write().pending_hint = hint;
    }

    /// Fail every request with a transport error
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.write().unreachable = unreachable;
    }

    /// Become unreachable once `limit` requests have been served
    pub fn fail_after_requests(&self, limit: u64) {
        self.state.write().request_limit = Some(limit);
    }

    /// Fail address queries for `address`
    pub fn fail_address(&self, address: Address) {
        self.state.write().failing_addresses.insert(address);
    }

    /// Fail lookups of `output_id`
    pub fn fail_output(&self, output_id: OutputId) {
        self.state.write().failing_outputs.insert(output_id);
    }

    /// Book an unspent output outside of any submitted transaction
    pub fn insert_output(&self, output: Output) -> OutputId {
        let mut state = self.state.write();
        state.synthetic_transactions += 1;
        let transaction_id =
            TransactionId::hash_of(&state.synthetic_transactions.to_le_bytes());
        let output_id = OutputId::new(transaction_id, 0);
        let metadata = OutputMetadata {
            block_id: state.genesis,
            is_spent: false,
            milestone_index_booked: state.milestone_index,
        };
        state.outputs.insert(
            output_id,
            OutputResponse {
                output_id,
                output,
                metadata,
            },
        );
        output_id
    }

    /// Forget an output, as a pruning node does with old spent outputs
    pub fn prune_output(&self, output_id: &OutputId) {
        self.state.write().outputs.remove(output_id);
    }

    /// Reference a block by a new milestone, applying its transaction
    pub fn confirm_block(&self, block_id: &BlockId) -> Result<LedgerInclusionState> {
        let mut state = self.state.write();
        confirm_locked(&mut state, block_id)
    }

    /// Reference a block by a new milestone as conflicting
    pub fn conflict_block(&self, block_id: &BlockId) -> Result<()> {
        let mut state = self.state.write();
        state.milestone_index += 1;
        let index = state.milestone_index;
        let stored = state
            .blocks
            .get_mut(block_id)
            .ok_or_else(|| Error::not_found("block", block_id))?;
        stored.metadata.referenced_by_milestone_index = Some(index);
        stored.metadata.ledger_inclusion_state = Some(LedgerInclusionState::Conflicting);
        Ok(())
    }

    /// Unspent balance of `address`
    pub fn balance(&self, address: &Address) -> u64 {
        self.state
            .read()
            .outputs
            .values()
            .filter(|r| !r.metadata.is_spent && r.output.address() == Some(address))
            .map(|r| r.output.amount)
            .sum()
    }

    /// Blocks submitted through [`NodeClient::submit_block`], in order
    pub fn submitted_blocks(&self) -> Vec<BlockId> {
        self.state.read().submissions.clone()
    }

    /// Number of submitted blocks
    pub fn submission_count(&self) -> usize {
        self.state.read().submissions.len()
    }

    /// Number of requests received through the [`NodeClient`] interface
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    fn enter(&self, operation: &str) -> Result<()> {
        let served = self.requests.fetch_add(1, Ordering::Relaxed);
        let state = self.state.read();
        if state.unreachable || state.request_limit.map_or(false, |limit| served >= limit) {
            return Err(Error::Transport {
                node: self.name.clone(),
                message: format!("{}: connection refused", operation),
            });
        }
        Ok(())
    }
}

fn confirm_locked(state: &mut NodeState, block_id: &BlockId) -> Result<LedgerInclusionState> {
    let block = state
        .blocks
        .get(block_id)
        .map(|stored| stored.block.clone())
        .ok_or_else(|| Error::not_found("block", block_id))?;

    state.milestone_index += 1;
    let milestone_index = state.milestone_index;

    let inclusion = match block.transaction() {
        None => LedgerInclusionState::NoTransaction,
        Some(transaction) => {
            let transaction_id = transaction.id();
            let inputs_unspent = transaction.essence.inputs.iter().all(|input| {
                state
                    .outputs
                    .get(input)
                    .map_or(false, |r| !r.metadata.is_spent)
            });

            if state.included_transactions.contains_key(&transaction_id) || !inputs_unspent {
                LedgerInclusionState::Conflicting
            } else {
                for input in &transaction.essence.inputs {
                    if let Some(spent) = state.outputs.get_mut(input) {
                        spent.metadata.is_spent = true;
                    }
                }
                for (index, output) in transaction.essence.outputs.iter().enumerate() {
                    let output_id = OutputId::new(transaction_id, index as u16);
                    state.outputs.insert(
                        output_id,
                        OutputResponse {
                            output_id,
                            output: output.clone(),
                            metadata: OutputMetadata {
                                block_id: *block_id,
                                is_spent: false,
                                milestone_index_booked: milestone_index,
                            },
                        },
                    );
                }
                state.included_transactions.insert(transaction_id, *block_id);
                LedgerInclusionState::Included
            }
        }
    };

    if let Some(stored) = state.blocks.get_mut(block_id) {
        stored.metadata.referenced_by_milestone_index = Some(milestone_index);
        stored.metadata.ledger_inclusion_state = Some(inclusion);
    }

    debug!(
        "Milestone {} referenced block {} ({:?})",
        milestone_index, block_id, inclusion
    );
    Ok(inclusion)
}

#[async_trait]
impl NodeClient for InMemoryNode {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_tips(&self) -> Result<Vec<BlockId>> {
        self.enter("get_tips")?;
        Ok(self.state.read().tips.clone())
    }

    async fn submit_block(&self, block: &Block) -> Result<BlockId> {
        self.enter("submit_block")?;
        let block_id = block.id();
        if let Some(transaction) = block.transaction() {
            if transaction.essence.output_amount().is_none() {
                return Err(Error::InvalidResponse(format!(
                    "block {} creates outputs whose amounts overflow",
                    block_id
                )));
            }
        }
        let mut state = self.state.write();

        if state.blocks.contains_key(&block_id) {
            return Ok(block_id);
        }
        for parent in &block.parents {
            if !state.blocks.contains_key(parent) {
                return Err(Error::InvalidResponse(format!(
                    "block {} references unknown parent {}",
                    block_id, parent
                )));
            }
        }

        state.blocks.insert(
            block_id,
            StoredBlock {
                block: block.clone(),
                metadata: BlockMetadata::pending(block_id, block.parents.clone()),
            },
        );
        state.tips.retain(|tip| !block.parents.contains(tip));
        state.tips.push(block_id);
        state.submissions.push(block_id);

        if state.auto_confirm {
            confirm_locked(&mut state, &block_id)?;
        }

        Ok(block_id)
    }

    async fn get_block(&self, block_id: &BlockId) -> Result<Block> {
        self.enter("get_block")?;
        self.state
            .read()
            .blocks
            .get(block_id)
            .map(|stored| stored.block.clone())
            .ok_or_else(|| Error::not_found("block", block_id))
    }

    async fn get_block_metadata(&self, block_id: &BlockId) -> Result<BlockMetadata> {
        self.enter("get_block_metadata")?;
        let state = self.state.read();
        let stored = state
            .blocks
            .get(block_id)
            .ok_or_else(|| Error::not_found("block", block_id))?;

        let mut metadata = stored.metadata.clone();
        if !metadata.is_referenced() {
            metadata.should_promote = Some(state.pending_hint == PendingHint::Promote);
            metadata.should_reattach = Some(state.pending_hint == PendingHint::Reattach);
        }
        Ok(metadata)
    }

    async fn get_output(&self, output_id: &OutputId) -> Result<OutputResponse> {
        self.enter("get_output")?;
        let state = self.state.read();
        if state.failing_outputs.contains(output_id) {
            return Err(Error::Transport {
                node: self.name.clone(),
                message: format!("get_output {}: internal server error", output_id),
            });
        }
        state
            .outputs
            .get(output_id)
            .cloned()
            .ok_or_else(|| Error::not_found("output", output_id))
    }

    async fn find_outputs_by_address(
        &self,
        address: &Address,
        filter: &OutputFilter,
        cursor: Option<String>,
    ) -> Result<OutputPage> {
        self.enter("find_outputs_by_address")?;
        let state = self.state.read();
        if state.failing_addresses.contains(address) {
            return Err(Error::Transport {
                node: self.name.clone(),
                message: format!("outputs of {}: internal server error", address),
            });
        }

        let offset = match cursor {
            Some(cursor) => cursor
                .parse::<usize>()
                .map_err(|_| Error::InvalidResponse(format!("invalid cursor '{}'", cursor)))?,
            None => 0,
        };

        let matching: Vec<&OutputResponse> = state
            .outputs
            .values()
            .filter(|r| {
                !r.metadata.is_spent
                    && r.output.address() == Some(address)
                    && filter.matches(&r.output)
            })
            .collect();

        let end = (offset + state.page_size).min(matching.len());
        let items = matching
            .get(offset..end)
            .unwrap_or_default()
            .iter()
            .map(|r| (*r).clone())
            .collect();
        let cursor = (end < matching.len()).then(|| end.to_string());

        Ok(OutputPage { items, cursor })
    }

    async fn get_included_block(&self, transaction_id: &TransactionId) -> Result<Block> {
        self.enter("get_included_block")?;
        let state = self.state.read();
        state
            .included_transactions
            .get(transaction_id)
            .and_then(|block_id| state.blocks.get(block_id))
            .map(|stored| stored.block.clone())
            .ok_or_else(|| Error::not_found("included block of transaction", transaction_id))
    }
}
