//! Client facade: one typed method per operation

use crate::confirmation::{ConfirmationDriver, Inclusion, RetryOutcome};
use crate::config::Config;
use crate::consolidation::{ConsolidationReport, FundConsolidator};
use crate::resolver::{dedup_ordered, OutputResolver};
use crate::searcher::OutputSearcher;
use crate::selector::{InputSelector, InputSet};
use crate::signer::Signer;
use crate::Result;
use futures::stream::{self, StreamExt, TryStreamExt};
use node_api::{
    Address, Block, BlockId, NodeClient, NodePool, OutputFilter, OutputId, OutputResponse,
};
use std::collections::HashSet;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Ledger client engine
///
/// Every component shares one [`NodePool`]; nothing is cached between
/// calls.
#[derive(Debug, Clone)]
pub struct Client {
    pool: Arc<NodePool>,
    config: Config,
    resolver: OutputResolver,
    searcher: OutputSearcher,
    selector: InputSelector,
    driver: ConfirmationDriver,
    consolidator: FundConsolidator,
}

impl Client {
    /// Create new client over an existing pool
    pub fn new(pool: Arc<NodePool>, config: Config) -> Result<Self> {
        config.validate()?;

        let concurrency = config.search.max_concurrent_requests;
        let resolver = OutputResolver::new(pool.clone(), concurrency);
        let searcher = OutputSearcher::new(
            pool.clone(),
            concurrency,
            config.search.max_pages_per_address,
        );
        let selector = InputSelector::new(searcher.clone(), config.selection.max_inputs);
        let driver = ConfirmationDriver::new(pool.clone(), config.retry.clone());
        let consolidator = FundConsolidator::new(
            pool.clone(),
            searcher.clone(),
            driver.clone(),
            config.selection.max_inputs,
            config.network_id,
        );

        info!("Client created over {} node(s)", pool.len());

        Ok(Self {
            pool,
            config,
            resolver,
            searcher,
            selector,
            driver,
            consolidator,
        })
    }

    /// Create new client and its pool from a node list
    pub fn from_nodes(nodes: Vec<Arc<dyn NodeClient>>, config: Config) -> Result<Self> {
        let pool = NodePool::new(nodes, config.pool.clone())?;
        Self::new(Arc::new(pool), config)
    }

    /// Node pool
    pub fn pool(&self) -> &Arc<NodePool> {
        &self.pool
    }

    /// Configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Outputs for every id, in caller order; fails on the first missing id
    pub async fn get_outputs(&self, output_ids: &[OutputId]) -> Result<Vec<OutputResponse>> {
        self.resolver.get_outputs(output_ids).await
    }

    /// Outputs for the ids that resolve, in caller order
    pub async fn try_get_outputs(&self, output_ids: &[OutputId]) -> Vec<OutputResponse> {
        self.resolver.try_get_outputs(output_ids).await
    }

    /// Blocks for distinct ids, in caller order
    pub async fn find_blocks(&self, block_ids: &[BlockId]) -> Result<Vec<Block>> {
        let blocks = stream::iter(dedup_ordered(block_ids))
            .map(|block_id| {
                let pool = self.pool.clone();
                async move { pool.get_block(&block_id).await }
            })
            .buffered(self.config.search.max_concurrent_requests)
            .try_collect()
            .await?;
        Ok(blocks)
    }

    /// Promote or reattach a lagging block
    pub async fn retry(&self, block_id: &BlockId) -> Result<RetryOutcome> {
        self.driver.retry(block_id).await
    }

    /// Drive a block to inclusion
    pub async fn retry_until_included(
        &self,
        block_id: &BlockId,
        interval: Option<Duration>,
        max_attempts: Option<u32>,
    ) -> Result<Inclusion> {
        self.retry_until_included_with_cancel(
            block_id,
            interval,
            max_attempts,
            &CancellationToken::new(),
        )
        .await
    }

    /// Drive a block to inclusion until `cancel` fires
    pub async fn retry_until_included_with_cancel(
        &self,
        block_id: &BlockId,
        interval: Option<Duration>,
        max_attempts: Option<u32>,
        cancel: &CancellationToken,
    ) -> Result<Inclusion> {
        self.driver
            .retry_until_included(block_id, interval, max_attempts, cancel)
            .await
    }

    /// Sweep an address range into its first address
    pub async fn consolidate_funds(
        &self,
        signer: &dyn Signer,
        account_index: u32,
        address_range: Range<u32>,
    ) -> Result<Option<Address>> {
        self.consolidate_funds_with_cancel(
            signer,
            account_index,
            address_range,
            &CancellationToken::new(),
        )
        .await
    }

    /// Sweep an address range, stopping between addresses when `cancel` fires
    pub async fn consolidate_funds_with_cancel(
        &self,
        signer: &dyn Signer,
        account_index: u32,
        address_range: Range<u32>,
        cancel: &CancellationToken,
    ) -> Result<Option<Address>> {
        self.consolidator
            .consolidate_funds(signer, account_index, address_range, cancel)
            .await
    }

    /// Sweep an address range and report every transfer
    pub async fn consolidate_funds_report(
        &self,
        signer: &dyn Signer,
        account_index: u32,
        address_range: Range<u32>,
        cancel: &CancellationToken,
    ) -> Result<Option<ConsolidationReport>> {
        self.consolidator
            .consolidate_funds_report(signer, account_index, address_range, cancel)
            .await
    }

    /// Inputs from `addresses` covering `amount`
    pub async fn find_inputs(&self, addresses: &[Address], amount: u64) -> Result<InputSet> {
        self.selector.find_inputs(addresses, amount).await
    }

    /// Resolved `output_ids` followed by the basic outputs of `addresses`
    pub async fn find_outputs(
        &self,
        output_ids: &[OutputId],
        addresses: &[Address],
    ) -> Result<Vec<OutputResponse>> {
        let mut outputs = self.resolver.get_outputs(output_ids).await?;
        let by_address = self
            .searcher
            .find_outputs(&OutputFilter::basic(), addresses)
            .await?;

        let mut seen: HashSet<OutputId> = outputs.iter().map(|r| r.output_id).collect();
        outputs.extend(by_address.into_iter().filter(|r| seen.insert(r.output_id)));
        Ok(outputs)
    }

    /// Reattach a block flagged for reattachment
    pub async fn reattach(&self, block_id: &BlockId) -> Result<(BlockId, Block)> {
        self.driver.reattach(block_id).await
    }

    /// Reattach a block without checking its metadata
    pub async fn reattach_unchecked(&self, block_id: &BlockId) -> Result<(BlockId, Block)> {
        self.driver.reattach_unchecked(block_id).await
    }

    /// Promote a block flagged for promotion
    pub async fn promote(&self, block_id: &BlockId) -> Result<(BlockId, Block)> {
        self.driver.promote(block_id).await
    }

    /// Promote a block without checking its metadata
    pub async fn promote_unchecked(&self, block_id: &BlockId) -> Result<(BlockId, Block)> {
        self.driver.promote_unchecked(block_id).await
    }
}
