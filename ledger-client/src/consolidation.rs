//! Sweeping funds of an address range into its first address

use crate::confirmation::ConfirmationDriver;
use crate::metrics::CONSOLIDATION_TRANSFERS_TOTAL;
use crate::searcher::OutputSearcher;
use crate::selector::sum_amounts;
use crate::signer::{InputSigningData, Signer};
use crate::{Error, Result};
use node_api::types::BLOCK_PARENTS_MAX;
use node_api::{
    Address, Block, BlockId, NodeClient, NodePool, Output, OutputFilter, OutputResponse, Payload,
    TransactionEssence, TransactionPayload,
};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// One confirmed consolidation transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidationTransfer {
    /// Index of the drained address
    pub address_index: u32,
    /// Drained address
    pub from: Address,
    /// Inputs consumed
    pub inputs: usize,
    /// Amount moved
    pub amount: u64,
    /// Block that got included
    pub block_id: BlockId,
}

/// Outcome of a consolidation over a non-empty range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidationReport {
    /// Address at the start of the range
    pub target: Address,
    /// Confirmed transfers, in address order
    pub transfers: Vec<ConsolidationTransfer>,
}

/// Moves every basic output of an address range to the range's first address
#[derive(Debug, Clone)]
pub struct FundConsolidator {
    pool: Arc<NodePool>,
    searcher: OutputSearcher,
    driver: ConfirmationDriver,
    max_inputs: usize,
    network_id: u64,
}

impl FundConsolidator {
    /// Create new consolidator
    pub fn new(
        pool: Arc<NodePool>,
        searcher: OutputSearcher,
        driver: ConfirmationDriver,
        max_inputs: usize,
        network_id: u64,
    ) -> Self {
        Self {
            pool,
            searcher,
            driver,
            max_inputs: max_inputs.max(1),
            network_id,
        }
    }

    /// Consolidate and return the target if anything moved
    pub async fn consolidate_funds(
        &self,
        signer: &dyn Signer,
        account_index: u32,
        address_range: Range<u32>,
        cancel: &CancellationToken,
    ) -> Result<Option<Address>> {
        let report = self
            .consolidate_funds_report(signer, account_index, address_range, cancel)
            .await?;
        Ok(report
            .filter(|report| !report.transfers.is_empty())
            .map(|report| report.target))
    }

    /// Consolidate and report every transfer; `None` for an empty range
    ///
    /// Addresses are processed strictly in order and every transfer is
    /// confirmed before the next one is built.
    pub async fn consolidate_funds_report(
        &self,
        signer: &dyn Signer,
        account_index: u32,
        address_range: Range<u32>,
        cancel: &CancellationToken,
    ) -> Result<Option<ConsolidationReport>> {
        if address_range.is_empty() {
            return Ok(None);
        }

        let target = signer.address(account_index, address_range.start).await?;
        info!(
            "Consolidating account {} addresses {:?} into {}",
            account_index, address_range, target
        );

        let mut transfers = Vec::new();
        for address_index in address_range.start + 1..address_range.end {
            let result = self
                .consolidate_address(
                    signer,
                    account_index,
                    address_index,
                    target,
                    &mut transfers,
                    cancel,
                )
                .await;

            if let Err((failed_address, source)) = result {
                error!(
                    "Consolidation into {} aborted at index {}: {}",
                    target, address_index, source
                );
                return Err(Error::ConsolidationAborted {
                    target,
                    completed: transfers,
                    address_index,
                    failed_address,
                    source: Box::new(source),
                });
            }
        }

        info!(
            "Consolidation into {} finished with {} transfer(s)",
            target,
            transfers.len()
        );
        Ok(Some(ConsolidationReport { target, transfers }))
    }

    async fn consolidate_address(
        &self,
        signer: &dyn Signer,
        account_index: u32,
        address_index: u32,
        target: Address,
        transfers: &mut Vec<ConsolidationTransfer>,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), (Option<Address>, Error)> {
        let address = match signer.address(account_index, address_index).await {
            Ok(address) => address,
            Err(e) => return Err((None, e.into())),
        };
        let fail = |e: Error| (Some(address), e);

        if cancel.is_cancelled() {
            return Err(fail(Error::ConsolidationCancelled));
        }

        let outputs = self
            .searcher
            .find_outputs(&OutputFilter::basic(), &[address])
            .await
            .map_err(fail)?;
        if outputs.iter().all(|r| r.output.amount == 0) {
            debug!("Address {} (index {}) holds nothing", address, address_index);
            return Ok(());
        }

        for chunk in outputs.chunks(self.max_inputs) {
            let transfer = self
                .transfer(signer, account_index, address_index, address, target, chunk, cancel)
                .await
                .map_err(fail)?;
            CONSOLIDATION_TRANSFERS_TOTAL.inc();
            transfers.push(transfer);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn transfer(
        &self,
        signer: &dyn Signer,
        account_index: u32,
        address_index: u32,
        from: Address,
        target: Address,
        inputs: &[OutputResponse],
        cancel: &CancellationToken,
    ) -> Result<ConsolidationTransfer> {
        let amount = sum_amounts(inputs.iter().map(|r| r.output.amount))?;
        let essence = TransactionEssence {
            network_id: self.network_id,
            inputs: inputs.iter().map(|r| r.output_id).collect(),
            outputs: vec![Output::basic(amount, target)],
        };
        let signing_data: Vec<InputSigningData> = inputs
            .iter()
            .map(|r| InputSigningData {
                output_id: r.output_id,
                output: r.output.clone(),
                account_index,
                address_index,
            })
            .collect();

        let unlocks = signer.sign_transaction(&essence, &signing_data).await?;
        let payload = Payload::Transaction(Box::new(TransactionPayload { essence, unlocks }));

        let mut tips = self.pool.get_tips().await?;
        tips.truncate(BLOCK_PARENTS_MAX);
        let block_id = self.pool.submit_block(&Block::new(tips, Some(payload))).await?;
        info!(
            "Submitted consolidation of {} from {} in block {}",
            amount, from, block_id
        );

        let inclusion = self
            .driver
            .retry_until_included(&block_id, None, None, cancel)
            .await?;

        Ok(ConsolidationTransfer {
            address_index,
            from,
            inputs: inputs.len(),
            amount,
            block_id: inclusion.included.0,
        })
    }
}
