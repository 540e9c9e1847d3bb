//! Deterministic input selection

use crate::resolver::dedup_ordered;
use crate::searcher::OutputSearcher;
use crate::{Error, Result};
use node_api::{Address, Output, OutputFilter, OutputId, OutputResponse};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// One chosen input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedInput {
    /// Output consumed
    pub output_id: OutputId,
    /// Owning address
    pub address: Address,
    /// Amount carried
    pub amount: u64,
    /// Full output
    pub output: Output,
}

/// Inputs covering a requested amount
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSet {
    /// Selected inputs, in selection order
    pub inputs: Vec<SelectedInput>,
    /// Sum of the selected amounts
    pub total: u64,
}

impl InputSet {
    /// Ids of the selected outputs
    pub fn output_ids(&self) -> Vec<OutputId> {
        self.inputs.iter().map(|i| i.output_id).collect()
    }

    /// Number of inputs
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    /// True when nothing was selected
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    fn push(&mut self, input: SelectedInput) -> Result<()> {
        self.total = sum_amounts([self.total, input.amount])?;
        self.inputs.push(input);
        Ok(())
    }
}

/// Sum amounts reported by a node, rejecting totals that overflow `u64`
pub(crate) fn sum_amounts(amounts: impl IntoIterator<Item = u64>) -> Result<u64> {
    amounts
        .into_iter()
        .try_fold(0u64, |total, amount| total.checked_add(amount))
        .ok_or_else(|| {
            Error::Node(node_api::Error::InvalidResponse(
                "output amounts overflow u64".to_string(),
            ))
        })
}

/// Chooses unspent outputs covering an amount
///
/// Callers spending from the same addresses concurrently must serialize
/// their calls: nothing here reserves the selected outputs.
#[derive(Debug, Clone)]
pub struct InputSelector {
    searcher: OutputSearcher,
    max_inputs: usize,
}

impl InputSelector {
    /// Create new selector
    pub fn new(searcher: OutputSearcher, max_inputs: usize) -> Self {
        Self {
            searcher,
            max_inputs: max_inputs.max(1),
        }
    }

    /// Select inputs from `addresses` until `amount` is covered
    ///
    /// Addresses are drained in the given order; within an address the
    /// largest outputs come first, ties broken by output id.
    pub async fn find_inputs(&self, addresses: &[Address], amount: u64) -> Result<InputSet> {
        if amount == 0 {
            return Ok(InputSet::default());
        }

        let outputs = self
            .searcher
            .find_outputs(&OutputFilter::basic(), addresses)
            .await?;
        let candidates = order_candidates(addresses, outputs);

        let available = sum_amounts(candidates.iter().map(|c| c.amount))?;
        if available < amount {
            info!(
                "Insufficient funds on {} address(es): {} available, {} required",
                addresses.len(),
                available,
                amount
            );
            return Err(Error::InsufficientFunds {
                available,
                required: amount,
            });
        }

        let mut selection = InputSet::default();
        for candidate in candidates {
            if selection.total >= amount {
                break;
            }
            if selection.len() == self.max_inputs {
                return Err(Error::InputLimitExceeded {
                    max_inputs: self.max_inputs,
                    selected: selection.total,
                    required: amount,
                });
            }
            selection.push(candidate)?;
        }

        debug!(
            "Selected {} input(s) totalling {} for {}",
            selection.len(),
            selection.total,
            amount
        );
        Ok(selection)
    }
}

/// Group by caller address order, then amount descending, then output id
fn order_candidates(addresses: &[Address], outputs: Vec<OutputResponse>) -> Vec<SelectedInput> {
    let mut ordered = Vec::with_capacity(outputs.len());

    for address in dedup_ordered(addresses) {
        let mut owned: Vec<SelectedInput> = outputs
            .iter()
            .filter(|r| r.output.address() == Some(&address))
            .map(|r| SelectedInput {
                output_id: r.output_id,
                address,
                amount: r.output.amount,
                output: r.output.clone(),
            })
            .collect();
        owned.sort_by(|a, b| b.amount.cmp(&a.amount).then(a.output_id.cmp(&b.output_id)));
        ordered.extend(owned);
    }

    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use node_api::{InMemoryNode, NodePool, PoolConfig};
    use std::sync::Arc;

    fn address(seed: u8) -> Address {
        Address::new([seed; 32])
    }

    fn selector(node: Arc<InMemoryNode>, max_inputs: usize) -> InputSelector {
        paged_selector(node, max_inputs, 10)
    }

    fn paged_selector(node: Arc<InMemoryNode>, max_inputs: usize, max_pages: usize) -> InputSelector {
        let config = PoolConfig {
            transport_retries: 0,
            ..PoolConfig::default()
        };
        let pool = NodePool::new(vec![node], config).unwrap();
        InputSelector::new(OutputSearcher::new(Arc::new(pool), 4, max_pages), max_inputs)
    }

    #[tokio::test]
    async fn test_first_address_drained_first() {
        let node = Arc::new(InMemoryNode::new("node"));
        node.insert_output(Output::basic(3, address(1)));
        node.insert_output(Output::basic(5, address(2)));

        let selection = selector(node, 128)
            .find_inputs(&[address(1), address(2)], 6)
            .await
            .unwrap();

        let amounts: Vec<u64> = selection.inputs.iter().map(|i| i.amount).collect();
        assert_eq!(amounts, vec![3, 5]);
        assert_eq!(selection.total, 8);
    }

    #[tokio::test]
    async fn test_largest_outputs_first() {
        let node = Arc::new(InMemoryNode::new("node"));
        for amount in [1, 7, 4] {
            node.insert_output(Output::basic(amount, address(1)));
        }

        let selection = selector(node, 128)
            .find_inputs(&[address(1)], 8)
            .await
            .unwrap();
        let amounts: Vec<u64> = selection.inputs.iter().map(|i| i.amount).collect();
        assert_eq!(amounts, vec![7, 4]);
    }

    #[tokio::test]
    async fn test_insufficient_funds() {
        let node = Arc::new(InMemoryNode::new("node"));
        node.insert_output(Output::basic(3, address(1)));

        let err = selector(node, 128)
            .find_inputs(&[address(1)], 4)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientFunds {
                available: 3,
                required: 4
            }
        ));
    }

    #[tokio::test]
    async fn test_input_limit() {
        let node = Arc::new(InMemoryNode::new("node"));
        for _ in 0..4 {
            node.insert_output(Output::basic(1, address(1)));
        }

        let selector = selector(node, 2);
        assert_eq!(selector.find_inputs(&[address(1)], 2).await.unwrap().len(), 2);
        let err = selector.find_inputs(&[address(1)], 3).await.unwrap_err();
        assert!(matches!(
            err,
            Error::InputLimitExceeded {
                max_inputs: 2,
                selected: 2,
                required: 3
            }
        ));
    }

    #[tokio::test]
    async fn test_restricted_outputs_ignored() {
        let node = Arc::new(InMemoryNode::new("node"));
        node.insert_output(
            Output::basic(50, address(1)).with_unlock_condition(
                node_api::UnlockCondition::Timelock { timestamp: 10 },
            ),
        );
        node.insert_output(Output::basic(2, address(1)));

        let err = selector(node, 128)
            .find_inputs(&[address(1)], 10)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InsufficientFunds { available: 2, .. }));
    }

    #[tokio::test]
    async fn test_overflowing_amounts_rejected() {
        let node = Arc::new(InMemoryNode::new("node"));
        node.insert_output(Output::basic(u64::MAX, address(1)));
        node.insert_output(Output::basic(1, address(1)));

        let err = selector(node, 128)
            .find_inputs(&[address(1)], 2)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Node(node_api::Error::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_address_fails_selection() {
        let node = Arc::new(InMemoryNode::new("node"));
        node.insert_output(Output::basic(10, address(1)));
        node.insert_output(Output::basic(10, address(2)));
        node.fail_address(address(2));

        let err = selector(node, 128)
            .find_inputs(&[address(1), address(2)], 5)
            .await
            .unwrap_err();
        match err {
            Error::PartialResult { found, failures } => {
                assert_eq!(found.len(), 1);
                assert_eq!(failures[0].address, address(2));
            }
            other => panic!("expected partial result, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_page_limit_is_not_insufficient_funds() {
        let node = Arc::new(InMemoryNode::new("node"));
        node.set_page_size(2);
        for _ in 0..5 {
            node.insert_output(Output::basic(1, address(1)));
        }

        let err = paged_selector(node, 128, 2)
            .find_inputs(&[address(1)], 5)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PageLimitExceeded { pages: 2, .. }));
    }

    #[test]
    fn test_sum_amounts() {
        assert_eq!(sum_amounts([3, 4]).unwrap(), 7);
        assert_eq!(sum_amounts(std::iter::empty()).unwrap(), 0);
        assert!(sum_amounts([u64::MAX, 1]).is_err());
    }

    #[tokio::test]
    async fn test_zero_amount_selects_nothing() {
        let node = Arc::new(InMemoryNode::new("node"));
        let selection = selector(node.clone(), 128)
            .find_inputs(&[address(1)], 0)
            .await
            .unwrap();
        assert!(selection.is_empty());
        assert_eq!(node.request_count(), 0);
    }
}
