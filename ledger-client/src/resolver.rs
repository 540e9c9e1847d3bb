//! Concurrent output lookups by id

use crate::{Error, Result};
use futures::stream::{self, StreamExt};
use node_api::{NodeClient, NodePool, OutputId, OutputResponse};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Resolves output ids to full outputs
#[derive(Debug, Clone)]
pub struct OutputResolver {
    pool: Arc<NodePool>,
    concurrency: usize,
}

impl OutputResolver {
    /// Create new resolver issuing at most `concurrency` lookups at a time
    pub fn new(pool: Arc<NodePool>, concurrency: usize) -> Self {
        Self {
            pool,
            concurrency: concurrency.max(1),
        }
    }

    /// Resolve every id; the first failure fails the call
    ///
    /// Results follow the caller's order, duplicates collapsed to their first
    /// occurrence.
    pub async fn get_outputs(&self, output_ids: &[OutputId]) -> Result<Vec<OutputResponse>> {
        self.lookup_all(output_ids)
            .await
            .into_iter()
            .map(|(_, result)| result.map_err(Error::from))
            .collect()
    }

    /// Resolve every id, dropping the ones that fail
    pub async fn try_get_outputs(&self, output_ids: &[OutputId]) -> Vec<OutputResponse> {
        self.lookup_all(output_ids)
            .await
            .into_iter()
            .filter_map(|(output_id, result)| match result {
                Ok(response) => Some(response),
                Err(e) => {
                    debug!("Skipping output {}: {}", output_id, e);
                    None
                }
            })
            .collect()
    }

    async fn lookup_all(
        &self,
        output_ids: &[OutputId],
    ) -> Vec<(OutputId, node_api::Result<OutputResponse>)> {
        let distinct = dedup_ordered(output_ids);
        debug!("Resolving {} output(s)", distinct.len());

        stream::iter(distinct)
            .map(|output_id| {
                let pool = self.pool.clone();
                async move { (output_id, pool.get_output(&output_id).await) }
            })
            .buffered(self.concurrency)
            .collect()
            .await
    }
}

/// Distinct values in first-occurrence order
pub(crate) fn dedup_ordered<T: Copy + Eq + std::hash::Hash>(values: &[T]) -> Vec<T> {
    let mut seen = HashSet::with_capacity(values.len());
    values.iter().copied().filter(|v| seen.insert(*v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use node_api::{Address, InMemoryNode, Output, PoolConfig, TransactionId};

    fn setup() -> (Arc<InMemoryNode>, OutputResolver) {
        let node = Arc::new(InMemoryNode::new("node"));
        let pool = NodePool::new(
            vec![node.clone()],
            PoolConfig {
                transport_retries: 0,
                ..PoolConfig::default()
            },
        )
        .unwrap();
        (node, OutputResolver::new(Arc::new(pool), 4))
    }

    #[tokio::test]
    async fn test_caller_order_and_duplicates() {
        let (node, resolver) = setup();
        let ids: Vec<OutputId> = (1..=5)
            .map(|amount| node.insert_output(Output::basic(amount, Address::new([1; 32]))))
            .collect();

        let query = vec![ids[3], ids[0], ids[3], ids[4]];
        let amounts: Vec<u64> = resolver
            .get_outputs(&query)
            .await
            .unwrap()
            .iter()
            .map(|r| r.output.amount)
            .collect();
        assert_eq!(amounts, vec![4, 1, 5]);
    }

    #[tokio::test]
    async fn test_strict_and_lenient_failure_handling() {
        let (node, resolver) = setup();
        let known = node.insert_output(Output::basic(3, Address::new([1; 32])));
        let missing = OutputId::new(TransactionId::new([0xee; 32]), 1);

        let err = resolver.get_outputs(&[known, missing]).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains(&missing.to_string()));

        let found = resolver.try_get_outputs(&[known, missing]).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].output_id, known);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let (_, resolver) = setup();
        assert!(resolver.get_outputs(&[]).await.unwrap().is_empty());
        assert!(resolver.try_get_outputs(&[]).await.is_empty());
    }
}
