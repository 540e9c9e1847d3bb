//! Multi-address output search spread over the node pool

use crate::error::QueryFailure;
use crate::resolver::dedup_ordered;
use crate::{Error, Result};
use futures::stream::{self, StreamExt};
use node_api::{Address, NodePool, OutputFilter, OutputPage, OutputResponse};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Finds the unspent outputs of a set of addresses
#[derive(Debug, Clone)]
pub struct OutputSearcher {
    pool: Arc<NodePool>,
    concurrency: usize,
    max_pages: usize,
}

impl OutputSearcher {
    /// Create new searcher
    pub fn new(pool: Arc<NodePool>, concurrency: usize, max_pages: usize) -> Self {
        Self {
            pool,
            concurrency: concurrency.max(1),
            max_pages: max_pages.max(1),
        }
    }

    /// Outputs of `addresses` matching `filter`, merged in address order
    ///
    /// Sub-query `i` starts on node `i mod n`. When some sub-queries fail
    /// and others succeed the call fails with [`Error::PartialResult`]
    /// carrying both sides.
    pub async fn find_outputs(
        &self,
        filter: &OutputFilter,
        addresses: &[Address],
    ) -> Result<Vec<OutputResponse>> {
        let distinct = dedup_ordered(addresses);
        if distinct.is_empty() {
            return Ok(Vec::new());
        }

        let results: Vec<(Address, Result<Vec<OutputResponse>>)> = stream::iter(
            distinct.into_iter().enumerate(),
        )
        .map(|(index, address)| async move {
            (address, self.query_address(index, address, filter).await)
        })
        .buffered(self.concurrency)
        .collect()
        .await;

        let mut found = Vec::new();
        let mut seen = HashSet::new();
        let mut failures = Vec::new();
        let mut first_error = None;
        let mut succeeded = 0usize;

        for (address, result) in results {
            match result {
                Ok(outputs) => {
                    succeeded += 1;
                    found.extend(outputs.into_iter().filter(|r| seen.insert(r.output_id)));
                }
                Err(e) => {
                    warn!("Output query for {} failed: {}", address, e);
                    failures.push(QueryFailure {
                        address,
                        message: e.to_string(),
                    });
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            None => Ok(found),
            Some(e) if succeeded == 0 => Err(e),
            Some(_) => Err(Error::PartialResult { found, failures }),
        }
    }

    /// Follow the cursor of one address until exhausted
    ///
    /// Cursors are only meaningful to the node that issued them, so every
    /// page after the first goes to that node. If it fails mid-way the
    /// query starts over from the first page on the next node.
    async fn query_address(
        &self,
        index: usize,
        address: Address,
        filter: &OutputFilter,
    ) -> Result<Vec<OutputResponse>> {
        let mut start = index % self.pool.len();

        for restart in 0..self.pool.len() {
            match self.query_pinned(start, address, filter).await {
                Ok(outputs) => return Ok(outputs),
                Err((Some(node), e)) if restart + 1 < self.pool.len() => {
                    warn!(
                        "Paging outputs of {} on node {} failed, starting over: {}",
                        address, node, e
                    );
                    start = node + 1;
                }
                Err((_, e)) => return Err(e),
            }
        }

        Err(Error::Node(node_api::Error::NoNodes))
    }

    /// Fetch every page of `address`, pinned to the node serving page 0
    ///
    /// The error carries the pinned node when a later page failed there.
    async fn query_pinned(
        &self,
        start: usize,
        address: Address,
        filter: &OutputFilter,
    ) -> std::result::Result<Vec<OutputResponse>, (Option<usize>, Error)> {
        let first = self
            .pool
            .read_indexed(start, "find_outputs_by_address", |node| {
                let filter = filter.clone();
                async move { node.find_outputs_by_address(&address, &filter, None).await }
            })
            .await;
        let (node, mut response): (usize, OutputPage) = match first {
            Ok(first) => first,
            Err(e) => return Err((None, e.into())),
        };
        let mut outputs = Vec::new();

        for page in 1..=self.max_pages {
            debug!(
                "Address {} page {} from node {}: {} output(s)",
                address,
                page - 1,
                node,
                response.items.len()
            );
            outputs.extend(response.items);

            let cursor = match response.cursor {
                Some(cursor) => cursor,
                None => return Ok(outputs),
            };
            if page == self.max_pages {
                break;
            }

            let next = self
                .pool
                .read_on(node, "find_outputs_by_address", |client| {
                    let filter = filter.clone();
                    let cursor = cursor.clone();
                    async move {
                        client
                            .find_outputs_by_address(&address, &filter, Some(cursor))
                            .await
                    }
                })
                .await;
            response = match next {
                Ok(next) => next,
                Err(e) => return Err((Some(node), e.into())),
            };
        }

        warn!(
            "Address {} has more than {} page(s) of outputs",
            address, self.max_pages
        );
        Err((
            None,
            Error::PageLimitExceeded {
                address,
                pages: self.max_pages,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use node_api::{InMemoryNode, NodeClient, Output, PoolConfig};

    fn address(seed: u8) -> Address {
        Address::new([seed; 32])
    }

    fn pool(nodes: &[Arc<InMemoryNode>]) -> Arc<NodePool> {
        let nodes = nodes
            .iter()
            .map(|n| n.clone() as Arc<dyn NodeClient>)
            .collect();
        let config = PoolConfig {
            transport_retries: 0,
            ..PoolConfig::default()
        };
        Arc::new(NodePool::new(nodes, config).unwrap())
    }

    #[tokio::test]
    async fn test_follows_cursors_and_merges_in_address_order() {
        let node = Arc::new(InMemoryNode::new("node"));
        node.set_page_size(2);
        for amount in 1..=5 {
            node.insert_output(Output::basic(amount, address(1)));
        }
        node.insert_output(Output::basic(100, address(2)));

        let searcher = OutputSearcher::new(pool(&[node]), 4, 10);
        let outputs = searcher
            .find_outputs(&OutputFilter::basic(), &[address(2), address(1), address(2)])
            .await
            .unwrap();

        assert_eq!(outputs.len(), 6);
        assert_eq!(outputs[0].output.amount, 100);
    }

    #[tokio::test]
    async fn test_sub_queries_spread_over_nodes() {
        let a = Arc::new(InMemoryNode::new("a"));
        let b = Arc::new(InMemoryNode::new("b"));
        for node in [&a, &b] {
            node.insert_output(Output::basic(1, address(1)));
            node.insert_output(Output::basic(2, address(2)));
        }

        let searcher = OutputSearcher::new(pool(&[a.clone(), b.clone()]), 2, 10);
        let outputs = searcher
            .find_outputs(&OutputFilter::basic(), &[address(1), address(2)])
            .await
            .unwrap();

        assert_eq!(outputs.len(), 2);
        assert_eq!(a.request_count(), 1);
        assert_eq!(b.request_count(), 1);
    }

    #[tokio::test]
    async fn test_partial_and_total_failure() {
        let node = Arc::new(InMemoryNode::new("node"));
        node.insert_output(Output::basic(5, address(1)));
        node.fail_address(address(2));
        let searcher = OutputSearcher::new(pool(&[node.clone()]), 4, 10);

        match searcher
            .find_outputs(&OutputFilter::basic(), &[address(1), address(2)])
            .await
        {
            Err(Error::PartialResult { found, failures }) => {
                assert_eq!(found.len(), 1);
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].address, address(2));
            }
            other => panic!("expected partial result, got {:?}", other),
        }

        node.fail_address(address(1));
        let err = searcher
            .find_outputs(&OutputFilter::basic(), &[address(1), address(2)])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Node(_)));
    }

    #[tokio::test]
    async fn test_no_addresses() {
        let node = Arc::new(InMemoryNode::new("node"));
        let searcher = OutputSearcher::new(pool(&[node.clone()]), 4, 10);
        assert!(searcher
            .find_outputs(&OutputFilter::basic(), &[])
            .await
            .unwrap()
            .is_empty());
        assert_eq!(node.request_count(), 0);
    }

    #[tokio::test]
    async fn test_page_limit_is_an_error() {
        let node = Arc::new(InMemoryNode::new("node"));
        node.set_page_size(2);
        for _ in 0..5 {
            node.insert_output(Output::basic(1, address(1)));
        }

        let searcher = OutputSearcher::new(pool(&[node.clone()]), 4, 2);
        let err = searcher
            .find_outputs(&OutputFilter::basic(), &[address(1)])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::PageLimitExceeded { address: a, pages: 2 } if a == address(1)
        ));
        assert_eq!(node.request_count(), 2);

        // Exactly filling the last allowed page is fine
        let searcher = OutputSearcher::new(pool(&[node]), 4, 3);
        let outputs = searcher
            .find_outputs(&OutputFilter::basic(), &[address(1)])
            .await
            .unwrap();
        assert_eq!(outputs.len(), 5);
    }

    #[tokio::test]
    async fn test_page_limit_on_one_address_is_partial() {
        let node = Arc::new(InMemoryNode::new("node"));
        node.set_page_size(1);
        node.insert_output(Output::basic(1, address(1)));
        node.insert_output(Output::basic(2, address(1)));
        node.insert_output(Output::basic(3, address(2)));

        let searcher = OutputSearcher::new(pool(&[node]), 4, 1);
        match searcher
            .find_outputs(&OutputFilter::basic(), &[address(1), address(2)])
            .await
        {
            Err(Error::PartialResult { found, failures }) => {
                assert_eq!(found.len(), 1);
                assert_eq!(failures[0].address, address(1));
            }
            other => panic!("expected partial result, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cursor_never_replayed_on_another_node() {
        let first = Arc::new(InMemoryNode::new("first"));
        let second = Arc::new(InMemoryNode::new("second"));
        first.set_page_size(2);
        second.set_page_size(2);
        for amount in 1..=5 {
            first.insert_output(Output::basic(amount, address(1)));
        }
        for amount in 10..13 {
            second.insert_output(Output::basic(amount, address(1)));
        }
        first.fail_after_requests(1);

        let searcher = OutputSearcher::new(pool(&[first, second]), 4, 10);
        let outputs = searcher
            .find_outputs(&OutputFilter::basic(), &[address(1)])
            .await
            .unwrap();

        let mut amounts: Vec<u64> = outputs.iter().map(|r| r.output.amount).collect();
        amounts.sort_unstable();
        assert_eq!(amounts, vec![10, 11, 12]);
    }
}
