//! Multi-node pool with failover
//!
//! Reads are idempotent: each node is retried with exponential backoff on
//! transient failures, then the next node is tried. A resource is reported
//! missing only when every node said so. Writes go to the first node once
//! and surface transport failures immediately.

use crate::{
    client::NodeClient,
    config::PoolConfig,
    metrics::{record_request, NODE_FAILOVER_TOTAL},
    types::{
        Address, Block, BlockId, BlockMetadata, OutputFilter, OutputId, OutputPage,
        OutputResponse, TransactionId,
    },
    Error, Result,
};
use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Ordered set of nodes shared by every client component
pub struct NodePool {
    nodes: Vec<Arc<dyn NodeClient>>,
    config: PoolConfig,
}

impl std::fmt::Debug for NodePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodePool")
            .field("nodes", &self.nodes.iter().map(|n| n.name()).collect::<Vec<_>>())
            .field("config", &self.config)
            .finish()
    }
}

impl NodePool {
    /// Create new pool; the first node receives writes
    pub fn new(nodes: Vec<Arc<dyn NodeClient>>, config: PoolConfig) -> Result<Self> {
        if nodes.is_empty() {
            return Err(Error::NoNodes);
        }
        config.validate()?;

        info!(
            "Node pool created with {} node(s): {:?}",
            nodes.len(),
            nodes.iter().map(|n| n.name()).collect::<Vec<_>>()
        );

        Ok(Self { nodes, config })
    }

    /// Pool over a single node with default configuration
    pub fn single(node: Arc<dyn NodeClient>) -> Self {
        Self {
            nodes: vec![node],
            config: PoolConfig::default(),
        }
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false for a constructed pool
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in priority order
    pub fn nodes(&self) -> &[Arc<dyn NodeClient>] {
        &self.nodes
    }

    /// Configuration
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Run an idempotent read, starting the rotation at node `start`
    pub async fn read_from<T, F, Fut>(&self, start: usize, operation: &'static str, f: F) -> Result<T>
    where
        T: Send,
        F: Fn(Arc<dyn NodeClient>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T>> + Send,
    {
        let (_, value) = self.read_indexed(start, operation, f).await?;
        Ok(value)
    }

    /// Like [`NodePool::read_from`], also returning the index of the node that answered
    pub async fn read_indexed<T, F, Fut>(
        &self,
        start: usize,
        operation: &'static str,
        f: F,
    ) -> Result<(usize, T)>
    where
        T: Send,
        F: Fn(Arc<dyn NodeClient>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T>> + Send,
    {
        let count = self.nodes.len();
        let mut last_error: Option<Error> = None;
        let mut not_found: Option<Error> = None;

        for offset in 0..count {
            let index = (start + offset) % count;
            let node = self.nodes[index].clone();

            match self.read_with_retry(&node, operation, &f).await {
                Ok(value) => return Ok((index, value)),
                Err(e) if e.is_not_found() => {
                    debug!("{}: not found on node {}", operation, node.name());
                    not_found = Some(e);
                }
                Err(e) => {
                    warn!("{}: node {} failed: {}", operation, node.name(), e);
                    last_error = Some(e);
                }
            }

            if offset + 1 < count {
                NODE_FAILOVER_TOTAL.with_label_values(&[operation]).inc();
            }
        }

        Err(last_error.or(not_found).unwrap_or(Error::NoNodes))
    }

    /// Run an idempotent read on node `index` only, without failover
    ///
    /// For follow-up requests whose state (such as a pagination cursor)
    /// only the node that issued it understands.
    pub async fn read_on<T, F, Fut>(&self, index: usize, operation: &'static str, f: F) -> Result<T>
    where
        T: Send,
        F: Fn(Arc<dyn NodeClient>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T>> + Send,
    {
        let node = self.nodes[index % self.nodes.len()].clone();
        self.read_with_retry(&node, operation, &f).await
    }

    /// Run an idempotent read starting at the first node
    pub async fn read<T, F, Fut>(&self, operation: &'static str, f: F) -> Result<T>
    where
        T: Send,
        F: Fn(Arc<dyn NodeClient>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T>> + Send,
    {
        self.read_from(0, operation, f).await
    }

    /// Retry one node with exponential backoff while failures are transient
    async fn read_with_retry<T, F, Fut>(
        &self,
        node: &Arc<dyn NodeClient>,
        operation: &'static str,
        f: &F,
    ) -> Result<T>
    where
        T: Send,
        F: Fn(Arc<dyn NodeClient>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T>> + Send,
    {
        let max_attempts = self.config.transport_retries + 1;
        let timeout = self.config.request_timeout();
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.config.initial_retry_delay())
            .with_max_interval(self.config.max_retry_delay())
            .with_max_elapsed_time(None)
            .build();
        let mut attempts = 0u32;

        backoff::future::retry(policy, || {
            attempts += 1;
            let attempt = attempts;
            let name = node.name().to_string();
            let request = f(node.clone());

            async move {
                match timed(&name, operation, timeout, request).await {
                    Ok(value) => Ok(value),
                    Err(e) if e.is_transient() && attempt < max_attempts => {
                        debug!(
                            "{}: transient failure on node {} (attempt {}/{}): {}",
                            operation, name, attempt, max_attempts, e
                        );
                        Err(backoff::Error::transient(e))
                    }
                    Err(e) => Err(backoff::Error::permanent(e)),
                }
            }
        })
        .await
    }

    fn primary(&self) -> Result<&Arc<dyn NodeClient>> {
        self.nodes.first().ok_or(Error::NoNodes)
    }
}

/// Apply the request timeout and record metrics
async fn timed<T>(
    node: &str,
    operation: &str,
    timeout: Duration,
    request: impl Future<Output = Result<T>>,
) -> Result<T> {
    let start = Instant::now();
    let result = match tokio::time::timeout(timeout, request).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout {
            node: node.to_string(),
            millis: timeout.as_millis() as u64,
        }),
    };
    record_request(node, operation, result.is_ok(), start.elapsed().as_secs_f64());
    result
}

#[async_trait]
impl NodeClient for NodePool {
    fn name(&self) -> &str {
        "pool"
    }

    async fn get_tips(&self) -> Result<Vec<BlockId>> {
        self.read("get_tips", |node| async move { node.get_tips().await })
            .await
    }

    async fn submit_block(&self, block: &Block) -> Result<BlockId> {
        let node = self.primary()?;
        let block_id = timed(
            node.name(),
            "submit_block",
            self.config.request_timeout(),
            node.submit_block(block),
        )
        .await?;
        info!("Block {} submitted to node {}", block_id, node.name());
        Ok(block_id)
    }

    async fn get_block(&self, block_id: &BlockId) -> Result<Block> {
        let block_id = *block_id;
        self.read("get_block", move |node| async move {
            node.get_block(&block_id).await
        })
        .await
    }

    async fn get_block_metadata(&self, block_id: &BlockId) -> Result<BlockMetadata> {
        let block_id = *block_id;
        self.read("get_block_metadata", move |node| async move {
            node.get_block_metadata(&block_id).await
        })
        .await
    }

    async fn get_output(&self, output_id: &OutputId) -> Result<OutputResponse> {
        let output_id = *output_id;
        self.read("get_output", move |node| async move {
            node.get_output(&output_id).await
        })
        .await
    }

    async fn find_outputs_by_address(
        &self,
        address: &Address,
        filter: &OutputFilter,
        cursor: Option<String>,
    ) -> Result<OutputPage> {
        let address = *address;
        let filter = filter.clone();
        self.read("find_outputs_by_address", move |node| {
            let filter = filter.clone();
            let cursor = cursor.clone();
            async move { node.find_outputs_by_address(&address, &filter, cursor).await }
        })
        .await
    }

    async fn get_included_block(&self, transaction_id: &TransactionId) -> Result<Block> {
        let transaction_id = *transaction_id;
        self.read("get_included_block", move |node| async move {
            node.get_included_block(&transaction_id).await
        })
        .await
    }
}
