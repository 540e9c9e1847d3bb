//! Driving blocks to confirmation
//!
//! A submitted block may lag behind the rest of the DAG. The node says so
//! through the `should_promote` / `should_reattach` hints of its metadata:
//!
//! - **promotion** attaches an empty block referencing the lagging block and
//!   fresh tips, so new milestones pick it up;
//! - **reattachment** resubmits the same payload on fresh tips under a new
//!   block id.
//!
//! Guarded operations (`retry`, `reattach`, `promote`) read the metadata and
//! refuse to write when the action is not warranted. The `_unchecked`
//! variants write unconditionally.

use crate::config::RetryConfig;
use crate::metrics::{INCLUSION_ATTEMPTS, RETRY_ACTIONS_TOTAL};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use node_api::types::BLOCK_PARENTS_MAX;
use node_api::{Block, BlockId, BlockMetadata, NodeClient, NodePool};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Lifecycle of a block followed by [`ConfirmationDriver::retry_until_included`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfirmationState {
    /// Handed over, not polled yet
    Submitted,
    /// Polled at least once, not included
    Retrying,
    /// One attachment was included
    Included,
    /// Attempts exhausted
    Exhausted,
    /// Aborted by an error or cancellation
    Failed,
}

/// Block being driven to confirmation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingBlock {
    /// Block the caller submitted
    pub original: BlockId,
    /// Most recent attachment of its payload
    pub latest: BlockId,
    /// When tracking started
    pub submitted_at: DateTime<Utc>,
    /// Attempts made so far
    pub attempts: u32,
    /// Current state
    pub state: ConfirmationState,
}

impl PendingBlock {
    fn new(block_id: BlockId) -> Self {
        Self {
            original: block_id,
            latest: block_id,
            submitted_at: Utc::now(),
            attempts: 0,
            state: ConfirmationState::Submitted,
        }
    }

    fn transition(&mut self, state: ConfirmationState) {
        if self.state != state {
            debug!("Block {}: {:?} -> {:?}", self.original, self.state, state);
            self.state = state;
        }
    }
}

/// What one attempt of the confirmation loop did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptAction {
    /// Nothing to do yet
    Waited,
    /// Promotion block submitted
    Promoted {
        /// Id of the promotion block
        promotion: BlockId,
    },
    /// Payload reattached
    Reattached {
        /// Id of the new attachment
        attachment: BlockId,
    },
    /// An attachment was found included
    Included {
        /// Id of the included block
        included: BlockId,
    },
}

/// Record of one attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// Attempt number, starting at 1
    pub attempt: u32,
    /// Latest attachment when the attempt ran
    pub block_id: BlockId,
    /// Action taken
    pub action: AttemptAction,
    /// When the attempt ran
    pub at: DateTime<Utc>,
}

/// Result of a guarded retry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetryOutcome {
    /// Block promoted; its id is unchanged
    Promoted {
        /// Promotion block id
        block_id: BlockId,
        /// Promotion block
        block: Block,
    },
    /// Payload reattached under a new id
    Reattached {
        /// New attachment id
        block_id: BlockId,
        /// New attachment
        block: Block,
    },
}

impl RetryOutcome {
    /// Id of the block written
    pub fn block_id(&self) -> BlockId {
        match self {
            RetryOutcome::Promoted { block_id, .. } | RetryOutcome::Reattached { block_id, .. } => {
                *block_id
            }
        }
    }

    /// Block written
    pub fn block(&self) -> &Block {
        match self {
            RetryOutcome::Promoted { block, .. } | RetryOutcome::Reattached { block, .. } => block,
        }
    }
}

/// Successful end of the confirmation loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inclusion {
    /// Block that got included
    pub included: (BlockId, Block),
    /// Every reattachment issued, in order
    pub reattached: Vec<(BlockId, Block)>,
    /// One record per attempt
    pub attempts: Vec<AttemptRecord>,
    /// Final tracking state
    pub pending: PendingBlock,
}

/// Promotes, reattaches and polls blocks until a milestone includes them
#[derive(Debug, Clone)]
pub struct ConfirmationDriver {
    pool: Arc<NodePool>,
    config: RetryConfig,
}

impl ConfirmationDriver {
    /// Create new driver
    pub fn new(pool: Arc<NodePool>, config: RetryConfig) -> Self {
        Self { pool, config }
    }

    /// Promote or reattach `block_id` if the node says it is lagging
    pub async fn retry(&self, block_id: &BlockId) -> Result<RetryOutcome> {
        let metadata = self.pool.get_block_metadata(block_id).await?;

        if metadata.is_included() {
            return Err(Error::AlreadyIncluded {
                block_id: *block_id,
            });
        }
        if metadata.is_conflicting() {
            return Err(Error::NotReattachable {
                block_id: *block_id,
                reason: "block is conflicting".to_string(),
            });
        }
        if metadata.is_promotable() {
            let (block_id, block) = self.promote_unchecked(block_id).await?;
            return Ok(RetryOutcome::Promoted { block_id, block });
        }
        if metadata.is_reattachable() {
            let (block_id, block) = self.reattach_unchecked(block_id).await?;
            return Ok(RetryOutcome::Reattached { block_id, block });
        }

        Err(Error::NotPromotable {
            block_id: *block_id,
            reason: "block is not lagging behind".to_string(),
        })
    }

    /// Reattach `block_id` if the node flags it for reattachment
    pub async fn reattach(&self, block_id: &BlockId) -> Result<(BlockId, Block)> {
        let metadata = self.pool.get_block_metadata(block_id).await?;

        let reason = if metadata.is_included() {
            Some("block is already included")
        } else if metadata.is_conflicting() {
            Some("block is conflicting")
        } else if !metadata.is_reattachable() {
            Some("node does not suggest a reattachment")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(Error::NotReattachable {
                block_id: *block_id,
                reason: reason.to_string(),
            }),
            None => self.reattach_unchecked(block_id).await,
        }
    }

    /// Resubmit the payload of `block_id` on fresh tips
    pub async fn reattach_unchecked(&self, block_id: &BlockId) -> Result<(BlockId, Block)> {
        let original = self.pool.get_block(block_id).await?;
        let mut tips = self.pool.get_tips().await?;
        tips.truncate(BLOCK_PARENTS_MAX);

        let block = Block::new(tips, original.payload);
        let new_id = self.pool.submit_block(&block).await?;
        RETRY_ACTIONS_TOTAL.with_label_values(&["reattach"]).inc();

        info!("Reattached block {} as {}", block_id, new_id);
        Ok((new_id, block))
    }

    /// Promote `block_id` if the node suggests it
    pub async fn promote(&self, block_id: &BlockId) -> Result<(BlockId, Block)> {
        let metadata = self.pool.get_block_metadata(block_id).await?;

        if metadata.is_included() {
            return Err(Error::AlreadyIncluded {
                block_id: *block_id,
            });
        }
        if metadata.is_conflicting() {
            return Err(Error::NotPromotable {
                block_id: *block_id,
                reason: "block is conflicting".to_string(),
            });
        }
        if !metadata.is_promotable() {
            return Err(Error::PromotionUnnecessary {
                block_id: *block_id,
            });
        }

        self.promote_unchecked(block_id).await
    }

    /// Submit an empty block referencing `block_id` and fresh tips
    pub async fn promote_unchecked(&self, block_id: &BlockId) -> Result<(BlockId, Block)> {
        let mut parents = self.pool.get_tips().await?;
        parents.retain(|tip| tip != block_id);
        parents.truncate(BLOCK_PARENTS_MAX - 1);
        parents.push(*block_id);

        let block = Block::new(parents, None);
        let promotion_id = self.pool.submit_block(&block).await?;
        RETRY_ACTIONS_TOTAL.with_label_values(&["promote"]).inc();

        info!("Promoted block {} with {}", block_id, promotion_id);
        Ok((promotion_id, block))
    }

    /// Poll, promote and reattach until one attachment is included
    ///
    /// `interval` and `max_attempts` default to the configured values.
    pub async fn retry_until_included(
        &self,
        block_id: &BlockId,
        interval: Option<Duration>,
        max_attempts: Option<u32>,
        cancel: &CancellationToken,
    ) -> Result<Inclusion> {
        let interval = interval.unwrap_or_else(|| self.config.interval());
        let max_attempts = max_attempts.unwrap_or(self.config.max_attempts);

        let mut pending = PendingBlock::new(*block_id);
        let mut attachments = vec![*block_id];
        let mut reattached: Vec<(BlockId, Block)> = Vec::new();
        let mut records = Vec::new();

        let result = self
            .drive(
                &mut pending,
                &mut attachments,
                &mut reattached,
                &mut records,
                interval,
                max_attempts,
                cancel,
            )
            .await;
        INCLUSION_ATTEMPTS.observe(f64::from(pending.attempts));

        match result {
            Ok(Some(included)) => {
                pending.transition(ConfirmationState::Included);
                info!(
                    "Block {} included as {} after {} attempt(s)",
                    block_id, included.0, pending.attempts
                );
                Ok(Inclusion {
                    included,
                    reattached,
                    attempts: records,
                    pending,
                })
            }
            Ok(None) => {
                pending.transition(ConfirmationState::Exhausted);
                warn!(
                    "Block {} not included after {} attempt(s)",
                    block_id, max_attempts
                );
                Err(Error::NotIncluded {
                    block_id: *block_id,
                    attempts: records,
                })
            }
            Err(DriveError::Cancelled) => {
                pending.transition(ConfirmationState::Failed);
                info!("Confirmation of block {} cancelled", block_id);
                Err(Error::Cancelled {
                    block_id: *block_id,
                    attempts: records,
                })
            }
            Err(DriveError::Failed(e)) => {
                pending.transition(ConfirmationState::Failed);
                error!("Confirmation of block {} aborted: {}", block_id, e);
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn drive(
        &self,
        pending: &mut PendingBlock,
        attachments: &mut Vec<BlockId>,
        reattached: &mut Vec<(BlockId, Block)>,
        records: &mut Vec<AttemptRecord>,
        interval: Duration,
        max_attempts: u32,
        cancel: &CancellationToken,
    ) -> std::result::Result<Option<(BlockId, Block)>, DriveError> {
        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return Err(DriveError::Cancelled);
            }
            pending.attempts = attempt;
            pending.transition(ConfirmationState::Retrying);

            let mut conflicting = false;
            let mut latest_metadata: Option<BlockMetadata> = None;

            for attachment in attachments.iter() {
                let metadata = self.pool.get_block_metadata(attachment).await?;
                debug!(
                    "Attempt {}: block {} inclusion {:?}",
                    attempt, attachment, metadata.ledger_inclusion_state
                );

                if metadata.is_included() {
                    let included = self.attachment_block(attachment, reattached.as_slice()).await?;
                    let action = AttemptAction::Included {
                        included: *attachment,
                    };
                    records.push(record(attempt, pending.latest, action));
                    return Ok(Some(included));
                }
                conflicting |= metadata.is_conflicting();
                latest_metadata = Some(metadata);
            }

            // Another attachment of the same transaction may have won
            if conflicting {
                let original = self.pool.get_block(&pending.original).await?;
                if let Some(transaction) = original.transaction() {
                    let included = self.pool.get_included_block(&transaction.id()).await?;
                    let included_id = included.id();
                    let action = AttemptAction::Included {
                        included: included_id,
                    };
                    records.push(record(attempt, pending.latest, action));
                    return Ok(Some((included_id, included)));
                }
            }

            let action = match latest_metadata {
                Some(metadata) if !metadata.is_referenced() && metadata.is_promotable() => {
                    let (promotion, _) = self.promote_unchecked(&pending.latest).await?;
                    AttemptAction::Promoted { promotion }
                }
                Some(metadata) if !metadata.is_referenced() && metadata.is_reattachable() => {
                    let (attachment, block) = self.reattach_unchecked(&pending.latest).await?;
                    attachments.push(attachment);
                    reattached.push((attachment, block));
                    AttemptAction::Reattached { attachment }
                }
                _ => AttemptAction::Waited,
            };
            records.push(record(attempt, pending.latest, action.clone()));
            if let AttemptAction::Reattached { attachment } = action {
                pending.latest = attachment;
            }

            if attempt < max_attempts {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(DriveError::Cancelled),
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        }

        Ok(None)
    }

    /// Block of an attachment, fetched only for the original
    async fn attachment_block(
        &self,
        block_id: &BlockId,
        reattached: &[(BlockId, Block)],
    ) -> Result<(BlockId, Block)> {
        match reattached.iter().find(|(id, _)| id == block_id) {
            Some(found) => Ok(found.clone()),
            None => Ok((*block_id, self.pool.get_block(block_id).await?)),
        }
    }
}

enum DriveError {
    Cancelled,
    Failed(Error),
}

impl From<Error> for DriveError {
    fn from(e: Error) -> Self {
        DriveError::Failed(e)
    }
}

impl From<node_api::Error> for DriveError {
    fn from(e: node_api::Error) -> Self {
        DriveError::Failed(e.into())
    }
}

fn record(attempt: u32, block_id: BlockId, action: AttemptAction) -> AttemptRecord {
    AttemptRecord {
        attempt,
        block_id,
        action,
        at: Utc::now(),
    }
}
