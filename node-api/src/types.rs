//! Core types shared between the node interface and the client engine
//!
//! Identifiers are 32-byte hashes rendered as `0x`-prefixed hex. Blocks and
//! transaction payloads are hashed over their bincode encoding, so every
//! node and every client derives the same ids for the same content.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Length of every hash identifier
pub const ID_LENGTH: usize = 32;

/// Maximum number of parents a block may reference
pub const BLOCK_PARENTS_MAX: usize = 8;

/// Protocol version stamped on blocks built by the client
pub const PROTOCOL_VERSION: u8 = 2;

/// Maximum number of inputs a transaction may consume
pub const INPUT_COUNT_MAX: usize = 128;

macro_rules! hash_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name([u8; ID_LENGTH]);

        impl $name {
            /// Wrap raw bytes
            pub const fn new(bytes: [u8; ID_LENGTH]) -> Self {
                Self(bytes)
            }

            /// Raw bytes
            pub fn as_bytes(&self) -> &[u8; ID_LENGTH] {
                &self.0
            }

            /// BLAKE3 hash of `data`
            pub fn hash_of(data: &[u8]) -> Self {
                Self(*blake3::hash(data).as_bytes())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                let raw = s.strip_prefix("0x").unwrap_or(s);
                let bytes = hex::decode(raw).map_err(|e| {
                    Error::InvalidId(format!("{} '{}': {}", stringify!($name), s, e))
                })?;
                let bytes: [u8; ID_LENGTH] = bytes.try_into().map_err(|v: Vec<u8>| {
                    Error::InvalidId(format!(
                        "{} '{}': expected {} bytes, got {}",
                        stringify!($name),
                        s,
                        ID_LENGTH,
                        v.len()
                    ))
                })?;
                Ok(Self(bytes))
            }
        }
    };
}

hash_id!(
    /// Identifier of a block, assigned when the block is built
    BlockId
);

hash_id!(
    /// Identifier of a transaction payload
    TransactionId
);

hash_id!(
    /// Ed25519 address: BLAKE3 hash of the public key
    Address
);

impl Address {
    /// Address controlled by an Ed25519 public key
    pub fn from_public_key(public_key: &[u8; ID_LENGTH]) -> Self {
        Self::hash_of(public_key)
    }
}

/// Reference to one output of a transaction
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutputId {
    /// Transaction that created the output
    pub transaction_id: TransactionId,
    /// Position in the transaction's outputs
    pub index: u16,
}

impl OutputId {
    /// Create new output id
    pub fn new(transaction_id: TransactionId, index: u16) -> Self {
        Self {
            transaction_id,
            index,
        }
    }
}

impl fmt::Display for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.transaction_id, self.index)
    }
}

impl fmt::Debug for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OutputId({})", self)
    }
}

impl FromStr for OutputId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (tx, index) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::InvalidId(format!("OutputId '{}': missing index", s)))?;
        let index = index
            .parse::<u16>()
            .map_err(|e| Error::InvalidId(format!("OutputId '{}': {}", s, e)))?;
        Ok(Self::new(tx.parse()?, index))
    }
}

/// Condition that must hold for an output to be unlocked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnlockCondition {
    /// Owner of the output
    Address(Address),
    /// Ownership moves to `return_address` after `timestamp`
    Expiration {
        /// Address that may unlock after expiry
        return_address: Address,
        /// Unix timestamp (seconds)
        timestamp: u32,
    },
    /// Output cannot be spent before `timestamp`
    Timelock {
        /// Unix timestamp (seconds)
        timestamp: u32,
    },
    /// Spending transaction must return `amount` to `return_address`
    StorageDepositReturn {
        /// Address receiving the deposit back
        return_address: Address,
        /// Amount to return
        amount: u64,
    },
}

/// Optional output feature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Feature {
    /// Verified sender
    Sender(Address),
    /// Arbitrary metadata
    Metadata(Vec<u8>),
    /// Indexation tag
    Tag(Vec<u8>),
}

/// Transaction output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    /// Amount in the ledger's base unit
    pub amount: u64,
    /// Unlock conditions
    pub unlock_conditions: Vec<UnlockCondition>,
    /// Features
    #[serde(default)]
    pub features: Vec<Feature>,
}

impl Output {
    /// Plain output owned by `address`
    pub fn basic(amount: u64, address: Address) -> Self {
        Self {
            amount,
            unlock_conditions: vec![UnlockCondition::Address(address)],
            features: Vec::new(),
        }
    }

    /// Add an unlock condition
    pub fn with_unlock_condition(mut self, condition: UnlockCondition) -> Self {
        self.unlock_conditions.push(condition);
        self
    }

    /// Add a feature
    pub fn with_feature(mut self, feature: Feature) -> Self {
        self.features.push(feature);
        self
    }

    /// Owning address
    pub fn address(&self) -> Option<&Address> {
        self.unlock_conditions.iter().find_map(|c| match c {
            UnlockCondition::Address(address) => Some(address),
            _ => None,
        })
    }

    /// Has an expiration condition
    pub fn has_expiration(&self) -> bool {
        self.unlock_conditions
            .iter()
            .any(|c| matches!(c, UnlockCondition::Expiration { .. }))
    }

    /// Has a timelock condition
    pub fn has_timelock(&self) -> bool {
        self.unlock_conditions
            .iter()
            .any(|c| matches!(c, UnlockCondition::Timelock { .. }))
    }

    /// Has a storage deposit return condition
    pub fn has_storage_deposit_return(&self) -> bool {
        self.unlock_conditions
            .iter()
            .any(|c| matches!(c, UnlockCondition::StorageDepositReturn { .. }))
    }
}

/// Ledger bookkeeping attached to an output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputMetadata {
    /// Block whose transaction created the output
    pub block_id: BlockId,
    /// Whether a confirmed transaction consumed the output
    pub is_spent: bool,
    /// Milestone that booked the output
    pub milestone_index_booked: u32,
}

/// Output together with its id and metadata, as returned by a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputResponse {
    /// Output id
    pub output_id: OutputId,
    /// Output data
    pub output: Output,
    /// Metadata
    pub metadata: OutputMetadata,
}

/// Criteria for an address output query
///
/// `None` means "don't care"; `Some(flag)` requires the condition to be
/// present (`true`) or absent (`false`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFilter {
    /// Expiration unlock condition
    pub has_expiration: Option<bool>,
    /// Timelock unlock condition
    pub has_timelock: Option<bool>,
    /// Storage deposit return unlock condition
    pub has_storage_deposit_return: Option<bool>,
}

impl OutputFilter {
    /// Outputs the owning address can unlock without further constraints
    pub fn basic() -> Self {
        Self {
            has_expiration: Some(false),
            has_timelock: Some(false),
            has_storage_deposit_return: Some(false),
        }
    }

    /// Check an output against the filter
    pub fn matches(&self, output: &Output) -> bool {
        fn check(expected: Option<bool>, actual: bool) -> bool {
            expected.map_or(true, |e| e == actual)
        }

        check(self.has_expiration, output.has_expiration())
            && check(self.has_timelock, output.has_timelock())
            && check(
                self.has_storage_deposit_return,
                output.has_storage_deposit_return(),
            )
    }
}

/// One page of an address output query
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputPage {
    /// Matching unspent outputs
    pub items: Vec<OutputResponse>,
    /// Cursor for the next page, `None` on the last page
    pub cursor: Option<String>,
}

/// Proof that an input may be consumed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Unlock {
    /// Ed25519 signature over the essence hash
    Signature {
        /// Public key of the signer
        public_key: [u8; ID_LENGTH],
        /// 64-byte signature
        signature: Vec<u8>,
    },
    /// Same signature as the unlock at this position
    Reference(u16),
}

/// The signed part of a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionEssence {
    /// Network the transaction is valid on
    pub network_id: u64,
    /// Consumed outputs
    pub inputs: Vec<OutputId>,
    /// Created outputs
    pub outputs: Vec<Output>,
}

impl TransactionEssence {
    /// Hash that signers commit to
    pub fn hash(&self) -> [u8; ID_LENGTH] {
        let bytes = bincode::serialize(self).expect("serialization cannot fail");
        *blake3::hash(&bytes).as_bytes()
    }

    /// Sum of created output amounts, `None` on overflow
    pub fn output_amount(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |total, o| total.checked_add(o.amount))
    }
}

/// Transaction payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionPayload {
    /// Signed essence
    pub essence: TransactionEssence,
    /// One unlock per input
    pub unlocks: Vec<Unlock>,
}

impl TransactionPayload {
    /// Transaction id
    pub fn id(&self) -> TransactionId {
        let bytes = bincode::serialize(self).expect("serialization cannot fail");
        TransactionId::hash_of(&bytes)
    }
}

/// Tagged data payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedDataPayload {
    /// Tag
    pub tag: Vec<u8>,
    /// Data
    pub data: Vec<u8>,
}

/// Block payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    /// Value transfer
    Transaction(Box<TransactionPayload>),
    /// Data only
    TaggedData(TaggedDataPayload),
}

/// Block: the network-level container submitted to the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Protocol version
    pub protocol_version: u8,
    /// Referenced blocks, sorted and unique
    pub parents: Vec<BlockId>,
    /// Optional payload
    pub payload: Option<Payload>,
    /// Proof-of-work nonce
    pub nonce: u64,
}

impl Block {
    /// Build a block on `parents` (sorted and deduplicated)
    pub fn new(mut parents: Vec<BlockId>, payload: Option<Payload>) -> Self {
        parents.sort_unstable();
        parents.dedup();
        Self {
            protocol_version: PROTOCOL_VERSION,
            parents,
            payload,
            nonce: 0,
        }
    }

    /// Deterministic encoding the id is derived from
    pub fn canonical_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).expect("serialization cannot fail")
    }

    /// Block id
    pub fn id(&self) -> BlockId {
        BlockId::hash_of(&self.canonical_bytes())
    }

    /// Transaction payload, if any
    pub fn transaction(&self) -> Option<&TransactionPayload> {
        match &self.payload {
            Some(Payload::Transaction(tx)) => Some(tx),
            _ => None,
        }
    }
}

/// Ledger verdict on a referenced block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LedgerInclusionState {
    /// Transaction applied to the ledger
    Included,
    /// Transaction rejected (double spend, invalid unlock...)
    Conflicting,
    /// Referenced block without a transaction
    NoTransaction,
}

/// Node's view of a block's confirmation status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMetadata {
    /// Block id
    pub block_id: BlockId,
    /// Parents of the block
    pub parents: Vec<BlockId>,
    /// Milestone that referenced the block
    pub referenced_by_milestone_index: Option<u32>,
    /// Set once a milestone referenced the block
    pub ledger_inclusion_state: Option<LedgerInclusionState>,
    /// Node suggests promoting the block
    pub should_promote: Option<bool>,
    /// Node suggests reattaching the block's payload
    pub should_reattach: Option<bool>,
}

impl BlockMetadata {
    /// Metadata of a block nothing has referenced yet
    pub fn pending(block_id: BlockId, parents: Vec<BlockId>) -> Self {
        Self {
            block_id,
            parents,
            referenced_by_milestone_index: None,
            ledger_inclusion_state: None,
            should_promote: None,
            should_reattach: None,
        }
    }

    /// Referenced by a milestone, whatever the verdict
    pub fn is_referenced(&self) -> bool {
        self.referenced_by_milestone_index.is_some()
    }

    /// Referenced and accepted by the ledger
    pub fn is_included(&self) -> bool {
        matches!(
            self.ledger_inclusion_state,
            Some(LedgerInclusionState::Included | LedgerInclusionState::NoTransaction)
        )
    }

    /// Referenced and rejected by the ledger
    pub fn is_conflicting(&self) -> bool {
        self.ledger_inclusion_state == Some(LedgerInclusionState::Conflicting)
    }

    /// Node hints that a promotion would help
    pub fn is_promotable(&self) -> bool {
        self.should_promote.unwrap_or(false)
    }

    /// Node hints that the payload should be reattached
    pub fn is_reattachable(&self) -> bool {
        self.should_reattach.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address(seed: u8) -> Address {
        Address::new([seed; ID_LENGTH])
    }

    #[test]
    fn test_id_display_roundtrip() {
        let id = BlockId::hash_of(b"block");
        let parsed: BlockId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!(id.to_string().starts_with("0x"));

        let output_id = OutputId::new(TransactionId::hash_of(b"tx"), 3);
        let parsed: OutputId = output_id.to_string().parse().unwrap();
        assert_eq!(parsed, output_id);
    }

    #[test]
    fn test_invalid_ids_rejected() {
        assert!("0x1234".parse::<BlockId>().is_err());
        assert!("not-hex".parse::<Address>().is_err());
        assert!("0x00".parse::<OutputId>().is_err());
    }

    #[test]
    fn test_output_id_ordering() {
        let tx = TransactionId::new([1; ID_LENGTH]);
        let later_tx = TransactionId::new([2; ID_LENGTH]);
        assert!(OutputId::new(tx, 0) < OutputId::new(tx, 1));
        assert!(OutputId::new(tx, 9) < OutputId::new(later_tx, 0));
    }

    #[test]
    fn test_basic_filter() {
        let plain = Output::basic(10, address(1));
        assert!(OutputFilter::basic().matches(&plain));
        assert_eq!(plain.address(), Some(&address(1)));

        let timelocked = plain
            .clone()
            .with_unlock_condition(UnlockCondition::Timelock { timestamp: 10 });
        assert!(!OutputFilter::basic().matches(&timelocked));
        assert!(OutputFilter::default().matches(&timelocked));

        let sdr = plain.with_unlock_condition(UnlockCondition::StorageDepositReturn {
            return_address: address(2),
            amount: 5,
        });
        let filter = OutputFilter {
            has_storage_deposit_return: Some(true),
            ..Default::default()
        };
        assert!(filter.matches(&sdr));
        assert!(!OutputFilter::basic().matches(&sdr));
    }

    #[test]
    fn test_output_amount_overflow() {
        let essence = TransactionEssence {
            network_id: 1,
            inputs: Vec::new(),
            outputs: vec![Output::basic(u64::MAX, address(1)), Output::basic(1, address(2))],
        };
        assert_eq!(essence.output_amount(), None);

        let essence = TransactionEssence {
            outputs: vec![Output::basic(3, address(1)), Output::basic(4, address(2))],
            ..essence
        };
        assert_eq!(essence.output_amount(), Some(7));
    }

    #[test]
    fn test_block_parents_normalized() {
        let a = BlockId::new([1; ID_LENGTH]);
        let b = BlockId::new([2; ID_LENGTH]);
        let block = Block::new(vec![b, a, b], None);
        assert_eq!(block.parents, vec![a, b]);
    }

    #[test]
    fn test_block_id_depends_on_content() {
        let parent = BlockId::new([7; ID_LENGTH]);
        let empty = Block::new(vec![parent], None);
        let tagged = Block::new(
            vec![parent],
            Some(Payload::TaggedData(TaggedDataPayload {
                tag: b"tag".to_vec(),
                data: b"data".to_vec(),
            })),
        );
        assert_eq!(empty.id(), empty.clone().id());
        assert_ne!(empty.id(), tagged.id());
        assert!(empty.transaction().is_none());
    }

    #[test]
    fn test_metadata_predicates() {
        let mut metadata = BlockMetadata::pending(BlockId::new([3; ID_LENGTH]), vec![]);
        assert!(!metadata.is_referenced());
        assert!(!metadata.is_included());
        assert!(!metadata.is_promotable());

        metadata.referenced_by_milestone_index = Some(12);
        metadata.ledger_inclusion_state = Some(LedgerInclusionState::NoTransaction);
        assert!(metadata.is_included());

        metadata.ledger_inclusion_state = Some(LedgerInclusionState::Conflicting);
        assert!(metadata.is_conflicting());
        assert!(!metadata.is_included());
    }

    #[test]
    fn test_metadata_hints_optional_in_json() {
        let metadata = BlockMetadata::pending(BlockId::new([4; ID_LENGTH]), vec![]);
        let mut value = serde_json::to_value(&metadata).unwrap();
        let fields = value.as_object_mut().unwrap();
        fields.remove("should_promote");
        fields.remove("should_reattach");

        let parsed: BlockMetadata = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, metadata);
        assert!(!parsed.is_reattachable());
    }
}
