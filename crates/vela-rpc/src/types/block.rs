//! Block identifiers and headers.

use serde::{Deserialize, Deserializer, Serialize};
use starknet_types_core::felt::Felt;

use crate::types::transaction::Transaction;

/// A block reference as clients write it: `"latest"`, `"pending"`,
/// `{"block_hash": ..}` or `{"block_number": ..}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockId {
    Latest,
    Pending,
    Hash(Felt),
    Number(u64),
}

/// Same as [`BlockId`] but without `pending`: subscriptions always start
/// from a sealed block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionBlockId {
    Latest,
    Hash(Felt),
    Number(u64),
}

impl From<&SubscriptionBlockId> for BlockId {
    fn from(id: &SubscriptionBlockId) -> Self {
        match id {
            SubscriptionBlockId::Latest => BlockId::Latest,
            SubscriptionBlockId::Hash(hash) => BlockId::Hash(*hash),
            SubscriptionBlockId::Number(number) => BlockId::Number(*number),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BlockIdRepr {
    Tag(String),
    Object {
        block_hash: Option<Felt>,
        block_number: Option<u64>,
    },
}

impl<'de> Deserialize<'de> for BlockId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match BlockIdRepr::deserialize(deserializer)? {
            BlockIdRepr::Tag(tag) if tag == "latest" => Ok(BlockId::Latest),
            BlockIdRepr::Tag(tag) if tag == "pending" => Ok(BlockId::Pending),
            BlockIdRepr::Tag(tag) => Err(serde::de::Error::custom(format!(
                "unknown block tag: {tag:?}"
            ))),
            BlockIdRepr::Object {
                block_hash: Some(hash),
                block_number: None,
            } => Ok(BlockId::Hash(hash)),
            BlockIdRepr::Object {
                block_hash: None,
                block_number: Some(number),
            } => Ok(BlockId::Number(number)),
            BlockIdRepr::Object { .. } => Err(serde::de::Error::custom(
                "block id must carry exactly one of block_hash, block_number",
            )),
        }
    }
}

impl<'de> Deserialize<'de> for SubscriptionBlockId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match BlockIdRepr::deserialize(deserializer)? {
            BlockIdRepr::Tag(tag) if tag == "latest" => Ok(SubscriptionBlockId::Latest),
            BlockIdRepr::Tag(tag) => Err(serde::de::Error::custom(format!(
                "unknown block tag: {tag:?}"
            ))),
            BlockIdRepr::Object {
                block_hash: Some(hash),
                block_number: None,
            } => Ok(SubscriptionBlockId::Hash(hash)),
            BlockIdRepr::Object {
                block_hash: None,
                block_number: Some(number),
            } => Ok(SubscriptionBlockId::Number(number)),
            BlockIdRepr::Object { .. } => Err(serde::de::Error::custom(
                "block id must carry exactly one of block_hash, block_number",
            )),
        }
    }
}

/// L1 gas price pair attached to a header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcePrice {
    pub price_in_fri: Felt,
    pub price_in_wei: Felt,
}

/// Sealed block header as emitted on `starknet_subscriptionNewHeads`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub block_hash: Felt,
    pub parent_hash: Felt,
    pub block_number: u64,
    pub new_root: Felt,
    pub timestamp: u64,
    pub sequencer_address: Felt,
    pub l1_gas_price: ResourcePrice,
    pub starknet_version: String,
}

/// Canonical-chain rewind, emitted as `starknet_subscriptionReorg`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reorg {
    pub starting_block_hash: Felt,
    pub starting_block_number: u64,
    pub ending_block_hash: Felt,
    pub ending_block_number: u64,
}

/// The speculative next block. Revised repeatedly until sealed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingBlock {
    pub parent_hash: Felt,
    pub number: u64,
    pub transactions: Vec<Transaction>,
}

/// An L1 block observed by the settlement watcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct L1Head {
    pub block_number: u64,
    pub block_hash: Felt,
}
