//! Collaborator interfaces onto blockchain storage.
//!
//! The RPC layer never touches the database directly; it reads through
//! [`ChainReader`] and iterates matching events through [`EventFilter`].
//! Both are implemented by the storage layer and mocked in tests.

use async_trait::async_trait;
use starknet_types_core::felt::Felt;

use crate::types::{BlockHeader, BlockId, FilteredEvent, TransactionReceipt, TransactionStatus};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    #[error("block not found")]
    BlockNotFound,
    #[error("transaction not found")]
    TransactionNotFound,
    #[error("storage failure: {0}")]
    Storage(String),
}

#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Header of the current chain head.
    async fn head_header(&self) -> Result<BlockHeader, ChainError>;

    async fn block_header(&self, id: &BlockId) -> Result<BlockHeader, ChainError>;

    /// Current status of a transaction, consulting the pending block as well
    /// as sealed history.
    async fn transaction_status(&self, transaction_hash: &Felt)
        -> Result<TransactionStatus, ChainError>;

    async fn transaction_receipt(
        &self,
        transaction_hash: &Felt,
    ) -> Result<TransactionReceipt, ChainError>;

    /// Build an event filter over the given address and key lists. The
    /// returned filter releases its storage snapshot on drop.
    async fn event_filter(
        &self,
        from_address: Option<Felt>,
        keys: &[Vec<Felt>],
    ) -> Result<Box<dyn EventFilter>, ChainError>;
}

/// Opaque pagination cursor handed back by [`EventFilter::events`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuationToken(pub String);

#[async_trait]
pub trait EventFilter: Send {
    /// Restrict the filter to `[from_block, to_block]`; `latest` is the
    /// current head the bounds were resolved against.
    fn set_range(&mut self, from_block: u64, to_block: u64, latest: u64) -> Result<(), ChainError>;

    /// One page of matches. A returned token means more pages follow.
    async fn events(
        &mut self,
        token: Option<ContinuationToken>,
        chunk_size: usize,
    ) -> Result<(Vec<FilteredEvent>, Option<ContinuationToken>), ChainError>;
}
