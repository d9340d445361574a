//! Wire types shared across the RPC surface.

pub mod block;
pub mod event;
pub mod transaction;

pub use block::{BlockHeader, BlockId, L1Head, PendingBlock, Reorg, ResourcePrice, SubscriptionBlockId};
pub use event::{EmittedEvent, Event, FilteredEvent, SentEvent};
pub use transaction::{
    ExecutionStatus, Transaction, TransactionReceipt, TransactionStatus, TxnFinality,
};
