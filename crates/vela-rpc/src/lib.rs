//! # Starknet RPC API
//!
//! Domain layer on top of [`vela_jsonrpc`]: Starknet wire types, the
//! collaborator interfaces onto blockchain storage, the chain broadcast
//! feeds and the WebSocket subscription engine.
//!
//! Wiring it up:
//!
//! ```rust,ignore
//! let feeds = Arc::new(ChainFeeds::new());
//! let handler = RpcHandler::new(reader, Arc::clone(&feeds), SubscriptionConfig::default());
//! let server = handler.register_methods(Server::builder(8))?.build();
//! HttpServer::new(server, TransportConfig::default()).serve(listener).await?;
//! ```
//!
//! The sync service publishes sealed headers, reorgs, pending-block
//! revisions and L1 heads into `feeds`; every active subscription tails the
//! relevant subset and writes notifications back through the connection
//! that created it.

pub mod errors;
pub mod feeds;
pub mod reader;
pub mod subscriptions;
pub mod types;

pub use feeds::ChainFeeds;
pub use reader::{ChainError, ChainReader, ContinuationToken, EventFilter};
pub use subscriptions::{IdGen, RpcHandler, SubscriptionConfig};
pub use types::{
    BlockHeader, BlockId, EmittedEvent, Event, ExecutionStatus, FilteredEvent, L1Head,
    PendingBlock, Reorg, ResourcePrice, SentEvent, SubscriptionBlockId, Transaction,
    TransactionReceipt, TransactionStatus, TxnFinality,
};
