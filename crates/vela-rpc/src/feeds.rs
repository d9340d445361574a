//! The chain-side broadcast feeds the subscription engine tails.
//!
//! The sync service publishes into these; subscriptions are the consumers.
//! Payloads are `Arc`-wrapped so fan-out to many subscribers stays cheap.

use std::sync::Arc;

use vela_feed::Feed;

use crate::types::{BlockHeader, L1Head, PendingBlock, Reorg};

pub struct ChainFeeds {
    /// Fired once per sealed block, in chain order.
    pub new_heads: Feed<Arc<BlockHeader>>,
    /// Fired when the canonical chain rewinds.
    pub reorgs: Feed<Arc<Reorg>>,
    /// Fired on every revision of the pending block.
    pub pending_block: Feed<Arc<PendingBlock>>,
    /// Fired when the L1 settlement watcher advances.
    pub l1_heads: Feed<Arc<L1Head>>,
}

impl ChainFeeds {
    pub fn new() -> Self {
        Self {
            new_heads: Feed::new(),
            reorgs: Feed::new(),
            pending_block: Feed::new(),
            l1_heads: Feed::new(),
        }
    }
}

impl Default for ChainFeeds {
    fn default() -> Self {
        Self::new()
    }
}
