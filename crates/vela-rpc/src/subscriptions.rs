//! WebSocket subscription engine.
//!
//! Each subscribe method follows the same shape: require the connection
//! handle from the request context, resolve and validate inputs, allocate an
//! id, register the subscription, attach to the chain feeds and spawn a
//! supervisor task that owns the notification stream. The supervisor removes
//! the registry entry when it winds down, whatever the reason (unsubscribe,
//! disconnect, terminal status, write failure).
//!
//! Within one subscription, ordered streams (historical headers, event
//! replay) are produced by a single task; sibling tasks only carry disjoint
//! streams, so per-connection write queuing is enough to keep frames intact.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use starknet_types_core::felt::Felt;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use vela_feed::FeedSubscription;
use vela_jsonrpc::{
    ConnectionClosed, ConnectionHandle, ErrorObject, Method, Parameter, RegistryError,
    RequestContext, ServerBuilder,
};

use crate::errors;
use crate::feeds::ChainFeeds;
use crate::reader::{ChainError, ChainReader};
use crate::types::{
    BlockHeader, BlockId, EmittedEvent, FilteredEvent, L1Head, PendingBlock, SentEvent,
    SubscriptionBlockId, Transaction, TransactionStatus, TxnFinality,
};

const NEW_HEADS_METHOD: &str = "starknet_subscriptionNewHeads";
const EVENTS_METHOD: &str = "starknet_subscriptionEvents";
const PENDING_TXS_METHOD: &str = "starknet_subscriptionPendingTransactions";
const TX_STATUS_METHOD: &str = "starknet_subscriptionTransactionsStatus";
const REORG_METHOD: &str = "starknet_subscriptionReorg";

/// Tunables for the subscription engine. Tests shrink the transaction-status
/// window; production keeps the defaults.
#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    /// Oldest historical start accepted, relative to the current head.
    pub max_blocks_back: u64,
    /// Cap on the summed size of event key filters (and sender lists).
    pub max_event_filter_keys: usize,
    /// Page size used when replaying events through the chain filter.
    pub events_chunk_size: usize,
    /// How long to wait for an unknown transaction to appear.
    pub tx_status_timeout: Duration,
    /// Poll interval while waiting for it.
    pub tx_status_ticker: Duration,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            max_blocks_back: 1024,
            max_event_filter_keys: 1024,
            events_chunk_size: 1024,
            tx_status_timeout: Duration::from_secs(5 * 60),
            tx_status_ticker: Duration::from_secs(5),
        }
    }
}

/// Generator for subscription ids. Injectable so tests can pin ids.
pub type IdGen = Arc<dyn Fn() -> u64 + Send + Sync>;

struct SubscriptionEntry {
    conn: Arc<ConnectionHandle>,
    cancel: CancellationToken,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

/// The node-side handler backing the `starknet_subscribe*` method family.
pub struct RpcHandler {
    reader: Arc<dyn ChainReader>,
    feeds: Arc<ChainFeeds>,
    config: SubscriptionConfig,
    subscriptions: RwLock<HashMap<u64, Arc<SubscriptionEntry>>>,
    id_gen: IdGen,
}

impl RpcHandler {
    pub fn new(
        reader: Arc<dyn ChainReader>,
        feeds: Arc<ChainFeeds>,
        config: SubscriptionConfig,
    ) -> Arc<Self> {
        let counter = Arc::new(AtomicU64::new(1));
        let id_gen: IdGen = Arc::new(move || counter.fetch_add(1, Ordering::Relaxed));
        Self::with_id_gen(reader, feeds, config, id_gen)
    }

    pub fn with_id_gen(
        reader: Arc<dyn ChainReader>,
        feeds: Arc<ChainFeeds>,
        config: SubscriptionConfig,
        id_gen: IdGen,
    ) -> Arc<Self> {
        Arc::new(Self {
            reader,
            feeds,
            config,
            subscriptions: RwLock::new(HashMap::new()),
            id_gen,
        })
    }

    pub async fn active_subscriptions(&self) -> usize {
        self.subscriptions.read().await.len()
    }

    /// Stream new block headers, preceded by the historical range from
    /// `block_id` (default: latest) up to the current head. Reorgs are
    /// forwarded on the same subscription.
    pub async fn subscribe_new_heads(
        self: Arc<Self>,
        ctx: RequestContext,
        block_id: Option<SubscriptionBlockId>,
    ) -> Result<u64, ErrorObject> {
        let conn = require_connection(&ctx)?;
        let (start, latest) = self.resolve_block_range(block_id.as_ref()).await?;

        let id = (self.id_gen)();
        let cancel = ctx.child_cancellation();
        let entry = self.insert(id, Arc::clone(&conn), cancel.clone()).await;

        let new_heads = self.feeds.new_heads.subscribe();
        let reorgs = self.feeds.reorgs.subscribe();

        let this = Arc::clone(&self);
        let supervisor = tokio::spawn(async move {
            let history = tokio::spawn({
                let this = Arc::clone(&this);
                let conn = Arc::clone(&conn);
                let cancel = cancel.clone();
                async move {
                    if let Err(err) = this
                        .send_historical_headers(&cancel, start, latest, &conn, id)
                        .await
                    {
                        warn!(subscription = id, %err, "sending historical headers failed");
                        cancel.cancel();
                    }
                }
            });
            let live = tokio::spawn(forward_feed(
                cancel.clone(),
                new_heads,
                Arc::clone(&conn),
                NEW_HEADS_METHOD,
                id,
            ));
            let reorg = tokio::spawn(forward_feed(
                cancel.clone(),
                reorgs,
                Arc::clone(&conn),
                REORG_METHOD,
                id,
            ));
            let _ = tokio::join!(history, live, reorg);
            this.remove(id).await;
        });
        entry.attach(supervisor).await;

        Ok(id)
    }

    /// Stream events matching the address/key filter: first a replay of the
    /// confirmed range, then live deltas from new heads and pending-block
    /// revisions, with reorgs forwarded and rewinding the replay cursor.
    pub async fn subscribe_events(
        self: Arc<Self>,
        ctx: RequestContext,
        from_address: Option<Felt>,
        keys: Option<Vec<Vec<Felt>>>,
        block_id: Option<SubscriptionBlockId>,
    ) -> Result<u64, ErrorObject> {
        let conn = require_connection(&ctx)?;

        let keys = keys.unwrap_or_default();
        let key_count = keys.len() + keys.iter().map(Vec::len).sum::<usize>();
        if key_count > self.config.max_event_filter_keys {
            return Err(errors::too_many_keys_in_filter());
        }

        let (start, latest) = self.resolve_block_range(block_id.as_ref()).await?;

        let id = (self.id_gen)();
        let cancel = ctx.child_cancellation();
        let entry = self.insert(id, Arc::clone(&conn), cancel.clone()).await;

        // Keep-last on every feed: a slow subscriber may skip intermediate
        // heads, the replay below covers the gap by range.
        let mut new_heads = self.feeds.new_heads.subscribe_keep_last();
        let mut reorgs = self.feeds.reorgs.subscribe_keep_last();
        let mut pending = self.feeds.pending_block.subscribe_keep_last();

        let this = Arc::clone(&self);
        let supervisor = tokio::spawn(async move {
            // Replay the confirmed range before tailing the feeds. The dedup
            // set only matters once pending blocks come into play.
            this.process_events(
                &cancel,
                &conn,
                id,
                start.block_number,
                latest.block_number,
                from_address.as_ref(),
                &keys,
                None,
            )
            .await;

            let mut next_block = latest.block_number + 1;
            let mut sent = HashSet::new();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    reorg = reorgs.recv() => match reorg {
                        Some(reorg) => {
                            if let Err(err) = notify(&conn, REORG_METHOD, id, &*reorg) {
                                warn!(subscription = id, %err, "sending reorg failed");
                                cancel.cancel();
                                break;
                            }
                            next_block = reorg.starting_block_number;
                        }
                        None => break,
                    },
                    head = new_heads.recv() => match head {
                        Some(head) => {
                            this.process_events(
                                &cancel,
                                &conn,
                                id,
                                next_block,
                                head.block_number,
                                from_address.as_ref(),
                                &keys,
                                Some(&mut sent),
                            )
                            .await;
                            next_block = head.block_number + 1;
                        }
                        None => break,
                    },
                    block = pending.recv() => match block {
                        Some(_) => {
                            this.process_events(
                                &cancel,
                                &conn,
                                id,
                                next_block,
                                next_block,
                                from_address.as_ref(),
                                &keys,
                                Some(&mut sent),
                            )
                            .await;
                        }
                        None => break,
                    },
                }
            }
            this.remove(id).await;
        });
        entry.attach(supervisor).await;

        Ok(id)
    }

    /// Stream transactions from pending-block revisions, as full bodies or
    /// hashes, optionally filtered by sender address.
    pub async fn subscribe_pending_transactions(
        self: Arc<Self>,
        ctx: RequestContext,
        transaction_details: Option<bool>,
        sender_address: Option<Vec<Felt>>,
    ) -> Result<u64, ErrorObject> {
        let conn = require_connection(&ctx)?;

        let senders = sender_address.unwrap_or_default();
        if senders.len() > self.config.max_event_filter_keys {
            return Err(errors::too_many_addresses_in_filter());
        }
        let details = transaction_details.unwrap_or(false);

        let id = (self.id_gen)();
        let cancel = ctx.child_cancellation();
        let entry = self.insert(id, Arc::clone(&conn), cancel.clone()).await;

        let mut pending = self.feeds.pending_block.subscribe();

        let this = Arc::clone(&self);
        let supervisor = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    block = pending.recv() => match block {
                        Some(block) => {
                            if let Err(err) = send_pending_txs(&conn, id, &block, details, &senders) {
                                warn!(subscription = id, %err, "sending pending transactions failed");
                                cancel.cancel();
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
            this.remove(id).await;
        });
        entry.attach(supervisor).await;

        Ok(id)
    }

    /// Stream finality changes of one transaction. If the hash is unknown,
    /// the call polls for it within the configured window and fails with
    /// `transaction hash not found` on expiry, creating no subscription.
    pub async fn subscribe_transaction_status(
        self: Arc<Self>,
        ctx: RequestContext,
        transaction_hash: Felt,
    ) -> Result<u64, ErrorObject> {
        let conn = require_connection(&ctx)?;

        let current = match self.reader.transaction_status(&transaction_hash).await {
            Ok(status) => status,
            Err(ChainError::TransactionNotFound) => {
                self.await_transaction(&ctx, &transaction_hash).await?
            }
            Err(err) => return Err(internal(err)),
        };

        let id = (self.id_gen)();
        let cancel = ctx.child_cancellation();
        let entry = self.insert(id, Arc::clone(&conn), cancel.clone()).await;

        let pending = self.feeds.pending_block.subscribe();
        let l1_heads = self.feeds.l1_heads.subscribe();
        let reorgs = self.feeds.reorgs.subscribe();

        let this = Arc::clone(&self);
        let supervisor = tokio::spawn(async move {
            match send_txn_status(&conn, id, &transaction_hash, &current) {
                Err(err) => {
                    warn!(subscription = id, %err, "sending transaction status failed");
                }
                // Already final: nothing left to watch.
                Ok(()) if current.finality.is_final() => {}
                Ok(()) => {
                    let watcher = tokio::spawn(Arc::clone(&this).watch_transaction_status(
                        cancel.clone(),
                        pending,
                        l1_heads,
                        Arc::clone(&conn),
                        id,
                        transaction_hash,
                        current,
                    ));
                    let reorg = tokio::spawn(forward_feed(
                        cancel.clone(),
                        reorgs,
                        Arc::clone(&conn),
                        REORG_METHOD,
                        id,
                    ));
                    let _ = tokio::join!(watcher, reorg);
                }
            }
            this.remove(id).await;
        });
        entry.attach(supervisor).await;

        Ok(id)
    }

    /// Tear down a subscription. Only the connection that created it may do
    /// so; anything else answers `invalid subscription id`. Returns once all
    /// of the subscription's tasks have drained, so no notification for the
    /// id can follow the acknowledgement.
    pub async fn unsubscribe(&self, ctx: RequestContext, id: u64) -> Result<bool, ErrorObject> {
        let conn = require_connection(&ctx)?;

        let entry = self.subscriptions.read().await.get(&id).cloned();
        let Some(entry) = entry else {
            return Err(errors::invalid_subscription_id());
        };
        if !entry.conn.equal(&conn) {
            return Err(errors::invalid_subscription_id());
        }

        entry.cancel.cancel();
        let supervisor = entry.supervisor.lock().await.take();
        if let Some(supervisor) = supervisor {
            if let Err(err) = supervisor.await {
                error!(subscription = id, %err, "subscription supervisor failed");
            }
        }
        self.remove(id).await;
        Ok(true)
    }

    async fn insert(
        &self,
        id: u64,
        conn: Arc<ConnectionHandle>,
        cancel: CancellationToken,
    ) -> Arc<SubscriptionEntry> {
        let entry = Arc::new(SubscriptionEntry {
            conn,
            cancel,
            supervisor: Mutex::new(None),
        });
        self.subscriptions
            .write()
            .await
            .insert(id, Arc::clone(&entry));
        entry
    }

    async fn remove(&self, id: u64) {
        self.subscriptions.write().await.remove(&id);
    }

    /// Resolve the `[start, latest]` header range for a subscription. An
    /// absent id means latest; a present id that does not resolve is an
    /// error; starts older than `max_blocks_back` are refused.
    async fn resolve_block_range(
        &self,
        block_id: Option<&SubscriptionBlockId>,
    ) -> Result<(BlockHeader, BlockHeader), ErrorObject> {
        let latest = self.reader.head_header().await.map_err(internal)?;

        let start = match block_id {
            None | Some(SubscriptionBlockId::Latest) => return Ok((latest.clone(), latest)),
            Some(id) => self
                .reader
                .block_header(&id.into())
                .await
                .map_err(|err| match err {
                    ChainError::BlockNotFound => errors::block_not_found(),
                    other => internal(other),
                })?,
        };

        if latest.block_number >= self.config.max_blocks_back
            && start.block_number <= latest.block_number - self.config.max_blocks_back
        {
            return Err(errors::too_many_blocks_back());
        }

        Ok((start, latest))
    }

    async fn send_historical_headers(
        &self,
        cancel: &CancellationToken,
        start: BlockHeader,
        latest: BlockHeader,
        conn: &ConnectionHandle,
        id: u64,
    ) -> Result<(), TaskError> {
        let mut current = start;
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }
            notify(conn, NEW_HEADS_METHOD, id, &current)?;
            if current.block_number >= latest.block_number {
                return Ok(());
            }
            current = self
                .reader
                .block_header(&BlockId::Number(current.block_number + 1))
                .await?;
        }
    }

    /// Replay the filter over `[from, to]` and emit every match, paginating
    /// with the chain's continuation token. Filter errors are logged and end
    /// the replay only; write failures tear the subscription down.
    #[allow(clippy::too_many_arguments)]
    async fn process_events(
        &self,
        cancel: &CancellationToken,
        conn: &ConnectionHandle,
        id: u64,
        from: u64,
        to: u64,
        from_address: Option<&Felt>,
        keys: &[Vec<Felt>],
        mut sent: Option<&mut HashSet<SentEvent>>,
    ) {
        let mut filter = match self.reader.event_filter(from_address.copied(), keys).await {
            Ok(filter) => filter,
            Err(err) => {
                warn!(subscription = id, %err, "creating event filter failed");
                return;
            }
        };
        if let Err(err) = filter.set_range(from, to, to) {
            warn!(subscription = id, %err, "setting event filter range failed");
            return;
        }

        let mut token = None;
        loop {
            let (events, next) = match filter
                .events(token.take(), self.config.events_chunk_size)
                .await
            {
                Ok(page) => page,
                Err(err) => {
                    warn!(subscription = id, %err, "filtering events failed");
                    return;
                }
            };
            if let Err(err) = send_events(cancel, conn, id, events, sent.as_deref_mut()) {
                warn!(subscription = id, %err, "sending events failed");
                cancel.cancel();
                return;
            }
            match next {
                Some(next) => token = Some(next),
                None => return,
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn watch_transaction_status(
        self: Arc<Self>,
        cancel: CancellationToken,
        mut pending: FeedSubscription<Arc<PendingBlock>>,
        mut l1_heads: FeedSubscription<Arc<L1Head>>,
        conn: Arc<ConnectionHandle>,
        id: u64,
        transaction_hash: Felt,
        mut current: TransactionStatus,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                tick = pending.recv() => {
                    if tick.is_none() {
                        return;
                    }
                    // The pending block may have picked the transaction up;
                    // refetch and emit only on a strict finality increase.
                    if current.finality >= TxnFinality::AcceptedOnL2 {
                        continue;
                    }
                    let status = match self.reader.transaction_status(&transaction_hash).await {
                        Ok(status) => status,
                        Err(err) => {
                            error!(subscription = id, %err, "fetching transaction status failed");
                            cancel.cancel();
                            return;
                        }
                    };
                    if status.finality > current.finality {
                        if let Err(err) = send_txn_status(&conn, id, &transaction_hash, &status) {
                            warn!(subscription = id, %err, "sending transaction status failed");
                            cancel.cancel();
                            return;
                        }
                        if status.finality.is_final() {
                            cancel.cancel();
                            return;
                        }
                        current = status;
                    }
                }
                tick = l1_heads.recv() => {
                    if tick.is_none() {
                        return;
                    }
                    let receipt = match self.reader.transaction_receipt(&transaction_hash).await {
                        Ok(receipt) => receipt,
                        Err(err) => {
                            error!(subscription = id, %err, "fetching transaction receipt failed");
                            cancel.cancel();
                            return;
                        }
                    };
                    if receipt.finality_status == TxnFinality::AcceptedOnL1 {
                        let status = TransactionStatus {
                            finality: TxnFinality::AcceptedOnL1,
                            execution: receipt.execution_status,
                            failure_reason: receipt.revert_reason,
                        };
                        if let Err(err) = send_txn_status(&conn, id, &transaction_hash, &status) {
                            warn!(subscription = id, %err, "sending transaction status failed");
                        }
                        cancel.cancel();
                        return;
                    }
                }
            }
        }
    }

    /// Poll for a transaction the feeder has not seen yet. Gives up after
    /// the configured timeout without creating a subscription.
    async fn await_transaction(
        &self,
        ctx: &RequestContext,
        transaction_hash: &Felt,
    ) -> Result<TransactionStatus, ErrorObject> {
        let deadline = tokio::time::sleep(self.config.tx_status_timeout);
        tokio::pin!(deadline);
        let mut ticker = tokio::time::interval(self.config.tx_status_ticker);

        loop {
            tokio::select! {
                _ = &mut deadline => return Err(errors::transaction_hash_not_found()),
                _ = ctx.cancellation().cancelled() => {
                    return Err(ErrorObject::internal_error().with_data("connection closed"));
                }
                _ = ticker.tick() => {
                    match self.reader.transaction_status(transaction_hash).await {
                        Ok(status) => return Ok(status),
                        Err(ChainError::TransactionNotFound) => continue,
                        Err(err) => return Err(internal(err)),
                    }
                }
            }
        }
    }
}

impl RpcHandler {
    /// Register the `starknet_subscribe*` method family and
    /// `starknet_unsubscribe` on a server builder.
    pub fn register_methods(
        self: Arc<Self>,
        builder: ServerBuilder,
    ) -> Result<ServerBuilder, RegistryError> {
        let new_heads = {
            let handler = Arc::clone(&self);
            move |ctx: RequestContext, block_id: Option<SubscriptionBlockId>| {
                Arc::clone(&handler).subscribe_new_heads(ctx, block_id)
            }
        };
        let events = {
            let handler = Arc::clone(&self);
            move |ctx: RequestContext,
                  from_address: Option<Felt>,
                  keys: Option<Vec<Vec<Felt>>>,
                  block_id: Option<SubscriptionBlockId>| {
                Arc::clone(&handler).subscribe_events(ctx, from_address, keys, block_id)
            }
        };
        let pending_txs = {
            let handler = Arc::clone(&self);
            move |ctx: RequestContext, transaction_details: Option<bool>, sender_address: Option<Vec<Felt>>| {
                Arc::clone(&handler).subscribe_pending_transactions(
                    ctx,
                    transaction_details,
                    sender_address,
                )
            }
        };
        let tx_status = {
            let handler = Arc::clone(&self);
            move |ctx: RequestContext, transaction_hash: Felt| {
                Arc::clone(&handler).subscribe_transaction_status(ctx, transaction_hash)
            }
        };
        let unsubscribe = {
            let handler = Arc::clone(&self);
            move |ctx: RequestContext, subscription_id: u64| {
                let handler = Arc::clone(&handler);
                async move { handler.unsubscribe(ctx, subscription_id).await }
            }
        };

        builder
            .register_method(Method::new(
                "starknet_subscribeNewHeads",
                vec![Parameter::optional("block_id")],
                new_heads,
            ))?
            .register_method(Method::new(
                "starknet_subscribeEvents",
                vec![
                    Parameter::optional("from_address"),
                    Parameter::optional("keys"),
                    Parameter::optional("block_id"),
                ],
                events,
            ))?
            .register_method(Method::new(
                "starknet_subscribePendingTransactions",
                vec![
                    Parameter::optional("transaction_details"),
                    Parameter::optional("sender_address"),
                ],
                pending_txs,
            ))?
            .register_method(Method::new(
                "starknet_subscribeTransactionStatus",
                vec![Parameter::required("transaction_hash")],
                tx_status,
            ))?
            .register_method(Method::new(
                "starknet_unsubscribe",
                vec![Parameter::required("subscription_id")],
                unsubscribe,
            ))
    }
}

impl SubscriptionEntry {
    async fn attach(&self, supervisor: JoinHandle<()>) {
        *self.supervisor.lock().await = Some(supervisor);
    }
}

fn require_connection(ctx: &RequestContext) -> Result<Arc<ConnectionHandle>, ErrorObject> {
    // Subscription methods only exist on connection-oriented transports.
    ctx.connection()
        .cloned()
        .ok_or_else(ErrorObject::method_not_found)
}

fn internal(err: ChainError) -> ErrorObject {
    ErrorObject::internal_error().with_data(err.to_string())
}

#[derive(Debug, thiserror::Error)]
enum TaskError {
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Notify(#[from] NotifyError),
}

#[derive(Debug, thiserror::Error)]
enum NotifyError {
    #[error(transparent)]
    Closed(#[from] ConnectionClosed),
    #[error("encoding notification failed: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct SubscriptionNotification<'a, T> {
    jsonrpc: &'static str,
    method: &'a str,
    params: NotificationParams<'a, T>,
}

#[derive(Serialize)]
struct NotificationParams<'a, T> {
    subscription_id: u64,
    result: &'a T,
}

fn notify<T: Serialize>(
    conn: &ConnectionHandle,
    method: &str,
    id: u64,
    result: &T,
) -> Result<(), NotifyError> {
    let message = serde_json::to_string(&SubscriptionNotification {
        jsonrpc: vela_jsonrpc::VERSION,
        method,
        params: NotificationParams {
            subscription_id: id,
            result,
        },
    })?;
    conn.write(message)?;
    Ok(())
}

#[derive(Serialize)]
struct TransactionStatusResult<'a> {
    transaction_hash: &'a Felt,
    status: &'a TransactionStatus,
}

fn send_txn_status(
    conn: &ConnectionHandle,
    id: u64,
    transaction_hash: &Felt,
    status: &TransactionStatus,
) -> Result<(), NotifyError> {
    notify(
        conn,
        TX_STATUS_METHOD,
        id,
        &TransactionStatusResult {
            transaction_hash,
            status,
        },
    )
}

fn send_pending_txs(
    conn: &ConnectionHandle,
    id: u64,
    block: &PendingBlock,
    details: bool,
    senders: &[Felt],
) -> Result<(), NotifyError> {
    for tx in block
        .transactions
        .iter()
        .filter(|tx| sender_matches(tx, senders))
    {
        if details {
            notify(conn, PENDING_TXS_METHOD, id, tx)?;
        } else {
            notify(conn, PENDING_TXS_METHOD, id, tx.hash())?;
        }
    }
    Ok(())
}

/// An empty sender list admits everything; a non-empty list only admits
/// transaction kinds that carry a sender (invoke, declare).
fn sender_matches(tx: &Transaction, senders: &[Felt]) -> bool {
    if senders.is_empty() {
        return true;
    }
    match tx.sender_address() {
        Some(sender) => senders.contains(sender),
        None => false,
    }
}

fn send_events(
    cancel: &CancellationToken,
    conn: &ConnectionHandle,
    id: u64,
    events: Vec<FilteredEvent>,
    mut sent: Option<&mut HashSet<SentEvent>>,
) -> Result<(), NotifyError> {
    for event in events {
        if cancel.is_cancelled() {
            return Ok(());
        }
        if let Some(sent) = sent.as_deref_mut() {
            let key = SentEvent {
                transaction_hash: event.transaction_hash,
                event_index: event.event_index,
            };
            let already_sent = sent.contains(&key);
            // Recorded while the event only exists in the pending block,
            // dropped once the containing block is sealed.
            if event.block_hash.is_some() {
                sent.remove(&key);
            } else {
                sent.insert(key);
            }
            if already_sent {
                continue;
            }
        }
        let emitted = EmittedEvent {
            block_hash: event.block_hash,
            block_number: event.block_number,
            transaction_hash: event.transaction_hash,
            event: event.event,
        };
        notify(conn, EVENTS_METHOD, id, &emitted)?;
    }
    Ok(())
}

/// Tail a feed and forward each value on `method` until cancellation or
/// feed close. Used for live heads and for reorg forwarding.
async fn forward_feed<T: Serialize + Send + Sync + 'static>(
    cancel: CancellationToken,
    mut feed: FeedSubscription<Arc<T>>,
    conn: Arc<ConnectionHandle>,
    method: &'static str,
    id: u64,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            value = feed.recv() => match value {
                Some(value) => {
                    if let Err(err) = notify(&conn, method, id, &*value) {
                        warn!(subscription = id, %err, "forwarding notification failed");
                        cancel.cancel();
                        return;
                    }
                }
                None => return,
            },
        }
    }
}
