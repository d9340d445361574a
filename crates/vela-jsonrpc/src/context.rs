//! Per-request context and transport connection handles.
//!
//! Subscription methods need to reach the physical connection that carried
//! the request; the transport attaches a [`ConnectionHandle`] to the
//! [`RequestContext`] for that purpose. HTTP requests carry no handle, which
//! is how subscription handlers reject them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Non-owning handle to one physical client connection.
///
/// Writes are queued to the connection's single writer task, so concurrent
/// callers get per-message atomicity without holding any lock across IO.
/// Identity ([`ConnectionHandle::equal`]) is used to authorize unsubscribes.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: u64,
    outbound: mpsc::UnboundedSender<String>,
}

/// The connection behind a handle has gone away.
#[derive(Debug, thiserror::Error)]
#[error("connection closed")]
pub struct ConnectionClosed;

impl ConnectionHandle {
    pub fn new(outbound: mpsc::UnboundedSender<String>) -> Self {
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            outbound,
        }
    }

    /// Queue one outbound message (one transport frame per call).
    pub fn write(&self, message: String) -> Result<(), ConnectionClosed> {
        self.outbound.send(message).map_err(|_| ConnectionClosed)
    }

    /// True iff both handles refer to the same physical connection.
    pub fn equal(&self, other: &ConnectionHandle) -> bool {
        self.id == other.id
    }
}

/// Context threaded through dispatch: the originating connection (if any)
/// and the cancellation token covering the request's lifetime.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    connection: Option<Arc<ConnectionHandle>>,
    cancellation: CancellationToken,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connection(connection: Arc<ConnectionHandle>, cancellation: CancellationToken) -> Self {
        Self {
            connection: Some(connection),
            cancellation,
        }
    }

    pub fn connection(&self) -> Option<&Arc<ConnectionHandle>> {
        self.connection.as_ref()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Derive a token that is cancelled when the request's token is.
    /// Subscriptions hang their lifetime off this.
    pub fn child_cancellation(&self) -> CancellationToken {
        self.cancellation.child_token()
    }
}
