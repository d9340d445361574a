//! WebSocket connection driver.
//!
//! Each upgraded connection gets a [`ConnectionHandle`] (queued writes, one
//! text frame per call) and a cancellation token. Every inbound message is
//! dispatched through the server with a context carrying the handle, which
//! is what lets subscription methods bind their notification stream to this
//! connection. On disconnect the token is cancelled and every subscription
//! derived from it unwinds.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use hyper_tungstenite::tungstenite::Message;
use hyper_tungstenite::HyperWebsocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::context::{ConnectionHandle, RequestContext};
use crate::server::Server;

pub(crate) async fn drive_connection(server: Server, websocket: HyperWebsocket) {
    let ws = match websocket.await {
        Ok(ws) => ws,
        Err(err) => {
            debug!(%err, "websocket handshake failed");
            return;
        }
    };
    let (mut sink, mut stream) = ws.split();

    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    let handle = Arc::new(ConnectionHandle::new(outbound));
    let cancellation = CancellationToken::new();

    // Single writer task. Concurrent ConnectionHandle::write calls enqueue
    // here, which gives per-message frame atomicity without locks.
    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if let Err(err) = sink.send(Message::text(message)).await {
                debug!(%err, "websocket send failed");
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(message) = stream.next().await {
        let data = match message {
            Ok(Message::Text(text)) => text.as_bytes().to_vec(),
            Ok(Message::Binary(data)) => data.to_vec(),
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => continue,
            Ok(Message::Close(_)) => break,
            Err(err) => {
                debug!(%err, "websocket receive failed");
                break;
            }
        };

        let ctx = RequestContext::with_connection(Arc::clone(&handle), cancellation.child_token());
        if let Some(response) = server.handle(&ctx, &data).await {
            if handle.write(response).is_err() {
                break;
            }
        }
    }

    debug!("websocket client disconnected");

    // Tear down every subscription bound to this connection; once the last
    // handle clone drops, the writer queue closes and the writer exits.
    cancellation.cancel();
    drop(handle);
    let _ = writer.await;
}
