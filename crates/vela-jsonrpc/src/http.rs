//! HTTP transport adapter.
//!
//! Serves `POST <rpc_path>` as the JSON-RPC endpoint (body capped at
//! [`MAX_REQUEST_BODY_SIZE`]), `GET <rpc_path>` as a liveness probe, and
//! upgrades WebSocket handshakes on the same path into long-lived RPC
//! connections driven by the [`ws`](crate::ws) module.

use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::header::CONTENT_TYPE;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method as HttpMethod, Request as HttpRequest, Response as HttpResponse, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::context::RequestContext;
use crate::error::ErrorObject;
use crate::request::RequestId;
use crate::response::Response;
use crate::server::Server;
use crate::ws;

/// HTTP upload cap: requests with larger bodies are refused.
pub const MAX_REQUEST_BODY_SIZE: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Path serving RPC traffic (POST, and WebSocket upgrades).
    pub rpc_path: String,
    pub max_body_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            rpc_path: "/".to_owned(),
            max_body_size: MAX_REQUEST_BODY_SIZE,
        }
    }
}

/// HTTP/WebSocket front-end over a [`Server`].
#[derive(Clone)]
pub struct HttpServer {
    server: Server,
    config: TransportConfig,
}

impl HttpServer {
    pub fn new(server: Server, config: TransportConfig) -> Self {
        Self { server, config }
    }

    /// Accept loop. One spawned task per connection; runs until the listener
    /// fails.
    pub async fn serve(self, listener: TcpListener) -> std::io::Result<()> {
        info!(addr = %listener.local_addr()?, "rpc server listening");
        loop {
            let (stream, peer) = listener.accept().await?;
            debug!(%peer, "accepted connection");

            let this = self.clone();
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| {
                    let this = this.clone();
                    async move { Ok::<_, std::convert::Infallible>(this.route(req).await) }
                });
                // with_upgrades keeps the connection alive across the
                // WebSocket handshake.
                if let Err(err) = http1::Builder::new()
                    .serve_connection(io, service)
                    .with_upgrades()
                    .await
                {
                    debug!(%err, "connection closed with error");
                }
            });
        }
    }

    pub(crate) async fn route<B>(&self, mut req: HttpRequest<B>) -> HttpResponse<Full<Bytes>>
    where
        B: hyper::body::Body + Send + 'static,
        B::Data: Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        if hyper_tungstenite::is_upgrade_request(&req) {
            if req.uri().path() != self.config.rpc_path {
                return empty(StatusCode::NOT_FOUND);
            }
            return match hyper_tungstenite::upgrade(&mut req, None) {
                Ok((response, websocket)) => {
                    tokio::spawn(ws::drive_connection(self.server.clone(), websocket));
                    response
                }
                Err(err) => {
                    warn!(%err, "websocket upgrade failed");
                    empty(StatusCode::BAD_REQUEST)
                }
            };
        }

        match *req.method() {
            HttpMethod::GET => {
                if req.uri().path() == self.config.rpc_path {
                    empty(StatusCode::OK)
                } else {
                    empty(StatusCode::NOT_FOUND)
                }
            }
            HttpMethod::POST => {
                if req.uri().path() != self.config.rpc_path {
                    return empty(StatusCode::NOT_FOUND);
                }
                let body = match Limited::new(req.into_body(), self.config.max_body_size)
                    .collect()
                    .await
                {
                    Ok(collected) => collected.to_bytes(),
                    Err(err) => {
                        warn!("refusing request body: {err}");
                        return internal_error(format!("failed to read request body: {err}"));
                    }
                };

                let ctx = RequestContext::new();
                match self.server.handle(&ctx, &body).await {
                    Some(response) => json(StatusCode::OK, response),
                    None => empty(StatusCode::OK),
                }
            }
            _ => empty(StatusCode::METHOD_NOT_ALLOWED),
        }
    }
}

fn empty(status: StatusCode) -> HttpResponse<Full<Bytes>> {
    HttpResponse::builder()
        .status(status)
        .body(Full::new(Bytes::new()))
        .expect("static response must build")
}

fn json(status: StatusCode, body: String) -> HttpResponse<Full<Bytes>> {
    HttpResponse::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)))
        .expect("static response must build")
}

/// HTTP 500 carrying a JSON-RPC internal error envelope, per the transport
/// contract for failures outside dispatch.
fn internal_error(detail: String) -> HttpResponse<Full<Bytes>> {
    let envelope = Response::error(
        RequestId::Null,
        ErrorObject::internal_error().with_data(detail),
    );
    let body = serde_json::to_string(&envelope).unwrap_or_default();
    json(StatusCode::INTERNAL_SERVER_ERROR, body)
}
