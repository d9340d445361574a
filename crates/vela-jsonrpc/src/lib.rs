//! # JSON-RPC 2.0 server core
//!
//! Transport-agnostic JSON-RPC server used by the node's versioned RPC
//! APIs. The crate is split along the request path:
//!
//! - [`request`] / [`response`] / [`error`] — wire envelopes.
//! - [`method`] — typed method descriptors, parameter binding, registry.
//! - [`server`] — dispatch core: batches, bounded worker pool, middleware.
//! - [`middleware`] — interception points and the built-in metrics reporter.
//! - [`context`] — per-request context and transport connection handles.
//! - [`http`] / [`ws`] — hyper-based HTTP adapter and the WebSocket driver.
//!
//! Registration happens up front through [`ServerBuilder`]; once built, the
//! server is immutable and cheap to clone into connection tasks:
//!
//! ```rust,no_run
//! use vela_jsonrpc::{Method, Parameter, RequestContext, Server};
//!
//! let server = Server::builder(8)
//!     .register_method(Method::new(
//!         "subtract",
//!         vec![Parameter::required("minuend"), Parameter::required("subtrahend")],
//!         |_ctx: RequestContext, a: i64, b: i64| async move { Ok(a - b) },
//!     ))
//!     .unwrap()
//!     .build();
//! ```

pub mod context;
pub mod error;
pub mod http;
pub mod method;
pub mod middleware;
pub mod request;
pub mod response;
pub mod server;
mod ws;

pub use context::{ConnectionClosed, ConnectionHandle, RequestContext};
pub use error::{codes, ErrorObject};
pub use http::{HttpServer, TransportConfig, MAX_REQUEST_BODY_SIZE};
pub use method::{IntoHandler, Method, MethodRegistry, ParamValidator, Parameter, RegistryError};
pub use middleware::{MetricsMiddleware, Middleware, RequestReporter};
pub use request::{Params, Request, RequestId, VERSION};
pub use response::Response;
pub use server::{Next, Server, ServerBuilder};
