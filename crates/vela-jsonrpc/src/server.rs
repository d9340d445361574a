//! Server core: envelope decoding, batch fan-out, middleware chaining and
//! the terminal dispatcher.
//!
//! [`Server::handle`] is the single entry point for every transport. It
//! decodes one envelope or a batch, runs each request through the middleware
//! chain into the dispatcher, and returns the encoded response body (or
//! nothing, when every entry was a notification).

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{error, warn};

use crate::context::RequestContext;
use crate::error::ErrorObject;
use crate::method::{Method, MethodRegistry, ParamValidator, RegistryError};
use crate::middleware::Middleware;
use crate::request::{Request, RequestId, VERSION};
use crate::response::Response;

/// Builder for [`Server`]. Methods and middlewares are fixed at build time;
/// the registry is immutable once the server starts handling traffic.
pub struct ServerBuilder {
    pool_size: usize,
    registry: MethodRegistry,
    middlewares: Vec<Arc<dyn Middleware>>,
    validator: Option<Arc<dyn ParamValidator>>,
}

impl ServerBuilder {
    /// `pool_size` bounds the number of batch entries dispatched
    /// concurrently per [`Server::handle`] call.
    pub fn new(pool_size: usize) -> Self {
        assert!(pool_size >= 1, "worker pool size must be at least 1");
        Self {
            pool_size,
            registry: MethodRegistry::default(),
            middlewares: Vec::new(),
            validator: None,
        }
    }

    pub fn register_method(mut self, method: Method) -> Result<Self, RegistryError> {
        self.registry.register(method)?;
        Ok(self)
    }

    /// Middlewares wrap the dispatcher in LIFO order: the last one
    /// registered runs outermost.
    pub fn with_middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    pub fn with_validator(mut self, validator: impl ParamValidator + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn build(self) -> Server {
        Server {
            inner: Arc::new(ServerInner {
                registry: self.registry,
                middlewares: self.middlewares,
                validator: self.validator,
                pool: Semaphore::new(self.pool_size),
            }),
        }
    }
}

/// JSON-RPC server core. Cheap to clone; transports hold one clone per
/// connection task.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    registry: MethodRegistry,
    middlewares: Vec<Arc<dyn Middleware>>,
    validator: Option<Arc<dyn ParamValidator>>,
    pool: Semaphore,
}

impl Server {
    pub fn builder(pool_size: usize) -> ServerBuilder {
        ServerBuilder::new(pool_size)
    }

    /// Process one request body. Returns the encoded response body, or
    /// `None` when nothing must be written back (notifications only).
    pub async fn handle(&self, ctx: &RequestContext, body: &[u8]) -> Option<String> {
        match body.iter().find(|b| !b.is_ascii_whitespace()) {
            Some(b'[') => self.handle_batch(ctx, body).await,
            _ => self.handle_single(ctx, body).await,
        }
    }

    async fn handle_single(&self, ctx: &RequestContext, body: &[u8]) -> Option<String> {
        let entry: Value = match serde_json::from_slice(body) {
            Ok(entry) => entry,
            Err(_) => {
                return Some(encode(&Response::error(
                    RequestId::Null,
                    ErrorObject::parse_error(),
                )))
            }
        };
        self.process_entry(ctx, entry).await.map(|resp| encode(&resp))
    }

    async fn handle_batch(&self, ctx: &RequestContext, body: &[u8]) -> Option<String> {
        let entries: Vec<Value> = match serde_json::from_slice(body) {
            Ok(entries) => entries,
            Err(_) => {
                return Some(encode(&Response::error(
                    RequestId::Null,
                    ErrorObject::parse_error(),
                )))
            }
        };
        if entries.is_empty() {
            return Some(encode(&Response::error(
                RequestId::Null,
                ErrorObject::invalid_request(),
            )));
        }

        let mut tasks = Vec::with_capacity(entries.len());
        for entry in entries {
            let server = self.clone();
            let ctx = ctx.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = server
                    .inner
                    .pool
                    .acquire()
                    .await
                    .expect("worker pool semaphore closed");
                server.process_entry(&ctx, entry).await
            }));
        }

        let mut responses = Vec::new();
        for task in tasks {
            match task.await {
                Ok(Some(response)) => responses.push(response),
                Ok(None) => {}
                Err(err) => {
                    error!(%err, "batch entry task failed");
                    responses.push(Response::error(
                        RequestId::Null,
                        ErrorObject::internal_error(),
                    ));
                }
            }
        }

        if responses.is_empty() {
            return None;
        }
        match serde_json::to_string(&responses) {
            Ok(body) => Some(body),
            Err(err) => {
                error!(%err, "failed to encode batch response");
                Some(encode(&Response::error(
                    RequestId::Null,
                    ErrorObject::internal_error(),
                )))
            }
        }
    }

    async fn process_entry(&self, ctx: &RequestContext, entry: Value) -> Option<Response> {
        let request: Request = match serde_json::from_value(entry) {
            Ok(request) => request,
            Err(_) => {
                return Some(Response::error(
                    RequestId::Null,
                    ErrorObject::invalid_request(),
                ))
            }
        };
        run_chain(&self.inner.middlewares, self, ctx, &request).await
    }

    /// Terminal dispatcher: lookup, bind, invoke. Handlers run on their own
    /// task so a panic is contained and shaped into an internal error.
    pub(crate) async fn dispatch(&self, ctx: &RequestContext, request: &Request) -> Option<Response> {
        let outcome = self.dispatch_inner(ctx, request).await;
        // Notifications execute but never produce a response element.
        let id = request.id.clone()?;
        Some(match outcome {
            Ok(result) => Response::success(id, result),
            Err(err) => Response::error(id, err),
        })
    }

    async fn dispatch_inner(
        &self,
        ctx: &RequestContext,
        request: &Request,
    ) -> Result<Value, ErrorObject> {
        if request.jsonrpc != VERSION {
            return Err(ErrorObject::invalid_request()
                .with_data(format!("unsupported jsonrpc version: {:?}", request.jsonrpc)));
        }
        let method = self
            .inner
            .registry
            .get(&request.method)
            .ok_or_else(ErrorObject::method_not_found)?;
        let args = method.bind_params(request.params.as_ref(), self.inner.validator.as_deref())?;

        match tokio::spawn(method.invoke(ctx.clone(), args)).await {
            Ok(outcome) => outcome,
            Err(err) if err.is_panic() => {
                error!(method = %request.method, "handler panicked");
                Err(ErrorObject::internal_error().with_data("handler panicked"))
            }
            Err(err) => {
                warn!(method = %request.method, %err, "handler task aborted");
                Err(ErrorObject::internal_error().with_data("handler aborted"))
            }
        }
    }
}

fn encode(response: &Response) -> String {
    serde_json::to_string(response).unwrap_or_else(|err| {
        error!(%err, "failed to encode response");
        r#"{"jsonrpc":"2.0","error":{"code":-32603,"message":"Internal error"},"id":null}"#
            .to_owned()
    })
}

/// Continuation handed to a middleware; [`Next::run`] resumes the chain.
pub struct Next<'a> {
    rest: &'a [Arc<dyn Middleware>],
    server: &'a Server,
}

impl Next<'_> {
    pub async fn run(self, ctx: &RequestContext, request: &Request) -> Option<Response> {
        run_chain(self.rest, self.server, ctx, request).await
    }
}

fn run_chain<'a>(
    middlewares: &'a [Arc<dyn Middleware>],
    server: &'a Server,
    ctx: &'a RequestContext,
    request: &'a Request,
) -> BoxFuture<'a, Option<Response>> {
    Box::pin(async move {
        match middlewares.split_last() {
            Some((outer, rest)) => outer.handle(ctx, request, Next { rest, server }).await,
            None => server.dispatch(ctx, request).await,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::Parameter;
    use crate::middleware::{MetricsMiddleware, RequestReporter};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    fn subtract() -> Method {
        Method::new(
            "subtract",
            vec![
                Parameter::required("minuend"),
                Parameter::required("subtrahend"),
            ],
            |_ctx: RequestContext, minuend: i64, subtrahend: i64| async move { Ok(minuend - subtrahend) },
        )
    }

    fn server_with_subtract() -> Server {
        Server::builder(2)
            .register_method(subtract())
            .unwrap()
            .build()
    }

    async fn handle(server: &Server, body: &str) -> Option<String> {
        server.handle(&RequestContext::new(), body.as_bytes()).await
    }

    #[tokio::test]
    async fn named_params_bind_in_declaration_order() {
        let server = server_with_subtract();
        let response = handle(
            &server,
            r#"{"jsonrpc": "2.0", "method": "subtract", "params": {"minuend": 42, "subtrahend": 23}, "id": 4}"#,
        )
        .await
        .unwrap();
        assert_eq!(response, r#"{"jsonrpc":"2.0","result":19,"id":4}"#);
    }

    #[tokio::test]
    async fn positional_params_bind_by_index() {
        let server = server_with_subtract();
        let response = handle(
            &server,
            r#"{"jsonrpc": "2.0", "method": "subtract", "params": [42, 23], "id": 1}"#,
        )
        .await
        .unwrap();
        assert_eq!(response, r#"{"jsonrpc":"2.0","result":19,"id":1}"#);
    }

    #[tokio::test]
    async fn parse_failure_answers_with_null_id() {
        let server = server_with_subtract();
        let response = handle(&server, "{not json").await.unwrap();
        let response: Response = serde_json::from_str(&response).unwrap();
        assert_eq!(response.id, RequestId::Null);
        assert_eq!(response.error.unwrap().code, crate::error::codes::PARSE_ERROR);
    }

    #[tokio::test]
    async fn unknown_method_is_reported() {
        let server = server_with_subtract();
        let response = handle(&server, r#"{"jsonrpc": "2.0", "method": "nope", "id": 7}"#)
            .await
            .unwrap();
        let response: Response = serde_json::from_str(&response).unwrap();
        assert_eq!(response.id, RequestId::Number(7));
        assert_eq!(
            response.error.unwrap().code,
            crate::error::codes::METHOD_NOT_FOUND
        );
    }

    #[tokio::test]
    async fn wrong_protocol_version_is_an_invalid_request() {
        let server = server_with_subtract();
        let response = handle(
            &server,
            r#"{"jsonrpc": "1.0", "method": "subtract", "params": [1, 1], "id": 2}"#,
        )
        .await
        .unwrap();
        let response: Response = serde_json::from_str(&response).unwrap();
        assert_eq!(
            response.error.unwrap().code,
            crate::error::codes::INVALID_REQUEST
        );
    }

    #[tokio::test]
    async fn notifications_are_silent() {
        let server = server_with_subtract();
        let response = handle(
            &server,
            r#"{"jsonrpc": "2.0", "method": "subtract", "params": [1, 1]}"#,
        )
        .await;
        assert_eq!(response, None);
    }

    #[tokio::test]
    async fn batch_filters_notifications() {
        let server = server_with_subtract();
        let response = handle(
            &server,
            r#"[{"jsonrpc": "2.0", "id": 1, "method": "subtract", "params": [5, 3]},
                {"jsonrpc": "2.0", "method": "subtract", "params": [1, 1]}]"#,
        )
        .await
        .unwrap();
        let responses: Vec<Response> = serde_json::from_str(&response).unwrap();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].id, RequestId::Number(1));
        assert_eq!(responses[0].result, Some(json!(2)));
    }

    #[tokio::test]
    async fn all_notification_batches_yield_no_body() {
        let server = server_with_subtract();
        let response = handle(
            &server,
            r#"[{"jsonrpc": "2.0", "method": "subtract", "params": [5, 3]},
                {"jsonrpc": "2.0", "method": "subtract", "params": [1, 1]}]"#,
        )
        .await;
        assert_eq!(response, None);
    }

    #[tokio::test]
    async fn empty_batches_are_invalid() {
        let server = server_with_subtract();
        let response = handle(&server, "[]").await.unwrap();
        let response: Response = serde_json::from_str(&response).unwrap();
        assert_eq!(response.id, RequestId::Null);
        assert_eq!(
            response.error.unwrap().code,
            crate::error::codes::INVALID_REQUEST
        );
    }

    #[tokio::test]
    async fn batch_entries_are_isolated() {
        let server = server_with_subtract();
        let response = handle(
            &server,
            r#"[{"jsonrpc": "2.0", "id": 1, "method": "subtract", "params": [5, 3]},
                {"jsonrpc": "2.0", "id": 2, "method": "missing"},
                "garbage"]"#,
        )
        .await
        .unwrap();
        let responses: Vec<Response> = serde_json::from_str(&response).unwrap();
        assert_eq!(responses.len(), 3);

        let by_id = |id: RequestId| {
            responses
                .iter()
                .find(|r| r.id == id)
                .expect("response present")
        };
        assert_eq!(by_id(RequestId::Number(1)).result, Some(json!(2)));
        assert_eq!(
            by_id(RequestId::Number(2)).error.as_ref().unwrap().code,
            crate::error::codes::METHOD_NOT_FOUND
        );
        assert_eq!(
            by_id(RequestId::Null).error.as_ref().unwrap().code,
            crate::error::codes::INVALID_REQUEST
        );
    }

    #[tokio::test]
    async fn duplicate_ids_in_a_batch_are_permitted() {
        let server = server_with_subtract();
        let response = handle(
            &server,
            r#"[{"jsonrpc": "2.0", "id": 1, "method": "subtract", "params": [5, 3]},
                {"jsonrpc": "2.0", "id": 1, "method": "subtract", "params": [3, 1]}]"#,
        )
        .await
        .unwrap();
        let responses: Vec<Response> = serde_json::from_str(&response).unwrap();
        assert_eq!(responses.len(), 2);
        assert!(responses.iter().all(|r| r.id == RequestId::Number(1)));
    }

    #[tokio::test]
    async fn handler_panics_become_internal_errors() {
        let server = Server::builder(1)
            .register_method(Method::new("boom", vec![], |_ctx: RequestContext| async move {
                if true {
                    panic!("kaboom");
                }
                Ok(())
            }))
            .unwrap()
            .build();

        let response = handle(&server, r#"{"jsonrpc": "2.0", "method": "boom", "id": 1}"#)
            .await
            .unwrap();
        let response: Response = serde_json::from_str(&response).unwrap();
        assert_eq!(
            response.error.unwrap().code,
            crate::error::codes::INTERNAL_ERROR
        );

        // The server keeps serving after a handler panic.
        let response = handle(&server, r#"{"jsonrpc": "2.0", "method": "boom", "id": 2}"#)
            .await
            .unwrap();
        assert!(response.contains("-32603"));
    }

    #[tokio::test]
    async fn handler_errors_pass_through_verbatim() {
        let server = Server::builder(1)
            .register_method(Method::new("fail", vec![], |_ctx: RequestContext| async move {
                Err::<(), _>(ErrorObject::new(24, "Block not found").with_data("0x1"))
            }))
            .unwrap()
            .build();

        let response = handle(&server, r#"{"jsonrpc": "2.0", "method": "fail", "id": 1}"#)
            .await
            .unwrap();
        let response: Response = serde_json::from_str(&response).unwrap();
        let error = response.error.unwrap();
        assert_eq!(error.code, 24);
        assert_eq!(error.data, Some(json!("0x1")));
    }

    #[derive(Default)]
    struct CountingReporter {
        requests: AtomicUsize,
        errors: AtomicUsize,
        durations: AtomicUsize,
    }

    impl RequestReporter for CountingReporter {
        fn report_request(&self, _method: &str) {
            self.requests.fetch_add(1, Ordering::SeqCst);
        }
        fn report_request_duration(&self, _method: &str, _duration: Duration) {
            self.durations.fetch_add(1, Ordering::SeqCst);
        }
        fn report_request_error(&self, _method: &str, _code: i64) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn metrics_middleware_reports_each_request_once() {
        let reporter = Arc::new(CountingReporter::default());
        let server = Server::builder(1)
            .register_method(subtract())
            .unwrap()
            .with_middleware(MetricsMiddleware::new(reporter.clone()))
            .build();

        let response = handle(
            &server,
            r#"{"jsonrpc": "2.0", "method": "subtract", "params": {"minuend": 42, "subtrahend": 23}, "id": 4}"#,
        )
        .await
        .unwrap();
        assert_eq!(response, r#"{"jsonrpc":"2.0","result":19,"id":4}"#);
        assert_eq!(reporter.requests.load(Ordering::SeqCst), 1);
        assert_eq!(reporter.durations.load(Ordering::SeqCst), 1);
        assert_eq!(reporter.errors.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn chained_metrics_middlewares_both_report() {
        let reporter = Arc::new(CountingReporter::default());
        let server = Server::builder(1)
            .register_method(subtract())
            .unwrap()
            .with_middleware(MetricsMiddleware::new(reporter.clone()))
            .with_middleware(MetricsMiddleware::new(reporter.clone()))
            .build();

        let response = handle(
            &server,
            r#"{"jsonrpc": "2.0", "method": "subtract", "params": {"minuend": 42, "subtrahend": 23}, "id": 4}"#,
        )
        .await
        .unwrap();
        assert_eq!(response, r#"{"jsonrpc":"2.0","result":19,"id":4}"#);
        assert_eq!(reporter.requests.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn metrics_middleware_reports_error_codes() {
        let reporter = Arc::new(CountingReporter::default());
        let server = Server::builder(1)
            .register_method(subtract())
            .unwrap()
            .with_middleware(MetricsMiddleware::new(reporter.clone()))
            .build();

        handle(&server, r#"{"jsonrpc": "2.0", "method": "missing", "id": 1}"#)
            .await
            .unwrap();
        assert_eq!(reporter.errors.load(Ordering::SeqCst), 1);
    }

    struct TracingMiddleware {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Middleware for TracingMiddleware {
        async fn handle(
            &self,
            ctx: &RequestContext,
            request: &Request,
            next: Next<'_>,
        ) -> Option<Response> {
            self.log.lock().unwrap().push(format!("enter {}", self.name));
            let response = next.run(ctx, request).await;
            self.log.lock().unwrap().push(format!("exit {}", self.name));
            response
        }
    }

    #[tokio::test]
    async fn middlewares_wrap_in_lifo_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let server = Server::builder(1)
            .register_method(subtract())
            .unwrap()
            .with_middleware(TracingMiddleware {
                name: "m1",
                log: log.clone(),
            })
            .with_middleware(TracingMiddleware {
                name: "m2",
                log: log.clone(),
            })
            .build();

        handle(
            &server,
            r#"{"jsonrpc": "2.0", "method": "subtract", "params": [1, 1], "id": 1}"#,
        )
        .await
        .unwrap();

        let log = log.lock().unwrap();
        assert_eq!(*log, vec!["enter m2", "enter m1", "exit m1", "exit m2"]);
    }

    struct ShortCircuit;

    #[async_trait]
    impl Middleware for ShortCircuit {
        async fn handle(
            &self,
            _ctx: &RequestContext,
            request: &Request,
            _next: Next<'_>,
        ) -> Option<Response> {
            let id = request.id.clone()?;
            Some(Response::error(id, ErrorObject::new(-32000, "rate limited")))
        }
    }

    #[tokio::test]
    async fn middleware_may_short_circuit() {
        let server = Server::builder(1)
            .register_method(subtract())
            .unwrap()
            .with_middleware(ShortCircuit)
            .build();

        let response = handle(
            &server,
            r#"{"jsonrpc": "2.0", "method": "subtract", "params": [1, 1], "id": 1}"#,
        )
        .await
        .unwrap();
        let response: Response = serde_json::from_str(&response).unwrap();
        assert_eq!(response.error.unwrap().code, -32000);
    }
}
