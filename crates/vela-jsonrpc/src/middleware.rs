//! Request interception.
//!
//! Middlewares wrap the terminal dispatcher in LIFO order: with `[M1, M2]`
//! registered, the effective handler is `M2(M1(dispatch))`. A middleware
//! must call [`Next::run`] unless it intends to short-circuit with a
//! synthesized response.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::context::RequestContext;
use crate::request::Request;
use crate::response::Response;
use crate::server::Next;

#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(
        &self,
        ctx: &RequestContext,
        request: &Request,
        next: Next<'_>,
    ) -> Option<Response>;
}

/// Sink for request statistics. Implementations are expected to be cheap;
/// they run inline on the request path.
pub trait RequestReporter: Send + Sync {
    /// Called once per attempted call.
    fn report_request(&self, method: &str);
    /// Wall-clock time of everything downstream of this middleware.
    fn report_request_duration(&self, method: &str, duration: Duration);
    /// Called iff the response envelope carries an error.
    fn report_request_error(&self, method: &str, code: i64);
}

/// Built-in middleware feeding a [`RequestReporter`].
pub struct MetricsMiddleware {
    reporter: Arc<dyn RequestReporter>,
}

impl MetricsMiddleware {
    pub fn new(reporter: Arc<dyn RequestReporter>) -> Self {
        Self { reporter }
    }
}

#[async_trait]
impl Middleware for MetricsMiddleware {
    async fn handle(
        &self,
        ctx: &RequestContext,
        request: &Request,
        next: Next<'_>,
    ) -> Option<Response> {
        let start = Instant::now();
        let response = next.run(ctx, request).await;
        self.reporter.report_request(&request.method);
        self.reporter
            .report_request_duration(&request.method, start.elapsed());
        if let Some(error) = response.as_ref().and_then(|r| r.error.as_ref()) {
            self.reporter.report_request_error(&request.method, error.code);
        }
        response
    }
}
