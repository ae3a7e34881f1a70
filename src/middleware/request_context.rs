//! Per-request identity, arrival time and cancellation.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use async_trait::async_trait;
use http::{HeaderValue, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info_span, warn};
use uuid::Uuid;

use super::{Next, Stage};
use crate::lifecycle::Lifecycle;
use crate::request::Request;
use crate::response::Response;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Data owned by exactly one request.
///
/// Handlers read it with [`Request::context`].
#[derive(Clone, Debug)]
pub struct RequestContext {
    id: Arc<str>,
    received_at: SystemTime,
    started: Instant,
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl RequestContext {
    pub fn new(cancel: CancellationToken, timeout: Option<Duration>) -> Self {
        let started = Instant::now();
        Self {
            id: Uuid::new_v4().to_string().into(),
            received_at: SystemTime::now(),
            started,
            deadline: timeout.map(|t| started + t),
            cancel,
        }
    }

    pub fn id(&self) -> &str { &self.id }
    pub fn received_at(&self) -> SystemTime { self.received_at }
    pub fn elapsed(&self) -> Duration { self.started.elapsed() }
    pub fn deadline(&self) -> Option<Instant> { self.deadline }

    /// True once the server has started draining.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the server starts draining.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

/// First stage of every chain: attaches a [`RequestContext`], opens the
/// `request` span and stamps `x-request-id` on the response.
pub struct RequestContextStage {
    lifecycle: Arc<Lifecycle>,
    timeout: Option<Duration>,
}

impl RequestContextStage {
    pub fn new(lifecycle: Arc<Lifecycle>, timeout: Option<Duration>) -> Self {
        Self { lifecycle, timeout }
    }
}

#[async_trait]
impl Stage for RequestContextStage {
    fn name(&self) -> &'static str { "request_context" }

    async fn process(&self, mut req: Request, next: Next<'_>) -> Response {
        let ctx = RequestContext::new(self.lifecycle.shutdown_token(), self.timeout);
        let id = Arc::clone(&ctx.id);
        let span = info_span!("request", id = %id, method = %req.method(), path = %req.path());
        req.extensions_mut().insert(ctx);

        let mut res = next.run(req).instrument(span).await;

        if let Ok(value) = HeaderValue::from_str(&id) {
            res.insert_header(http::header::HeaderName::from_static(REQUEST_ID_HEADER), value);
        }
        res
    }
}

/// Enforces the deadline set on the [`RequestContext`], answering `504`
/// once it passes. Sits inside the metrics stage so timeouts are counted.
pub struct DeadlineStage;

#[async_trait]
impl Stage for DeadlineStage {
    fn name(&self) -> &'static str { "deadline" }

    async fn process(&self, req: Request, next: Next<'_>) -> Response {
        let Some(at) = req.context().and_then(RequestContext::deadline) else {
            return next.run(req).await;
        };
        match tokio::time::timeout_at(at.into(), next.run(req)).await {
            Ok(res) => res,
            Err(_) => {
                warn!("request deadline exceeded");
                Response::error(StatusCode::GATEWAY_TIMEOUT, "request timed out")
            }
        }
    }
}
