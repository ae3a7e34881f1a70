//! Middleware layer.
//!
//! Middleware is an ordered list of [`Stage`]s wrapped around a handler. Each
//! stage gets the request and a [`Next`] continuation; it can inspect or
//! annotate the request, short-circuit with its own response, or call
//! `next.run(req)` and post-process what comes back.
//!
//! The router composes one [`Chain`] per route at registration time, always in
//! the same order:
//!
//! ```text
//! RequestContextStage → ObserveStage → DeadlineStage (if configured) → AuthGate (protected only) → recovery → handler
//! ```
//!
//! Recovery is not a stage: it is the innermost step of every chain, so a
//! panicking handler still produces a response the outer stages can count and
//! tag.

mod auth;
mod cors;
mod observe;
mod request_context;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use http::StatusCode;
use tracing::error;

use crate::handler::{BoxedHandler, Handler};
use crate::request::Request;
use crate::response::{IntoResponse, Response};

pub use auth::AuthGate;
pub use cors::CorsPolicy;
pub use observe::ObserveStage;
pub use request_context::{DeadlineStage, REQUEST_ID_HEADER, RequestContext, RequestContextStage};

/// One step of a middleware chain.
#[async_trait]
pub trait Stage: Send + Sync + 'static {
    /// Short name used in logs and route listings.
    fn name(&self) -> &'static str;

    async fn process(&self, req: Request, next: Next<'_>) -> Response;
}

/// The remainder of a chain, handed to each stage.
pub struct Next<'a> {
    stages: &'a [Arc<dyn Stage>],
    endpoint: &'a BoxedHandler,
}

impl Next<'_> {
    pub async fn run(self, req: Request) -> Response {
        match self.stages.split_first() {
            Some((stage, rest)) => {
                stage.process(req, Next { stages: rest, endpoint: self.endpoint }).await
            }
            None => recover(self.endpoint, req).await,
        }
    }
}

/// Stages plus the handler they wrap.
pub struct Chain {
    stages: Vec<Arc<dyn Stage>>,
    endpoint: BoxedHandler,
}

impl Chain {
    pub fn new(handler: impl Handler) -> Self {
        Self { stages: Vec::new(), endpoint: handler.into_boxed_handler() }
    }

    /// Appends a stage; it runs after every stage already added.
    pub fn stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub async fn run(&self, req: Request) -> Response {
        Next { stages: &self.stages, endpoint: &self.endpoint }.run(req).await
    }
}

/// Runs the handler, turning a panic into a `500`.
async fn recover(handler: &BoxedHandler, req: Request) -> Response {
    let handler = Arc::clone(handler);
    // The handler is called inside the async block so a panic before its
    // first await is caught too.
    let fut = AssertUnwindSafe(async move { handler.call(req).await });
    match fut.catch_unwind().await {
        Ok(res) => res,
        Err(payload) => {
            error!(panic = %panic_message(payload.as_ref()), "handler panicked");
            Response::error(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// A handler's answer for routes nobody registered.
pub(crate) async fn not_found(_req: Request) -> Response {
    crate::error::HandlerError::NotFound("no route".to_owned()).into_response()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use bytes::Bytes;

    use super::*;

    struct Tag(&'static str, Arc<Mutex<Vec<&'static str>>>);

    #[async_trait]
    impl Stage for Tag {
        fn name(&self) -> &'static str { self.0 }

        async fn process(&self, req: Request, next: Next<'_>) -> Response {
            self.1.lock().unwrap().push(self.0);
            next.run(req).await
        }
    }

    fn get(path: &str) -> Request {
        Request::from_http(http::Request::get(path).body(Bytes::new()).unwrap())
    }

    #[tokio::test]
    async fn stages_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = Chain::new(|_req: Request| async { "ok" })
            .stage(Arc::new(Tag("first", Arc::clone(&log))))
            .stage(Arc::new(Tag("second", Arc::clone(&log))));
        let res = chain.run(get("/")).await;
        assert_eq!(res.status_code(), StatusCode::OK);
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
        assert_eq!(chain.stage_names(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn panics_become_500() {
        let chain = Chain::new(|_req: Request| async {
            if true {
                panic!("boom");
            }
            "unreachable"
        });
        let res = chain.run(get("/")).await;
        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!String::from_utf8_lossy(res.body()).contains("boom"));
    }
}
