use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use super::{Next, Stage};
use crate::metrics::Metrics;
use crate::request::Request;
use crate::response::Response;

/// Records one metrics observation per request for a single route.
///
/// Built per route so the route pattern label is fixed at registration.
pub struct ObserveStage {
    metrics: Arc<Metrics>,
    route: String,
}

impl ObserveStage {
    pub fn new(metrics: Arc<Metrics>, route: impl Into<String>) -> Self {
        Self { metrics, route: route.into() }
    }
}

#[async_trait]
impl Stage for ObserveStage {
    fn name(&self) -> &'static str { "metrics" }

    async fn process(&self, req: Request, next: Next<'_>) -> Response {
        let started = Instant::now();
        let method = req.method().clone();
        let res = next.run(req).await;
        self.metrics.observe(&method, &self.route, res.status_code(), started.elapsed());
        res
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http::{Method, StatusCode};

    use super::*;
    use crate::middleware::Chain;

    #[tokio::test]
    async fn error_responses_are_counted() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let chain = Chain::new(|_req: Request| async { StatusCode::BAD_GATEWAY })
            .stage(Arc::new(ObserveStage::new(Arc::clone(&metrics), "/upstream")));
        let req = Request::from_http(http::Request::get("/upstream").body(Bytes::new()).unwrap());
        chain.run(req).await;
        assert_eq!(metrics.request_count(&Method::GET, "/upstream", "5xx"), 1);
        assert_eq!(metrics.request_count(&Method::GET, "/upstream", "2xx"), 0);
    }
}
