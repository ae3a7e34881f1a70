//! Built-in probe handlers: `/health` for orchestrators, `/metrics` for Prometheus.
//!
//! | Path | Phase | Answer |
//! |---|---|---|
//! | `/health` | Starting / Serving | `200 {"status":"healthy","timestamp":…}` |
//! | `/health` | Draining | `503 {"status":"draining","timestamp":…}` |
//! | `/metrics` | any | Prometheus text exposition |
//!
//! Reporting `draining` lets a load balancer pull the instance out of rotation
//! while in-flight requests finish, instead of routing new work to a server
//! that has already stopped accepting it.

use std::sync::Arc;

use http::StatusCode;
use serde::Serialize;

use crate::handler::Handler;
use crate::lifecycle::{Lifecycle, Phase};
use crate::request::Request;
use crate::response::Response;
use crate::state::AppContext;

const PROMETHEUS_TEXT: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub timestamp: i64,
}

/// `GET /health`. No auth, no side effects beyond the timestamp high-water mark.
pub fn health(lifecycle: Arc<Lifecycle>) -> impl Handler {
    move |_req: Request| {
        let lifecycle = Arc::clone(&lifecycle);
        async move { report(&lifecycle) }
    }
}

fn report(lifecycle: &Lifecycle) -> Response {
    let timestamp = lifecycle.health_timestamp();
    let (status, code) = match lifecycle.phase() {
        Phase::Starting | Phase::Serving => ("healthy", StatusCode::OK),
        Phase::Draining | Phase::Stopped => ("draining", StatusCode::SERVICE_UNAVAILABLE),
    };
    Response::builder().status(code).json(&Health { status, timestamp })
}

/// `GET /metrics`. Refreshes the in-flight gauge, then renders the registry.
pub fn metrics(app: AppContext) -> impl Handler {
    move |_req: Request| {
        let app = app.clone();
        async move {
            app.metrics.set_in_flight(app.lifecycle.in_flight());
            match app.metrics.render() {
                Ok(text) => Response::builder().bytes(PROMETHEUS_TEXT, text),
                Err(e) => {
                    tracing::error!(error = %e, "failed to gather metrics");
                    Response::status(StatusCode::INTERNAL_SERVER_ERROR)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn draining_is_reported() {
        let lifecycle = Lifecycle::new(Duration::from_secs(1));
        lifecycle.advance(Phase::Serving);
        let res = report(&lifecycle);
        assert_eq!(res.status_code(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["status"], "healthy");
        let first = body["timestamp"].as_i64().unwrap();

        lifecycle.advance(Phase::Draining);
        let res = report(&lifecycle);
        assert_eq!(res.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["status"], "draining");
        assert!(body["timestamp"].as_i64().unwrap() >= first);
    }
}
