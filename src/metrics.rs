//! Prometheus request metrics.
//!
//! Every completed request is observed exactly once, labelled by method,
//! route pattern (never the raw path, so cardinality stays bounded) and status
//! class. The registry is owned by the [`Metrics`] value rather than the
//! process-global default, so several servers can coexist in one process.

use std::time::Duration;

use http::{Method, StatusCode};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

use crate::response::status_class;

/// Route label used for requests that matched no registered route.
pub const UNMATCHED_ROUTE: &str = "<unmatched>";
/// CORS preflights, answered before route lookup.
pub const PREFLIGHT_ROUTE: &str = "<preflight>";
/// Requests that arrived after the server stopped.
pub const STOPPED_ROUTE: &str = "<stopped>";
/// Requests whose body could not be read off the connection.
pub const UNREADABLE_ROUTE: &str = "<unreadable>";

pub struct Metrics {
    registry: Registry,
    requests_total: IntCounterVec,
    request_duration: HistogramVec,
    in_flight: IntGauge,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "Total number of HTTP requests completed"),
            &["method", "route", "status"],
        )?;
        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "HTTP request latency in seconds",
            ),
            &["method", "route"],
        )?;
        let in_flight = IntGauge::new(
            "http_requests_in_flight",
            "Requests accepted but not yet responded to",
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(request_duration.clone()))?;
        registry.register(Box::new(in_flight.clone()))?;

        Ok(Self { registry, requests_total, request_duration, in_flight })
    }

    /// Records one completed request.
    pub fn observe(&self, method: &Method, route: &str, status: StatusCode, latency: Duration) {
        self.requests_total
            .with_label_values(&[method.as_str(), route, status_class(status)])
            .inc();
        self.request_duration
            .with_label_values(&[method.as_str(), route])
            .observe(latency.as_secs_f64());
    }

    /// Completed requests for one (method, route, status class) series.
    pub fn request_count(&self, method: &Method, route: &str, class: &str) -> u64 {
        self.requests_total
            .with_label_values(&[method.as_str(), route, class])
            .get()
    }

    pub fn set_in_flight(&self, n: usize) {
        self.in_flight.set(i64::try_from(n).unwrap_or(i64::MAX));
    }

    /// Text exposition snapshot. Collectors are read atomically, writers never wait on it.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}
