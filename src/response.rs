//! Outgoing HTTP response type and the [`IntoResponse`] conversion trait.
//!
//! Build a [`Response`] in your handler and return it, or return anything
//! that implements [`IntoResponse`], including `Result<T, HandlerError>`.

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use http_body_util::Full;
use serde::Serialize;

use crate::error::HandlerError;

const JSON: &str = "application/json";
const TEXT: &str = "text/plain; charset=utf-8";

// ── Response ─────────────────────────────────────────────────────────────────

/// An outgoing HTTP response.
///
/// # Shortcuts (200 OK)
///
/// ```rust
/// use fininsight::Response;
/// use http::StatusCode;
///
/// Response::json(&serde_json::json!({ "id": 1 }));
/// Response::text("hello");
/// Response::status(StatusCode::NO_CONTENT);
/// ```
///
/// # Builder (custom status or headers)
///
/// ```rust
/// use fininsight::Response;
/// use http::{StatusCode, header::LOCATION, HeaderValue};
///
/// Response::builder()
///     .status(StatusCode::CREATED)
///     .header(LOCATION, HeaderValue::from_static("/users/42"))
///     .json(&serde_json::json!({ "id": 42 }));
/// ```
#[derive(Debug)]
pub struct Response {
    pub(crate) status: StatusCode,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
}

impl Response {
    /// `200 OK` with a serde-serialised JSON body.
    ///
    /// A value that fails to serialise yields a bare `500`.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Self {
        Self::builder().json(value)
    }

    /// `200 OK`, `text/plain; charset=utf-8`.
    pub fn text(body: impl Into<String>) -> Self {
        Self::builder().text(body)
    }

    /// Response with no body.
    pub fn status(code: StatusCode) -> Self {
        Self { status: code, headers: HeaderMap::new(), body: Bytes::new() }
    }

    /// `{"error": message}` with the given status.
    pub fn error(code: StatusCode, message: &str) -> Self {
        Self::builder().status(code).json(&serde_json::json!({ "error": message }))
    }

    /// Builder for responses that need a custom status or extra headers.
    pub fn builder() -> ResponseBuilder {
        ResponseBuilder { headers: HeaderMap::new(), status: StatusCode::OK }
    }

    pub fn status_code(&self) -> StatusCode { self.status }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &[u8] { &self.body }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn insert_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    pub(crate) fn into_http(self) -> http::Response<Full<Bytes>> {
        let mut res = http::Response::new(Full::new(self.body));
        *res.status_mut() = self.status;
        *res.headers_mut() = self.headers;
        res
    }
}

// ── ResponseBuilder ───────────────────────────────────────────────────────────

/// Fluent builder for [`Response`].
///
/// Obtain via [`Response::builder()`]. Defaults to `200 OK`.
/// Terminated by a typed body method.
pub struct ResponseBuilder {
    headers: HeaderMap,
    status: StatusCode,
}

impl ResponseBuilder {
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code;
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn json<T: Serialize + ?Sized>(self, value: &T) -> Response {
        match serde_json::to_vec(value) {
            Ok(body) => self.finish(JSON, body.into()),
            Err(e) => {
                tracing::error!(error = %e, "response serialisation failed");
                Response::status(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    pub fn text(self, body: impl Into<String>) -> Response {
        self.finish(TEXT, body.into().into())
    }

    /// Terminate with an explicit content type, e.g. the Prometheus exposition format.
    pub fn bytes(self, content_type: &'static str, body: impl Into<Bytes>) -> Response {
        self.finish(content_type, body.into())
    }

    /// Terminate with no body (e.g. `204 No Content`).
    pub fn no_body(self) -> Response {
        Response { status: self.status, headers: self.headers, body: Bytes::new() }
    }

    fn finish(mut self, content_type: &'static str, body: Bytes) -> Response {
        self.headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        Response { status: self.status, headers: self.headers, body }
    }
}

// ── IntoResponse ──────────────────────────────────────────────────────────────

/// Conversion into an HTTP [`Response`].
///
/// Implement on your own types to return them directly from handlers.
pub trait IntoResponse {
    fn into_response(self) -> Response;
}

impl IntoResponse for Response {
    fn into_response(self) -> Response { self }
}

impl IntoResponse for &'static str {
    fn into_response(self) -> Response { Response::text(self) }
}

impl IntoResponse for String {
    fn into_response(self) -> Response { Response::text(self) }
}

/// Return a bare status from a handler: `return StatusCode::NO_CONTENT`
impl IntoResponse for StatusCode {
    fn into_response(self) -> Response { Response::status(self) }
}

impl<T: IntoResponse> IntoResponse for Result<T, HandlerError> {
    fn into_response(self) -> Response {
        match self {
            Ok(v) => v.into_response(),
            Err(e) => e.into_response(),
        }
    }
}

/// Prometheus-style status class label: `"2xx"`, `"4xx"`, …
pub(crate) fn status_class(status: StatusCode) -> &'static str {
    match status.as_u16() {
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        _ => "5xx",
    }
}
