//! Incoming HTTP request type.

use std::collections::HashMap;

use bytes::Bytes;
use http::{Extensions, HeaderMap, Method, Uri};
use serde::de::DeserializeOwned;

use crate::auth::Identity;
use crate::error::HandlerError;
use crate::middleware::RequestContext;

/// An incoming HTTP request with its body fully buffered.
///
/// Per-request data attached by middleware (the [`RequestContext`], the
/// caller's [`Identity`]) travels in the request's extensions.
pub struct Request {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    pub(crate) params: HashMap<String, String>,
    extensions: Extensions,
}

impl Request {
    /// Builds a request from an `http::Request` whose body is already collected.
    pub fn from_http(req: http::Request<Bytes>) -> Self {
        let (parts, body) = req.into_parts();
        Self {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body,
            params: HashMap::new(),
            extensions: parts.extensions,
        }
    }

    pub fn method(&self) -> &Method { &self.method }
    pub fn path(&self) -> &str { self.uri.path() }
    pub fn uri(&self) -> &Uri { &self.uri }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &[u8] { &self.body }

    /// Header lookup. Names are case-insensitive; non-UTF-8 values read as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/{id}`, `req.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Deserialises the JSON body. Malformed input is a `400`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, HandlerError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn extensions(&self) -> &Extensions { &self.extensions }
    pub fn extensions_mut(&mut self) -> &mut Extensions { &mut self.extensions }

    /// The context attached by the request-context stage.
    pub fn context(&self) -> Option<&RequestContext> {
        self.extensions.get()
    }

    /// The authenticated caller, present only on routes behind the auth gate.
    pub fn identity(&self) -> Option<&Identity> {
        self.extensions.get()
    }
}
