//! Error types.
//!
//! Two families live here. [`Error`] and [`ConfigurationError`] are
//! process-level: they stop the server from starting or make `serve` report a
//! forced shutdown. [`HandlerError`] is per-request: it becomes an HTTP
//! response and never reaches the lifecycle.

use std::time::Duration;

use http::{Method, StatusCode};
use thiserror::Error;

use crate::config::SettingsError;
use crate::response::{IntoResponse, Response};

/// The error type returned by the service's fallible lifecycle operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("metrics registry: {0}")]
    Metrics(#[from] prometheus::Error),

    /// The drain deadline passed with requests still running. The server has
    /// already reached `Stopped` when this is returned.
    #[error("drain timed out after {timeout:?}, {abandoned} request(s) aborted")]
    DrainTimeout { timeout: Duration, abandoned: usize },
}

/// Startup-time misconfiguration. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("route {method} {path} is already registered")]
    DuplicateRoute { method: Method, path: String },

    #[error("invalid route {method} {path}: {reason}")]
    InvalidRoute {
        method: Method,
        path: String,
        reason: String,
    },

    #[error("invalid cors origin `{0}`")]
    InvalidOrigin(String),
}

/// Errors a handler returns instead of building an error response by hand.
///
/// Client errors carry a message that is safe to show the caller. `Internal`
/// is logged in full and answered with a bare 500.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0:#}")]
    Internal(#[source] anyhow::Error),
}

impl HandlerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(err.to_string())
    }
}

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            Self::Internal(_) => {
                // Runs inside the request span, so the id is attached.
                tracing::error!(error = ?self, "handler failed");
                "internal server error".to_owned()
            }
            Self::BadRequest(msg) | Self::NotFound(msg) | Self::Conflict(msg) => msg.clone(),
            Self::Unauthorized => "unauthorized".to_owned(),
        };
        Response::error(status, &message)
    }
}
