//! # fininsight
//!
//! The HTTP shell of a financial data service: lifecycle, routing, middleware
//! and graceful draining, with a small user and market-data API on top.
//!
//! ## What the shell owns
//!
//! - Radix-tree routing, O(path-length) lookup via [`matchit`]
//! - A fixed middleware chain per route: request context, metrics, auth gate,
//!   panic recovery
//! - A [`Lifecycle`] moving forward through `Starting → Serving → Draining →
//!   Stopped`, with an exact in-flight count
//! - Graceful shutdown on SIGTERM / Ctrl-C, bounded by a drain timeout
//! - `/health` that turns `503` while draining, `/metrics` in Prometheus text
//!
//! TLS, rate limiting and body-size limits belong to the reverse proxy in
//! front of it.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use fininsight::{AppContext, Request, Response, Router, Server, auth::JwtValidator};
//! use http::Method;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let tokens = Arc::new(JwtValidator::new(b"secret", Duration::from_secs(3600)));
//!     let app = AppContext::new(Duration::from_secs(30), tokens)?;
//!
//!     let mut router = Router::new(&app);
//!     router
//!         .public(Method::GET, "/ping", ping)?
//!         .protected(Method::GET, "/quotes/{symbol}", quote)?;
//!
//!     Server::bind("0.0.0.0:3000").await?.serve(router).await?;
//!     Ok(())
//! }
//!
//! async fn ping(_req: Request) -> &'static str {
//!     "pong"
//! }
//!
//! async fn quote(req: Request) -> Response {
//!     let symbol = req.param("symbol").unwrap_or("unknown");
//!     Response::json(&serde_json::json!({ "symbol": symbol }))
//! }
//! ```

mod error;
mod handler;
mod request;
mod response;
mod router;
mod server;
mod state;

pub mod api;
pub mod app;
pub mod auth;
pub mod config;
pub mod health;
pub mod lifecycle;
pub mod metrics;
pub mod middleware;
pub mod services;
pub mod telemetry;

pub use error::{ConfigurationError, Error, HandlerError};
pub use handler::Handler;
pub use lifecycle::{InFlight, Lifecycle, Phase};
pub use metrics::Metrics;
pub use request::Request;
pub use response::{IntoResponse, Response, ResponseBuilder};
pub use router::{Route, Router};
pub use server::Server;
pub use state::AppContext;
