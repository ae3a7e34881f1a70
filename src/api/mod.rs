//! The service's route table.
//!
//! ```text
//! GET  /                              public   welcome banner
//! GET  /health                        public   lifecycle-aware health probe
//! GET  /metrics                       public   Prometheus scrape
//! POST /api/v1/users/register         public
//! POST /api/v1/users/login            public
//! GET  /api/v1/users/profile          bearer
//! GET  /api/v1/financial/data         bearer
//! POST /api/v1/financial/data         bearer
//! GET  /api/v1/financial/analytics    bearer
//! ```

mod financial;
mod users;

use std::future::Future;
use std::sync::Arc;

use http::Method;
use serde::Serialize;
use uuid::Uuid;

use crate::auth::JwtValidator;
use crate::error::{ConfigurationError, HandlerError};
use crate::handler::Handler;
use crate::health;
use crate::request::Request;
use crate::response::Response;
use crate::router::Router;
use crate::services::{FinancialService, UserService};

/// Collaborators the API handlers need.
#[derive(Clone)]
pub struct Api {
    pub users: Arc<dyn UserService>,
    pub financial: Arc<dyn FinancialService>,
    pub tokens: Arc<JwtValidator>,
}

/// Registers every route of the service on `router`.
pub fn register_routes(router: &mut Router, api: Api) -> Result<(), ConfigurationError> {
    let app = router.app().clone();
    router
        .public(Method::GET, "/", root)?
        .public(Method::GET, "/health", health::health(app.lifecycle.clone()))?
        .public(Method::GET, "/metrics", health::metrics(app))?
        .public(Method::POST, "/api/v1/users/register", with(&api, users::register))?
        .public(Method::POST, "/api/v1/users/login", with(&api, users::login))?
        .protected(Method::GET, "/api/v1/users/profile", with(&api, users::profile))?
        .protected(Method::GET, "/api/v1/financial/data", with(&api, financial::list))?
        .protected(Method::POST, "/api/v1/financial/data", with(&api, financial::create))?
        .protected(Method::GET, "/api/v1/financial/analytics", with(&api, financial::analytics))?;
    Ok(())
}

/// Adapts `async fn(Api, Request)` into a [`Handler`].
fn with<F, Fut>(api: &Api, f: F) -> impl Handler
where
    F: Fn(Api, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, HandlerError>> + Send + 'static,
{
    let api = api.clone();
    move |req: Request| f(api.clone(), req)
}

#[derive(Serialize)]
struct Welcome {
    message: &'static str,
    version: &'static str,
    timestamp: i64,
}

async fn root(_req: Request) -> Response {
    Response::json(&Welcome {
        message: "Welcome to the FinInsight service",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: chrono::Utc::now().timestamp(),
    })
}

/// The authenticated caller's user id.
fn caller(req: &Request) -> Result<Uuid, HandlerError> {
    let identity = req.identity().ok_or(HandlerError::Unauthorized)?;
    Uuid::parse_str(&identity.subject).map_err(|_| HandlerError::Unauthorized)
}
