//! Radix-tree request router and dispatcher.
//!
//! One tree per HTTP method, O(path-length) lookup. Literal segments win over
//! `{param}` segments, so `/users/profile` and `/users/{id}` can coexist.
//! Every route is registered once at startup together with its middleware
//! chain; dispatch only looks the chain up and runs it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use http::header::ORIGIN;
use http::{Method, StatusCode};
use matchit::Router as MatchitRouter;

use crate::error::ConfigurationError;
use crate::handler::Handler;
use crate::lifecycle::{Lifecycle, Phase};
use crate::metrics::{PREFLIGHT_ROUTE, STOPPED_ROUTE, UNMATCHED_ROUTE, UNREADABLE_ROUTE};
use crate::middleware::{
    AuthGate, Chain, CorsPolicy, DeadlineStage, ObserveStage, RequestContextStage, Stage,
    not_found,
};
use crate::request::Request;
use crate::response::Response;
use crate::state::AppContext;

/// A registered (method, path) and the chain that serves it.
pub struct Route {
    method: Method,
    path: String,
    auth_required: bool,
    chain: Chain,
}

impl Route {
    pub fn method(&self) -> &Method { &self.method }
    pub fn path(&self) -> &str { &self.path }
    pub fn auth_required(&self) -> bool { self.auth_required }
    pub fn stage_names(&self) -> Vec<&'static str> { self.chain.stage_names() }
}

/// The application router.
///
/// Build it once at startup and hand it to [`Server::serve`](crate::Server::serve).
pub struct Router {
    app: AppContext,
    trees: HashMap<Method, MatchitRouter<Arc<Route>>>,
    table: Vec<Arc<Route>>,
    context_stage: Arc<dyn Stage>,
    deadline_stage: Option<Arc<dyn Stage>>,
    auth_gate: Arc<dyn Stage>,
    fallback: Chain,
    stopped: Chain,
    unreadable: Chain,
    cors: Option<(Arc<CorsPolicy>, Chain)>,
}

impl Router {
    pub fn new(app: &AppContext) -> Self {
        Self::with_request_timeout(app, None)
    }

    /// Like [`Router::new`], but every request is answered with `504` once
    /// `timeout` has passed since it arrived.
    pub fn with_request_timeout(app: &AppContext, timeout: Option<Duration>) -> Self {
        let context_stage: Arc<dyn Stage> =
            Arc::new(RequestContextStage::new(Arc::clone(&app.lifecycle), timeout));
        Self {
            app: app.clone(),
            trees: HashMap::new(),
            table: Vec::new(),
            deadline_stage: timeout.map(|_| Arc::new(DeadlineStage) as Arc<dyn Stage>),
            auth_gate: Arc::new(AuthGate::new(Arc::clone(&app.validator))),
            fallback: observed(not_found, &context_stage, app, UNMATCHED_ROUTE),
            stopped: observed(stopped, &context_stage, app, STOPPED_ROUTE),
            unreadable: observed(unreadable, &context_stage, app, UNREADABLE_ROUTE),
            context_stage,
            cors: None,
        }
    }

    pub fn with_cors(mut self, policy: CorsPolicy) -> Self {
        let policy = Arc::new(policy);
        let answer = Arc::clone(&policy);
        let handler = move |req: Request| {
            let policy = Arc::clone(&answer);
            async move { policy.preflight(&req) }
        };
        let chain = observed(handler, &self.context_stage, &self.app, PREFLIGHT_ROUTE);
        self.cors = Some((policy, chain));
        self
    }

    /// Registers a handler for a method + path pair.
    ///
    /// Path parameters use `{name}` syntax; `req.param("name")` retrieves them.
    /// Registering the same (method, path) twice is a [`ConfigurationError`].
    ///
    /// ```rust,no_run
    /// # use fininsight::{AppContext, Request, Router, auth::JwtValidator};
    /// # use http::Method;
    /// # use std::{sync::Arc, time::Duration};
    /// # async fn get_user(_: Request) -> &'static str { "" }
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// # let app = AppContext::new(Duration::from_secs(30), Arc::new(JwtValidator::new(b"k", Duration::from_secs(60))))?;
    /// let mut router = Router::new(&app);
    /// router
    ///     .public(Method::GET, "/health", get_user)?
    ///     .protected(Method::GET, "/users/{id}", get_user)?;
    /// # Ok(()) }
    /// ```
    pub fn register(
        &mut self,
        method: Method,
        path: &str,
        auth_required: bool,
        handler: impl Handler,
    ) -> Result<&mut Self, ConfigurationError> {
        if self.table.iter().any(|r| r.method == method && r.path == path) {
            return Err(ConfigurationError::DuplicateRoute { method, path: path.to_owned() });
        }

        let mut chain = Chain::new(handler)
            .stage(Arc::clone(&self.context_stage))
            .stage(Arc::new(ObserveStage::new(Arc::clone(&self.app.metrics), path)));
        if let Some(deadline) = &self.deadline_stage {
            chain = chain.stage(Arc::clone(deadline));
        }
        if auth_required {
            chain = chain.stage(Arc::clone(&self.auth_gate));
        }

        let route = Arc::new(Route {
            method: method.clone(),
            path: path.to_owned(),
            auth_required,
            chain,
        });
        self.trees
            .entry(method.clone())
            .or_default()
            .insert(path, Arc::clone(&route))
            .map_err(|e| ConfigurationError::InvalidRoute {
                method,
                path: path.to_owned(),
                reason: e.to_string(),
            })?;
        self.table.push(route);
        Ok(self)
    }

    /// Registers a route anyone can call.
    pub fn public(
        &mut self,
        method: Method,
        path: &str,
        handler: impl Handler,
    ) -> Result<&mut Self, ConfigurationError> {
        self.register(method, path, false, handler)
    }

    /// Registers a route behind the auth gate.
    pub fn protected(
        &mut self,
        method: Method,
        path: &str,
        handler: impl Handler,
    ) -> Result<&mut Self, ConfigurationError> {
        self.register(method, path, true, handler)
    }

    pub fn routes(&self) -> impl Iterator<Item = &Route> {
        self.table.iter().map(Arc::as_ref)
    }

    pub fn app(&self) -> &AppContext { &self.app }

    pub fn lifecycle(&self) -> &Arc<Lifecycle> { &self.app.lifecycle }

    /// Routes one request through its chain and produces one response.
    ///
    /// Never fails: unknown routes are `404`, auth failures `401`, handler
    /// errors and panics `500`.
    pub async fn dispatch(&self, mut req: Request) -> Response {
        if self.app.lifecycle.phase() == Phase::Stopped {
            return self.stopped.run(req).await;
        }

        if let Some((_, preflight)) = &self.cors {
            if CorsPolicy::is_preflight(&req) {
                return preflight.run(req).await;
            }
        }

        let origin = req.headers().get(ORIGIN).cloned();
        let mut res = match self.lookup(req.method(), req.path()) {
            Some((route, params)) => {
                req.params = params;
                route.chain.run(req).await
            }
            None => self.fallback.run(req).await,
        };

        if let Some((cors, _)) = &self.cors {
            cors.decorate(origin.as_ref(), &mut res);
        }
        res
    }

    /// Answers a request whose body could not be read with `400`, still
    /// tagged and counted like any other response.
    pub(crate) async fn reject_unreadable(&self, req: Request) -> Response {
        self.unreadable.run(req).await
    }

    fn lookup(&self, method: &Method, path: &str) -> Option<(Arc<Route>, HashMap<String, String>)> {
        let tree = self.trees.get(method)?;
        let matched = tree.at(path).ok()?;
        let route = Arc::clone(matched.value);
        let params = matched.params.iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some((route, params))
    }
}

/// A chain with only the context and metrics stages, for responses the
/// router produces itself.
fn observed(handler: impl Handler, context: &Arc<dyn Stage>, app: &AppContext, label: &str) -> Chain {
    Chain::new(handler)
        .stage(Arc::clone(context))
        .stage(Arc::new(ObserveStage::new(Arc::clone(&app.metrics), label)))
}

async fn stopped(_req: Request) -> Response {
    Response::error(StatusCode::SERVICE_UNAVAILABLE, "server stopped")
}

async fn unreadable(_req: Request) -> Response {
    Response::error(StatusCode::BAD_REQUEST, "unreadable request body")
}
