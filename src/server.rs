//! HTTP server and graceful shutdown.
//!
//! # Graceful shutdown and Kubernetes
//!
//! When Kubernetes terminates a pod it sends **SIGTERM** and waits
//! `terminationGracePeriodSeconds` (default 30 s) before sending SIGKILL.
//!
//! The server reacts to SIGTERM, Ctrl-C or [`Lifecycle::shutdown`] by:
//! 1. Moving to `Draining`: `/health` starts answering `503`, request
//!    contexts are cancelled, keep-alive connections close after their
//!    current response.
//! 2. Leaving the accept loop and closing the listener, so new connections
//!    are refused.
//! 3. Waiting for in-flight requests (and their responses) to finish, up to
//!    the drain timeout. Anything still running then is aborted, which
//!    drops its connection.
//! 4. Moving to `Stopped` and returning from [`Server::serve`].
//!
//! Keep the drain timeout below `terminationGracePeriodSeconds`.
//!
//! [`Lifecycle::shutdown`]: crate::Lifecycle::shutdown

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::Error;
use crate::lifecycle::Phase;
use crate::request::Request;
use crate::router::Router;

/// A bound listener waiting to serve a [`Router`].
pub struct Server {
    listener: TcpListener,
    addr: SocketAddr,
}

impl Server {
    /// Binds the listening socket. Failure is [`Error::Bind`] and is not retried.
    ///
    /// ```rust,no_run
    /// # async fn run() -> Result<(), fininsight::Error> {
    /// let server = fininsight::Server::bind("0.0.0.0:3000").await?;
    /// # Ok(()) }
    /// ```
    pub async fn bind(addr: impl ToSocketAddrs + std::fmt::Display) -> Result<Self, Error> {
        let display = addr.to_string();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| Error::Bind { addr: display.clone(), source })?;
        let addr = listener
            .local_addr()
            .map_err(|source| Error::Bind { addr: display, source })?;
        Ok(Self { listener, addr })
    }

    /// The bound address; useful when binding port `0`.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Accepts connections and dispatches them through `router` until shutdown.
    ///
    /// Returns `Ok(())` after a clean drain, or [`Error::DrainTimeout`] if
    /// requests had to be aborted. Either way the lifecycle is `Stopped`.
    pub async fn serve(self, router: Router) -> Result<(), Error> {
        let Self { listener, addr } = self;
        let lifecycle = Arc::clone(router.lifecycle());
        let router = Arc::new(router);

        // Every spawned connection task lives here so draining can wait for
        // or abort them.
        let mut connections = JoinSet::new();

        let os_signal = shutdown_signal();
        tokio::pin!(os_signal);

        lifecycle.advance(Phase::Serving);
        info!(%addr, routes = router.routes().count(), "listening");

        loop {
            tokio::select! {
                // Shutdown is checked first so a queued backlog cannot delay it.
                biased;

                () = lifecycle.shutdown_requested() => break,

                () = &mut os_signal => {
                    lifecycle.shutdown();
                    break;
                }

                res = listener.accept() => {
                    let (stream, peer) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };
                    let router = Arc::clone(&router);
                    let stop = lifecycle.shutdown_token();
                    connections.spawn(serve_connection(router, stream, peer, stop));
                }

                // Reap finished connection tasks so the set stays small.
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        // The phase already reads `Draining`: `Lifecycle::shutdown` moved it.
        drop(listener);
        let timeout = lifecycle.drain_timeout();
        info!(
            in_flight = lifecycle.in_flight(),
            connections = connections.len(),
            ?timeout,
            "draining"
        );

        let deadline = Instant::now() + timeout;
        let drained = tokio::time::timeout_at(deadline, async {
            lifecycle.idle().await;
            // Responses are still being written after handlers return.
            while connections.join_next().await.is_some() {}
        })
        .await
        .is_ok();

        let result = if drained {
            Ok(())
        } else {
            let abandoned = lifecycle.in_flight();
            warn!(
                abandoned,
                connections = connections.len(),
                ?timeout,
                "drain timeout elapsed, forcing shutdown"
            );
            connections.shutdown().await;
            Err(Error::DrainTimeout { timeout, abandoned })
        };

        lifecycle.advance(Phase::Stopped);
        info!("server stopped");
        result
    }
}

async fn serve_connection(
    router: Arc<Router>,
    stream: TcpStream,
    peer: SocketAddr,
    stop: CancellationToken,
) {
    let io = TokioIo::new(stream);
    // Called once per request on the connection.
    let svc = service_fn(move |req| {
        let router = Arc::clone(&router);
        async move { Ok::<_, Infallible>(handle(&router, req).await) }
    });

    // HTTP/1.1 or HTTP/2, whatever the client speaks.
    let builder = ConnBuilder::new(TokioExecutor::new());
    let conn = builder.serve_connection(io, svc);
    tokio::pin!(conn);

    let mut draining = false;
    loop {
        tokio::select! {
            res = conn.as_mut() => {
                if let Err(e) = res {
                    debug!(%peer, "connection error: {e}");
                }
                break;
            }
            // Finish the current request, then close instead of keeping alive.
            () = stop.cancelled(), if !draining => {
                draining = true;
                conn.as_mut().graceful_shutdown();
            }
        }
    }
}

/// Counts the request as in flight, buffers its body and dispatches it.
async fn handle(router: &Router, req: hyper::Request<Incoming>) -> http::Response<Full<Bytes>> {
    let _in_flight = router.lifecycle().track();

    let (parts, body) = req.into_parts();
    match body.collect().await {
        Ok(collected) => {
            let req = Request::from_http(http::Request::from_parts(parts, collected.to_bytes()));
            router.dispatch(req).await.into_http()
        }
        Err(e) => {
            debug!("failed to read request body: {e}");
            let req = Request::from_http(http::Request::from_parts(parts, Bytes::new()));
            router.reject_unreadable(req).await.into_http()
        }
    }
}

/// Resolves on the first SIGTERM or SIGINT (Ctrl-C).
///
/// If a handler cannot be installed the corresponding arm never fires;
/// [`Lifecycle::shutdown`](crate::Lifecycle::shutdown) still works.
async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("received SIGINT"),
            Err(e) => {
                error!("failed to install Ctrl-C handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                info!("received SIGTERM");
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c  => {}
        () = sigterm => {}
    }
}
