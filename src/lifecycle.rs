//! Server lifecycle: phase tracking, in-flight accounting and the shutdown token.
//!
//! ```text
//! Starting ──bind + accept loop──▶ Serving ──signal / shutdown()──▶ Draining ──idle or timeout──▶ Stopped
//! ```
//!
//! Transitions only move forward. The [`Lifecycle`] is shared (via `Arc`)
//! between the accept loop, the router's stages and anything that wants to
//! observe the server, and it is the only place the phase and the in-flight
//! count are mutated.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Default time allowed for in-flight requests to finish once draining starts.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord)]
pub enum Phase {
    Starting,
    Serving,
    Draining,
    Stopped,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Serving => "serving",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process-wide server state. Construct one per server.
pub struct Lifecycle {
    phase: watch::Sender<Phase>,
    in_flight: watch::Sender<usize>,
    shutdown: CancellationToken,
    drain_timeout: Duration,
    last_health_ts: AtomicI64,
}

impl Lifecycle {
    pub fn new(drain_timeout: Duration) -> Self {
        Self {
            phase: watch::Sender::new(Phase::Starting),
            in_flight: watch::Sender::new(0),
            shutdown: CancellationToken::new(),
            drain_timeout,
            last_health_ts: AtomicI64::new(i64::MIN),
        }
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    /// A receiver that observes every phase change.
    pub fn watch_phase(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    pub fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }

    pub fn watch_in_flight(&self) -> watch::Receiver<usize> {
        self.in_flight.subscribe()
    }

    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    /// Requests shutdown. Idempotent.
    ///
    /// The phase moves to `Draining` before the token is cancelled, so
    /// `/health` reports draining from the moment anyone can observe the
    /// shutdown. The accept loop reacts by closing the listener.
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            info!("shutdown requested");
        }
        self.advance(Phase::Draining);
        self.shutdown.cancel();
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// A token cancelled when draining begins. Handlers select on it to abort
    /// long work early instead of racing the drain deadline.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    /// Waits until shutdown has been requested.
    pub async fn shutdown_requested(&self) {
        self.shutdown.cancelled().await
    }

    /// Advances to `to` if it is later than the current phase.
    ///
    /// Returns `false` (and changes nothing) for backward or repeated moves.
    pub(crate) fn advance(&self, to: Phase) -> bool {
        let advanced = self.phase.send_if_modified(|phase| {
            if to > *phase {
                *phase = to;
                true
            } else {
                false
            }
        });
        if advanced {
            debug!(phase = %to, "lifecycle transition");
        }
        advanced
    }

    /// Marks one request as in flight until the returned guard drops.
    ///
    /// The guard decrements on every exit path: normal completion, error,
    /// panic unwinding, or the connection future being aborted.
    pub fn track(self: &Arc<Self>) -> InFlight {
        self.in_flight.send_modify(|n| *n += 1);
        InFlight { lifecycle: Arc::clone(self) }
    }

    /// Resolves once no request is in flight.
    pub async fn idle(&self) {
        let mut rx = self.in_flight.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Unix timestamp for the health probe, never lower than one already handed out.
    pub(crate) fn health_timestamp(&self) -> i64 {
        let now = chrono::Utc::now().timestamp();
        let prev = self.last_health_ts.fetch_max(now, Ordering::AcqRel);
        prev.max(now)
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new(DEFAULT_DRAIN_TIMEOUT)
    }
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("phase", &self.phase())
            .field("in_flight", &self.in_flight())
            .field("drain_timeout", &self.drain_timeout)
            .finish()
    }
}

/// RAII in-flight marker returned by [`Lifecycle::track`].
#[must_use = "the request stops counting as in flight when the guard drops"]
pub struct InFlight {
    lifecycle: Arc<Lifecycle>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.lifecycle.in_flight.send_modify(|n| {
            debug_assert!(*n > 0, "in-flight count underflow");
            *n = n.saturating_sub(1);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_only_move_forward() {
        let lc = Lifecycle::default();
        assert_eq!(lc.phase(), Phase::Starting);
        assert!(lc.advance(Phase::Serving));
        assert!(lc.advance(Phase::Draining));
        assert!(!lc.advance(Phase::Serving));
        assert!(!lc.advance(Phase::Draining));
        assert!(lc.advance(Phase::Stopped));
        assert!(!lc.advance(Phase::Starting));
        assert_eq!(lc.phase(), Phase::Stopped);
    }

    #[tokio::test]
    async fn guards_balance_under_concurrency() {
        let lc = Arc::new(Lifecycle::default());
        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..64u64 {
            let lc = Arc::clone(&lc);
            tasks.spawn(async move {
                let _guard = lc.track();
                tokio::time::sleep(Duration::from_millis(i % 5)).await;
            });
        }
        while tasks.join_next().await.is_some() {}
        lc.idle().await;
        assert_eq!(lc.in_flight(), 0);
    }

    #[tokio::test]
    async fn guard_released_when_future_is_aborted() {
        let lc = Arc::new(Lifecycle::default());
        let task = {
            let lc = Arc::clone(&lc);
            tokio::spawn(async move {
                let _guard = lc.track();
                std::future::pending::<()>().await;
            })
        };
        while lc.in_flight() == 0 {
            tokio::task::yield_now().await;
        }
        task.abort();
        let _ = task.await;
        assert_eq!(lc.in_flight(), 0);
    }

    #[test]
    fn shutdown_cancels_child_tokens() {
        let lc = Lifecycle::default();
        let token = lc.shutdown_token();
        assert!(!token.is_cancelled());
        lc.shutdown();
        lc.shutdown();
        assert!(token.is_cancelled());
        assert!(lc.is_shutdown_requested());
        assert_eq!(lc.phase(), Phase::Draining);
    }

    #[test]
    fn draining_is_visible_before_cancellation_is() {
        let lc = Arc::new(Lifecycle::default());
        lc.advance(Phase::Serving);
        let mut phases = lc.watch_phase();
        let token = lc.shutdown_token();
        lc.shutdown();
        assert!(phases.has_changed().unwrap());
        assert_eq!(*phases.borrow_and_update(), Phase::Draining);
        assert!(token.is_cancelled());
        // A later stop still moves forward.
        assert!(lc.advance(Phase::Stopped));
    }

    #[test]
    fn health_timestamp_never_decreases() {
        let lc = Lifecycle::default();
        let mut prev = lc.health_timestamp();
        for _ in 0..100 {
            let ts = lc.health_timestamp();
            assert!(ts >= prev);
            prev = ts;
        }
    }
}
