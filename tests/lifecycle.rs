mod common;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use fininsight::{Error, Phase, Request, Router};
use http::Method;
use tokio::net::TcpStream;

use common::{app, get, spawn};

async fn sleepy(req: Request) -> &'static str {
    let ms: u64 = req.param("ms").and_then(|v| v.parse().ok()).unwrap_or(0);
    tokio::time::sleep(Duration::from_millis(ms)).await;
    "done"
}

fn router(drain_timeout: Duration) -> Router {
    let mut router = Router::new(&app(drain_timeout));
    router.public(Method::GET, "/sleep/{ms}", sleepy).unwrap();
    router
}

#[tokio::test]
async fn drain_finishes_in_flight_and_refuses_new_connections() {
    let running = spawn(router(Duration::from_secs(5))).await;
    let addr = running.addr;

    let slow = tokio::spawn(async move { get(addr, "/sleep/400").await });
    running
        .lifecycle
        .watch_in_flight()
        .wait_for(|n| *n == 1)
        .await
        .unwrap();

    running.lifecycle.shutdown();
    assert_eq!(running.lifecycle.phase(), Phase::Draining);

    // The accept loop closes the listener as soon as it sees the shutdown,
    // long before the sleeping handler returns.
    let reply = slow.await.unwrap();
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body, "done");
    assert!(TcpStream::connect(addr).await.is_err(), "listener should be closed");

    running.handle.await.unwrap().unwrap();
    assert_eq!(running.lifecycle.phase(), Phase::Stopped);
    assert_eq!(running.lifecycle.in_flight(), 0);
}

/// Collects formatted log output so a test can assert on it.
#[derive(Clone, Default)]
struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl LogCapture {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

#[tokio::test]
async fn drain_timeout_aborts_stuck_requests() {
    // The runtime is single-threaded, so the server task logs through this
    // thread-local subscriber too.
    let logs = LogCapture::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_max_level(tracing::Level::WARN)
        .with_writer(move || writer.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let drain = Duration::from_millis(300);
    let running = spawn(router(drain)).await;
    let addr = running.addr;

    let stuck = tokio::spawn(async move {
        common::send(addr, "GET", "/sleep/30000", &[], "").await
    });
    running
        .lifecycle
        .watch_in_flight()
        .wait_for(|n| *n == 1)
        .await
        .unwrap();

    let started = Instant::now();
    running.lifecycle.shutdown();
    let result = running.handle.await.unwrap();
    let elapsed = started.elapsed();

    let err = result.expect_err("stuck request should force the drain");
    assert!(matches!(err, Error::DrainTimeout { timeout, abandoned: 1 } if timeout == drain));
    assert_eq!(err.to_string(), "drain timed out after 300ms, 1 request(s) aborted");
    assert!(elapsed >= drain, "returned before the deadline: {elapsed:?}");
    assert!(
        elapsed < drain + Duration::from_millis(500),
        "forced shutdown came late: {elapsed:?}"
    );
    assert!(logs.contents().contains("drain timeout elapsed, forcing shutdown"));

    assert_eq!(running.lifecycle.phase(), Phase::Stopped);
    assert_eq!(running.lifecycle.in_flight(), 0);

    // The aborted connection is dropped without a response.
    assert!(stuck.await.unwrap().is_err());
}

#[tokio::test]
async fn shutdown_with_nothing_in_flight_is_immediate() {
    let running = spawn(router(Duration::from_secs(30))).await;
    assert_eq!(get(running.addr, "/sleep/0").await.status, 200);

    let started = Instant::now();
    running.lifecycle.shutdown();
    running.lifecycle.shutdown();
    running.handle.await.unwrap().unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(running.lifecycle.phase(), Phase::Stopped);
}
