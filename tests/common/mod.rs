#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use fininsight::auth::JwtValidator;
use fininsight::{AppContext, Error, Lifecycle, Router, Server};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

pub const SECRET: &[u8] = b"integration-secret";

pub fn app(drain_timeout: Duration) -> AppContext {
    let tokens = Arc::new(JwtValidator::new(SECRET, Duration::from_secs(60)));
    AppContext::new(drain_timeout, tokens).unwrap()
}

pub struct Running {
    pub addr: SocketAddr,
    pub lifecycle: Arc<Lifecycle>,
    pub handle: JoinHandle<Result<(), Error>>,
}

/// Binds an ephemeral port and serves `router` in the background.
pub async fn spawn(router: Router) -> Running {
    let lifecycle = Arc::clone(router.lifecycle());
    let server = Server::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr();
    let handle = tokio::spawn(server.serve(router));
    Running { addr, lifecycle, handle }
}

#[derive(Debug)]
pub struct Reply {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl Reply {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// One HTTP/1.1 exchange over a fresh connection.
pub async fn send(
    addr: SocketAddr,
    method: &str,
    path: &str,
    headers: &[(&str, &str)],
    body: &str,
) -> std::io::Result<Reply> {
    let mut stream = TcpStream::connect(addr).await?;
    let mut raw = format!("{method} {path} HTTP/1.1\r\nhost: {addr}\r\nconnection: close\r\n");
    for (name, value) in headers {
        raw.push_str(&format!("{name}: {value}\r\n"));
    }
    raw.push_str(&format!("content-length: {}\r\n\r\n{body}", body.len()));
    stream.write_all(raw.as_bytes()).await?;

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    parse(&String::from_utf8_lossy(&buf))
}

pub async fn get(addr: SocketAddr, path: &str) -> Reply {
    send(addr, "GET", path, &[], "").await.unwrap()
}

fn parse(text: &str) -> std::io::Result<Reply> {
    let invalid = || std::io::Error::new(std::io::ErrorKind::InvalidData, "malformed response");
    let (head, body) = text.split_once("\r\n\r\n").ok_or_else(invalid)?;
    let mut lines = head.split("\r\n");
    let status = lines
        .next()
        .and_then(|l| l.split(' ').nth(1))
        .and_then(|s| s.parse().ok())
        .ok_or_else(invalid)?;
    let headers = lines
        .filter_map(|l| l.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_owned()))
        .collect();
    Ok(Reply { status, headers, body: body.to_owned() })
}
