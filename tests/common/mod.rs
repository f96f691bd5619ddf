//! Shared utilities for integration tests.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use graceful_server::net::listener::Accept;
use graceful_server::{AxumEngine, Server};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

/// Find a port that is free right now.
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Log sink that keeps everything in memory.
pub fn memory_sink() -> Arc<Mutex<Vec<u8>>> {
    Arc::new(Mutex::new(Vec::new()))
}

/// Lines written to a memory sink so far.
pub fn lines(sink: &Mutex<Vec<u8>>) -> Vec<String> {
    String::from_utf8(sink.lock().unwrap().clone())
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

/// HTTP client that ignores proxy environment variables.
#[allow(dead_code)]
pub fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// Wait until the server's engine has bound its listener.
#[allow(dead_code)]
pub async fn wait_until_listening(server: &Server<AxumEngine>) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while server.engine().local_addr().is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("server did not start listening");
}

/// Listener that accepts one connection and then breaks for good once
/// `break_listener` is fired.
#[allow(dead_code)]
pub struct BreakingListener {
    inner: TcpListener,
    accepted: bool,
    broken: Option<oneshot::Receiver<()>>,
}

#[allow(dead_code)]
impl BreakingListener {
    pub async fn bind() -> (Self, oneshot::Sender<()>) {
        let (break_listener, broken) = oneshot::channel();
        let listener = Self {
            inner: TcpListener::bind("127.0.0.1:0").await.unwrap(),
            accepted: false,
            broken: Some(broken),
        };
        (listener, break_listener)
    }
}

impl Accept for BreakingListener {
    async fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
        if !self.accepted {
            self.accepted = true;
            return self.inner.accept().await;
        }
        if let Some(broken) = self.broken.take() {
            let _ = broken.await;
        }
        Err(io::Error::from(io::ErrorKind::PermissionDenied))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}
