//! TCP listener setup.
//!
//! # Responsibilities
//! - Normalise configured addresses (`:8080` means all interfaces)
//! - Bind the listening socket
//! - Sort accept errors into skip, retry-with-backoff and fatal

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};

use crate::http::EngineError;

/// Source of accepted connections.
///
/// Implemented for [`TcpListener`]; other implementations let an engine
/// serve connections accepted elsewhere.
pub trait Accept: Send {
    /// Wait for the next connection.
    fn accept(&mut self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send;

    /// Address the listener is bound to.
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

impl Accept for TcpListener {
    async fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpListener::local_addr(self)
    }
}

/// Expand a bare `:port` address to `0.0.0.0:port`.
pub fn normalize_address(address: &str) -> String {
    if address.starts_with(':') {
        format!("0.0.0.0{address}")
    } else {
        address.to_string()
    }
}

/// Bind a listener on the given address.
pub async fn bind(address: &str) -> Result<TcpListener, EngineError> {
    let listener = TcpListener::bind(normalize_address(address))
        .await
        .map_err(|source| EngineError::Bind {
            address: address.to_string(),
            source,
        })?;

    if let Ok(local_addr) = listener.local_addr() {
        tracing::info!(address = %local_addr, "Listener bound");
    }

    Ok(listener)
}

/// What the accept loop should do after an accept error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptErrorKind {
    /// Only the connection being accepted failed; accept the next one.
    Connection,
    /// The process or kernel ran out of descriptors or buffers; retry later.
    Exhausted,
    /// The listener itself is broken.
    Fatal,
}

/// Classify an accept error.
pub fn classify_accept_error(e: &io::Error) -> AcceptErrorKind {
    match e.kind() {
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset => return AcceptErrorKind::Connection,
        io::ErrorKind::OutOfMemory => return AcceptErrorKind::Exhausted,
        _ => {}
    }

    #[cfg(unix)]
    if matches!(
        e.raw_os_error(),
        Some(libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM)
    ) {
        return AcceptErrorKind::Exhausted;
    }

    AcceptErrorKind::Fatal
}

/// Exponential delay between accept retries: 5ms doubling up to 1s.
#[derive(Debug, Default)]
pub struct AcceptBackoff {
    attempt: u32,
}

impl AcceptBackoff {
    const BASE: Duration = Duration::from_millis(5);
    const MAX: Duration = Duration::from_secs(1);

    /// Delay before the next retry.
    pub fn next_delay(&mut self) -> Duration {
        let delay = Self::BASE
            .saturating_mul(2u32.saturating_pow(self.attempt))
            .min(Self::MAX);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Forget past failures after a successful accept.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
