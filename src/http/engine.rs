//! HTTP engine: binds the address, serves connections, drains on shutdown.
//!
//! # Responsibilities
//! - Accept TCP connections and serve them with hyper (HTTP/1.1 and HTTP/2)
//! - Dispatch requests to an Axum router
//! - Optional per-request timeout and connection limit
//! - Graceful drain with a hard deadline
//!
//! # Design Decisions
//! - Phase (Idle → Serving → Draining → Closed) lives in a watch channel so
//!   the accept loop, every connection and `shutdown()` observe one value
//! - Connections run in a `JoinSet`; the deadline aborts whatever is left
//! - Shutdown before start closes the engine; a later start returns at once

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::extract::Request;
use axum::Router;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tower::Service;
use tower_http::timeout::TimeoutLayer;

use crate::net::connection::ConnectionTracker;
use crate::net::listener::{bind, classify_accept_error, Accept, AcceptBackoff, AcceptErrorKind};

/// Errors reported by an [`Engine`].
#[derive(Debug, Error)]
pub enum EngineError {
    /// The listening socket could not be bound.
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    /// The listener failed for a reason other than a single bad connection.
    #[error("failed to accept connection: {0}")]
    Accept(#[source] io::Error),

    /// `listen_and_serve` was called while already serving.
    #[error("server has already been started")]
    AlreadyStarted,

    /// In-flight requests outlived the grace period and were cut off.
    #[error("in-flight requests did not finish within {0:?}, remaining connections were closed")]
    GraceElapsed(Duration),
}

/// Capability the lifecycle controller drives.
pub trait Engine: Send + Sync + 'static {
    /// Address the engine listens on, as configured.
    fn address(&self) -> &str;

    /// Serve until shut down.
    ///
    /// `Ok(())` means serving ended because `shutdown` was requested (or had
    /// already been requested before this call).
    fn listen_and_serve(&self) -> impl Future<Output = Result<(), EngineError>> + Send;

    /// Stop accepting and wait for in-flight requests.
    ///
    /// After `grace` the remaining connections are closed forcibly and
    /// [`EngineError::GraceElapsed`] is returned.
    fn shutdown(&self, grace: Duration) -> impl Future<Output = Result<(), EngineError>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Serving,
    Draining,
    Closed,
}

/// Default engine serving an Axum [`Router`].
pub struct AxumEngine {
    address: String,
    router: Router,
    connection_limit: Option<Arc<Semaphore>>,
    phase: watch::Sender<Phase>,
    force: watch::Sender<bool>,
    local_addr: OnceLock<SocketAddr>,
    connections: ConnectionTracker,
}

impl AxumEngine {
    /// Create an engine for `router` on `address` (`host:port` or `:port`).
    pub fn new(address: impl Into<String>, router: Router) -> Self {
        let (phase, _) = watch::channel(Phase::Idle);
        let (force, _) = watch::channel(false);
        Self {
            address: address.into(),
            router,
            connection_limit: None,
            phase,
            force,
            local_addr: OnceLock::new(),
            connections: ConnectionTracker::new(),
        }
    }

    /// Answer requests that take longer than `timeout` with 408.
    #[allow(deprecated)]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.router = self.router.layer(TimeoutLayer::new(timeout));
        self
    }

    /// Serve at most `max` connections at once; further accepts wait for a slot.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        let permits = max.clamp(1, Semaphore::MAX_PERMITS);
        self.connection_limit = Some(Arc::new(Semaphore::new(permits)));
        self
    }

    /// The bound address, once listening. Useful with port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// Number of connections currently being served.
    pub fn active_connections(&self) -> u64 {
        self.connections.active_count()
    }

    /// Serve on an already bound listener instead of binding `address`.
    ///
    /// Follows the same rules as [`Engine::listen_and_serve`]: at most one
    /// serve per engine, and an engine already shut down returns at once.
    pub async fn serve_on<A: Accept>(&self, listener: A) -> Result<(), EngineError> {
        if let Some(early) = self.enter_serving() {
            return early;
        }

        let _closed = CloseOnDrop(&self.phase);
        self.serve(listener).await
    }

    /// Move Idle → Serving. `Some` carries the result for any other phase.
    fn enter_serving(&self) -> Option<Result<(), EngineError>> {
        let mut previous = Phase::Idle;
        self.phase.send_if_modified(|phase| {
            previous = *phase;
            if *phase == Phase::Idle {
                *phase = Phase::Serving;
                true
            } else {
                false
            }
        });

        match previous {
            Phase::Idle => None,
            Phase::Serving => Some(Err(EngineError::AlreadyStarted)),
            Phase::Draining | Phase::Closed => Some(Ok(())),
        }
    }

    async fn serve<A: Accept>(&self, mut listener: A) -> Result<(), EngineError> {
        if let Ok(addr) = listener.local_addr() {
            let _ = self.local_addr.set(addr);
        }

        let mut connections = JoinSet::new();
        let mut backoff = AcceptBackoff::default();
        let mut phase = self.phase.subscribe();
        let closing = until_draining(&mut phase);
        tokio::pin!(closing);

        let outcome = loop {
            let permit = tokio::select! {
                () = &mut closing => break Ok(()),
                permit = self.reserve_slot() => permit,
            };

            let accepted = tokio::select! {
                () = &mut closing => break Ok(()),
                accepted = listener.accept() => accepted,
            };

            let (stream, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => match classify_accept_error(&e) {
                    AcceptErrorKind::Connection => {
                        tracing::debug!(error = %e, "Accept failed, continuing");
                        continue;
                    }
                    AcceptErrorKind::Exhausted => {
                        let delay = backoff.next_delay();
                        tracing::warn!(error = %e, retry_in = ?delay, "Accept failed, retrying");
                        drop(permit);
                        tokio::select! {
                            () = &mut closing => break Ok(()),
                            () = tokio::time::sleep(delay) => continue,
                        }
                    }
                    AcceptErrorKind::Fatal => break Err(EngineError::Accept(e)),
                },
            };

            backoff.reset();
            self.spawn_connection(&mut connections, stream, peer, permit);
        };

        drop(listener);

        match outcome {
            Ok(()) => self.drain(&mut connections).await,
            Err(_) => {
                tracing::warn!(
                    remaining = connections.len(),
                    "Listener failed, closing open connections"
                );
                connections.shutdown().await;
            }
        }

        outcome
    }

    async fn reserve_slot(&self) -> Option<OwnedSemaphorePermit> {
        match &self.connection_limit {
            Some(limit) => Arc::clone(limit).acquire_owned().await.ok(),
            None => None,
        }
    }

    fn spawn_connection(
        &self,
        connections: &mut JoinSet<()>,
        stream: TcpStream,
        peer: SocketAddr,
        permit: Option<OwnedSemaphorePermit>,
    ) {
        let router = self.router.clone();
        let mut phase = self.phase.subscribe();
        let guard = self.connections.track();

        tracing::debug!(
            connection_id = %guard.id(),
            peer_addr = %peer,
            "Connection accepted"
        );

        connections.spawn(async move {
            let _permit = permit;
            let service = hyper::service::service_fn(move |request: Request<Incoming>| {
                router.clone().call(request)
            });

            let builder = auto::Builder::new(TokioExecutor::new());
            let connection = builder.serve_connection_with_upgrades(TokioIo::new(stream), service);
            tokio::pin!(connection);

            let mut draining = false;
            loop {
                tokio::select! {
                    result = connection.as_mut() => {
                        if let Err(e) = result {
                            tracing::debug!(connection_id = %guard.id(), error = %e, "Connection error");
                        }
                        break;
                    }
                    () = until_draining(&mut phase), if !draining => {
                        draining = true;
                        connection.as_mut().graceful_shutdown();
                    }
                }
            }

            drop(guard);
        });
    }

    async fn drain(&self, connections: &mut JoinSet<()>) {
        tracing::info!(
            active_connections = self.connections.active_count(),
            accepted_connections = self.connections.accepted_count(),
            "Draining connections"
        );

        let mut force = self.force.subscribe();
        let forced = tokio::select! {
            () = join_all(connections) => false,
            () = until_forced(&mut force) => true,
        };

        if forced {
            tracing::warn!(
                remaining = connections.len(),
                "Grace period elapsed, closing remaining connections"
            );
            connections.shutdown().await;
        }
    }
}

impl Engine for AxumEngine {
    fn address(&self) -> &str {
        &self.address
    }

    async fn listen_and_serve(&self) -> Result<(), EngineError> {
        if let Some(early) = self.enter_serving() {
            return early;
        }

        let _closed = CloseOnDrop(&self.phase);
        let listener = bind(&self.address).await?;
        self.serve(listener).await
    }

    async fn shutdown(&self, grace: Duration) -> Result<(), EngineError> {
        self.phase.send_if_modified(|phase| match *phase {
            Phase::Idle => {
                *phase = Phase::Closed;
                true
            }
            Phase::Serving => {
                *phase = Phase::Draining;
                true
            }
            Phase::Draining | Phase::Closed => false,
        });

        let mut phase = self.phase.subscribe();
        if tokio::time::timeout(grace, until_closed(&mut phase))
            .await
            .is_ok()
        {
            return Ok(());
        }

        self.force.send_replace(true);
        until_closed(&mut phase).await;
        Err(EngineError::GraceElapsed(grace))
    }
}

impl std::fmt::Debug for AxumEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AxumEngine")
            .field("address", &self.address)
            .field("phase", &*self.phase.borrow())
            .field("local_addr", &self.local_addr())
            .field("active_connections", &self.active_connections())
            .finish()
    }
}

/// Marks the engine closed when the serve future ends, even if it is dropped.
struct CloseOnDrop<'a>(&'a watch::Sender<Phase>);

impl Drop for CloseOnDrop<'_> {
    fn drop(&mut self) {
        self.0.send_replace(Phase::Closed);
    }
}

async fn until_draining(phase: &mut watch::Receiver<Phase>) {
    let _ = phase.wait_for(|phase| *phase != Phase::Serving).await;
}

async fn until_closed(phase: &mut watch::Receiver<Phase>) {
    let _ = phase.wait_for(|phase| *phase == Phase::Closed).await;
}

async fn until_forced(force: &mut watch::Receiver<bool>) {
    let _ = force.wait_for(|forced| *forced).await;
}

async fn join_all(connections: &mut JoinSet<()>) {
    while connections.join_next().await.is_some() {}
}
