//! Lifecycle controller wrapping an HTTP engine.
//!
//! # Usage
//! ```no_run
//! use std::sync::Arc;
//! use axum::{routing::get, Router};
//! use graceful_server::{Options, Server};
//!
//! # async fn run() {
//! let app = Router::new().route("/", get(|| async { "hello" }));
//! let server = Arc::new(Server::new("127.0.0.1:8080", app, Options::default()));
//!
//! let serving = Arc::clone(&server);
//! tokio::spawn(async move { serving.start().await });
//!
//! server.wait().await; // SIGINT, SIGTERM or server.stop()
//! server.shutdown().await;
//! # }
//! ```
//!
//! # State Machine
//! ```text
//! Running --(interrupt | stop() | start() failure)--> StopRequested
//! StopRequested --(shutdown())--> Draining
//! Draining --(in-flight requests done | grace period elapsed | interrupt)--> Closed
//! ```
//!
//! Interest in interrupts is registered when the server is built and lasts
//! until it is dropped. The first interrupt stops the server; any later one
//! makes `shutdown()` close remaining connections without waiting.
//!
//! `start()` is meant to be called once per server. Calling it again is a
//! caller error; the engine rejects it and the server stops.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::Router;
use futures_util::StreamExt;
use tokio::task::AbortHandle;

use crate::http::engine::{AxumEngine, Engine};
use crate::http::options::Options;
use crate::lifecycle::{SignalSource, StopSignal};
use crate::observability::LogSink;

/// HTTP server with signal-aware graceful shutdown.
pub struct Server<E: Engine = AxumEngine> {
    engine: E,
    log_sink: Option<Arc<dyn LogSink>>,
    grace_period: Duration,
    signals: Arc<dyn SignalSource>,
    stop: Arc<StopSignal>,
    /// Fired by an interrupt that arrives after the stop.
    forced: Arc<StopSignal>,
    /// Interrupt delivery task, set on first registration.
    registration: OnceLock<Option<AbortHandle>>,
}

impl Server<AxumEngine> {
    /// Create a server for `router` on `address`.
    ///
    /// Registers for interrupt delivery before returning when called inside a
    /// Tokio runtime; otherwise registration waits until the server is first
    /// started, waited on or shut down. Serving starts with [`Server::start`].
    pub fn new(address: impl Into<String>, router: Router, options: Options) -> Self {
        Self::wrap(AxumEngine::new(address, router), options)
    }
}

impl<E: Engine> Server<E> {
    /// Manage the lifecycle of an already configured engine.
    pub fn wrap(engine: E, options: Options) -> Self {
        let server = Self {
            engine,
            log_sink: options.log_sink,
            grace_period: options.grace_period,
            signals: options.signals,
            stop: Arc::new(StopSignal::new()),
            forced: Arc::new(StopSignal::new()),
            registration: OnceLock::new(),
        };

        if tokio::runtime::Handle::try_current().is_ok() {
            server.ensure_registered();
        } else {
            tracing::debug!("No Tokio runtime yet, interrupt registration deferred");
        }
        server
    }

    /// Serve until shut down.
    ///
    /// If serving fails (bind error, listener error) the failure is logged and
    /// the server stops itself so [`Server::wait`] callers are released.
    pub async fn start(&self) {
        self.ensure_registered();

        let address = self.engine.address();
        tracing::info!(address = %address, "Start listening");
        self.log_line(&format!("Start listening @ {address}"));

        match self.engine.listen_and_serve().await {
            Ok(()) => {
                tracing::info!("Server closed");
                self.log_line("Server closed.");
            }
            Err(e) => {
                tracing::error!(address = %address, error = %e, "Server failed");
                self.log_line(&e.to_string());
                self.stop();
            }
        }
    }

    /// Block until the server is asked to stop: by an interrupt,
    /// [`Server::stop`], or a failed [`Server::start`].
    pub async fn wait(&self) {
        self.ensure_registered();
        self.stop.wait().await;
    }

    /// Release [`Server::wait`] callers. Idempotent and non-blocking.
    pub fn stop(&self) {
        if self.stop.fire() {
            tracing::info!("Server stop requested");
        }
    }

    /// Stop, then let in-flight requests finish within the grace period.
    ///
    /// Requests still running when the grace period ends, or when another
    /// interrupt arrives, are cut off. The outcome is logged, not returned.
    pub async fn shutdown(&self) {
        self.ensure_registered();

        tracing::info!(grace_period = ?self.grace_period, "Shutting down server");
        self.log_line("Shutdown server...");
        self.stop();

        let result = tokio::select! {
            biased;
            () = self.forced.wait() => {
                tracing::warn!("Skipping grace period");
                self.engine.shutdown(Duration::ZERO).await
            }
            result = self.engine.shutdown(self.grace_period) => result,
        };

        match result {
            Ok(()) => {
                tracing::info!("Server gracefully shut down");
                self.log_line("Server gracefully shut down.");
            }
            Err(e) => {
                tracing::error!(error = %e, "Server graceful shutdown failed");
                self.log_line(&format!("Server graceful shutdown failed: {e}"));
            }
        }
    }

    /// Whether a stop has been requested.
    pub fn is_stopped(&self) -> bool {
        self.stop.is_fired()
    }

    /// Whether an interrupt arrived after the stop, cutting the grace period.
    pub fn is_forced(&self) -> bool {
        self.forced.is_fired()
    }

    /// The wrapped engine.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// How long [`Server::shutdown`] waits for in-flight requests.
    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    fn ensure_registered(&self) {
        self.registration
            .get_or_init(|| register_interrupts(self.signals.as_ref(), &self.stop, &self.forced));
    }

    fn log_line(&self, line: &str) {
        if let Some(sink) = &self.log_sink {
            sink.write_line(line);
        }
    }
}

impl<E: Engine> Drop for Server<E> {
    fn drop(&mut self) {
        if let Some(Some(registration)) = self.registration.get() {
            registration.abort();
        }
    }
}

impl<E: Engine + std::fmt::Debug> std::fmt::Debug for Server<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("engine", &self.engine)
            .field("grace_period", &self.grace_period)
            .field("stopped", &self.is_stopped())
            .field("forced", &self.is_forced())
            .finish_non_exhaustive()
    }
}

/// Install interest in interrupts and route them on a background task: the
/// first fires `stop`, any later one fires `forced`.
fn register_interrupts(
    signals: &dyn SignalSource,
    stop: &Arc<StopSignal>,
    forced: &Arc<StopSignal>,
) -> Option<AbortHandle> {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        tracing::warn!("No Tokio runtime, interrupt signals will not stop the server");
        return None;
    };

    let mut interrupts = match signals.register() {
        Ok(interrupts) => interrupts,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to register for interrupt signals");
            return None;
        }
    };

    let stop = Arc::clone(stop);
    let forced = Arc::clone(forced);
    let task = runtime.spawn(async move {
        while interrupts.next().await.is_some() {
            if stop.fire() {
                tracing::info!("Interrupt received, stopping server");
            } else if forced.fire() {
                tracing::warn!("Interrupt received again, closing connections without waiting");
            }
        }
    });

    Some(task.abort_handle())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::http::engine::EngineError;
    use crate::lifecycle::{ManualInterrupt, NoSignals};

    /// Engine that serves nothing and closes when told to.
    #[derive(Default)]
    struct MockEngine {
        fail_bind: bool,
        grace_elapses: bool,
        slow_drain: bool,
        closed: StopSignal,
        shutdowns: AtomicUsize,
        last_grace: Mutex<Option<Duration>>,
    }

    impl Engine for MockEngine {
        fn address(&self) -> &str {
            "mock:80"
        }

        async fn listen_and_serve(&self) -> Result<(), EngineError> {
            if self.fail_bind {
                return Err(EngineError::Bind {
                    address: "mock:80".into(),
                    source: io::Error::from(io::ErrorKind::AddrInUse),
                });
            }
            self.closed.wait().await;
            Ok(())
        }

        async fn shutdown(&self, grace: Duration) -> Result<(), EngineError> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            *self.last_grace.lock().unwrap() = Some(grace);
            if self.slow_drain {
                tokio::time::sleep(grace).await;
            }
            self.closed.fire();
            if self.grace_elapses {
                Err(EngineError::GraceElapsed(grace))
            } else {
                Ok(())
            }
        }
    }

    fn sink() -> Arc<Mutex<Vec<u8>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn lines(sink: &Mutex<Vec<u8>>) -> Vec<String> {
        String::from_utf8(sink.lock().unwrap().clone())
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn options(sink: &Arc<Mutex<Vec<u8>>>) -> Options {
        Options::new()
            .with_log_sink(sink.clone())
            .with_signal_source(NoSignals)
    }

    #[tokio::test]
    async fn failed_start_stops_the_server() {
        let log = sink();
        let engine = MockEngine {
            fail_bind: true,
            ..Default::default()
        };
        let server = Server::wrap(engine, options(&log));

        server.start().await;
        tokio::time::timeout(Duration::from_secs(1), server.wait())
            .await
            .expect("wait released by failed start");

        assert!(server.is_stopped());
        let lines = lines(&log);
        assert_eq!(lines[0], "Start listening @ mock:80");
        assert!(lines[1].starts_with("failed to bind mock:80"));
    }

    #[tokio::test]
    async fn standard_flow_logs_every_transition() {
        let log = sink();
        let server = Arc::new(Server::wrap(MockEngine::default(), options(&log)));

        let serving = tokio::spawn({
            let server = Arc::clone(&server);
            async move { server.start().await }
        });

        server.stop();
        server.wait().await;
        server.shutdown().await;
        serving.await.unwrap();

        let lines = lines(&log);
        assert!(lines.contains(&"Shutdown server...".to_string()));
        assert!(lines.contains(&"Server gracefully shut down.".to_string()));
        assert!(lines.contains(&"Server closed.".to_string()));
    }

    #[tokio::test]
    async fn interrupt_releases_waiters() {
        let interrupt = ManualInterrupt::new();
        let server = Server::wrap(
            MockEngine::default(),
            Options::new().with_signal_source(interrupt.clone()),
        );

        interrupt.fire();
        tokio::time::timeout(Duration::from_secs(1), server.wait())
            .await
            .expect("wait released by interrupt");
        assert!(server.is_stopped());

        // Stop after the interrupt is a no-op.
        server.stop();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_stops_release_all_waiters() {
        let server = Arc::new(Server::wrap(
            MockEngine::default(),
            Options::new().with_signal_source(NoSignals),
        ));

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let server = Arc::clone(&server);
                tokio::spawn(async move { server.wait().await })
            })
            .collect();

        let stoppers: Vec<_> = (0..16)
            .map(|_| {
                let server = Arc::clone(&server);
                tokio::spawn(async move { server.stop() })
            })
            .collect();

        for stopper in stoppers {
            stopper.await.unwrap();
        }
        for waiter in waiters {
            tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .expect("waiter released")
                .unwrap();
        }
    }

    #[tokio::test]
    async fn shutdown_without_stop_releases_waiters() {
        let server = Arc::new(Server::wrap(
            MockEngine::default(),
            Options::new().with_signal_source(NoSignals),
        ));

        let waiter = tokio::spawn({
            let server = Arc::clone(&server);
            async move { server.wait().await }
        });

        server.shutdown().await;
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter released")
            .unwrap();
    }

    #[tokio::test]
    async fn elapsed_grace_period_is_logged_not_returned() {
        let log = sink();
        let engine = MockEngine {
            grace_elapses: true,
            ..Default::default()
        };
        let server = Server::wrap(
            engine,
            options(&log).with_grace_period(Duration::from_millis(10)),
        );

        server.shutdown().await;

        let lines = lines(&log);
        assert!(lines
            .iter()
            .any(|line| line.starts_with("Server graceful shutdown failed: ")));
    }

    #[tokio::test]
    async fn shutdown_twice_completes() {
        let server = Server::wrap(
            MockEngine::default(),
            Options::new().with_signal_source(NoSignals),
        );

        server.shutdown().await;
        tokio::time::timeout(Duration::from_secs(1), server.shutdown())
            .await
            .expect("second shutdown completes");
        assert_eq!(server.engine().shutdowns.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn servers_sharing_an_interrupt_all_stop() {
        let interrupt = ManualInterrupt::new();
        let first = Server::wrap(
            MockEngine::default(),
            Options::new().with_signal_source(interrupt.clone()),
        );
        let second = Server::wrap(
            MockEngine::default(),
            Options::new().with_signal_source(interrupt.clone()),
        );

        interrupt.fire();
        tokio::time::timeout(Duration::from_secs(1), async {
            tokio::join!(first.wait(), second.wait());
        })
        .await
        .expect("both servers released by one interrupt");
    }

    #[tokio::test]
    async fn interrupt_after_stop_skips_grace_period() {
        let interrupt = ManualInterrupt::new();
        let server = Server::wrap(
            MockEngine::default(),
            Options::new()
                .with_signal_source(interrupt.clone())
                .with_grace_period(Duration::from_secs(10)),
        );

        server.stop();
        interrupt.fire();
        tokio::time::timeout(Duration::from_secs(1), async {
            while !server.is_forced() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("interrupt after stop was delivered");

        server.shutdown().await;
        assert_eq!(
            *server.engine().last_grace.lock().unwrap(),
            Some(Duration::ZERO)
        );
    }

    #[tokio::test]
    async fn interrupt_during_shutdown_cuts_the_drain() {
        let log = sink();
        let interrupt = ManualInterrupt::new();
        let engine = MockEngine {
            slow_drain: true,
            ..Default::default()
        };
        let server = Arc::new(Server::wrap(
            engine,
            Options::new()
                .with_log_sink(log.clone())
                .with_signal_source(interrupt.clone())
                .with_grace_period(Duration::from_secs(10)),
        ));

        interrupt.fire();
        server.wait().await;

        let shutting_down = tokio::spawn({
            let server = Arc::clone(&server);
            async move { server.shutdown().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        interrupt.fire();

        tokio::time::timeout(Duration::from_secs(1), shutting_down)
            .await
            .expect("second interrupt ended the drain")
            .unwrap();
        assert!(server.is_forced());
        assert_eq!(
            *server.engine().last_grace.lock().unwrap(),
            Some(Duration::ZERO)
        );
        assert!(lines(&log).contains(&"Server gracefully shut down.".to_string()));
    }

    #[test]
    fn registration_waits_for_a_runtime() {
        let interrupt = ManualInterrupt::new();
        let server = Server::wrap(
            MockEngine::default(),
            Options::new().with_signal_source(interrupt.clone()),
        );
        assert!(server.registration.get().is_none());

        server.stop();
        server.stop();
        assert!(server.is_stopped());

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            server.wait().await;
            assert!(matches!(server.registration.get(), Some(Some(_))));

            interrupt.fire();
            tokio::time::timeout(Duration::from_secs(1), async {
                while !server.is_forced() {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .expect("interrupt delivered after deferred registration");
        });
    }
}
