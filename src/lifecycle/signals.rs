//! OS signal handling.
//!
//! # Responsibilities
//! - Abstract "interest in interrupt signals" behind [`SignalSource`]
//! - Listen for SIGINT/SIGTERM (Ctrl-C off unix) by default
//! - Let tests and embedders trigger or suppress interrupts
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - Registering installs the handlers before it returns; an interrupt that
//!   arrives before the stream is first polled is still delivered
//! - A source only reports *that* an interrupt arrived; routing it into the
//!   stop signal is the server's job

use std::io;
use std::sync::Arc;

use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::sync::watch;

/// Capability that delivers interrupts to a server.
pub trait SignalSource: Send + Sync + 'static {
    /// Register interest in interrupts.
    ///
    /// Handlers are installed before this returns and stay installed until
    /// the stream is dropped. The stream yields once per interrupt. Must be
    /// called from within a Tokio runtime.
    fn register(&self) -> io::Result<BoxStream<'static, ()>>;
}

/// Process signals: SIGINT and SIGTERM on unix, Ctrl-C elsewhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsSignals;

#[cfg(unix)]
impl SignalSource for OsSignals {
    fn register(&self) -> io::Result<BoxStream<'static, ()>> {
        use tokio::signal::unix::{signal, SignalKind};

        let sigint = signal(SignalKind::interrupt())?;
        let sigterm = signal(SignalKind::terminate())?;

        let interrupts = stream::unfold((sigint, sigterm), |(mut sigint, mut sigterm)| async move {
            let name = tokio::select! {
                Some(()) = sigint.recv() => "SIGINT",
                Some(()) = sigterm.recv() => "SIGTERM",
                else => return None,
            };
            tracing::info!(signal = name, "Received {name}");
            Some(((), (sigint, sigterm)))
        });
        Ok(interrupts.boxed())
    }
}

#[cfg(windows)]
impl SignalSource for OsSignals {
    fn register(&self) -> io::Result<BoxStream<'static, ()>> {
        let ctrl_c = tokio::signal::windows::ctrl_c()?;

        let interrupts = stream::unfold(ctrl_c, |mut ctrl_c| async move {
            ctrl_c.recv().await?;
            tracing::info!("Received Ctrl+C");
            Some(((), ctrl_c))
        });
        Ok(interrupts.boxed())
    }
}

#[cfg(not(any(unix, windows)))]
impl SignalSource for OsSignals {
    fn register(&self) -> io::Result<BoxStream<'static, ()>> {
        Ok(stream::pending().boxed())
    }
}

/// Interrupt fired from code instead of the OS.
///
/// Every registration sees every interrupt, including the ones fired before
/// it registered, like a buffered signal delivered to each listener.
#[derive(Debug, Clone)]
pub struct ManualInterrupt {
    fired: Arc<watch::Sender<u64>>,
}

impl ManualInterrupt {
    pub fn new() -> Self {
        Self {
            fired: Arc::new(watch::channel(0).0),
        }
    }

    /// Deliver one interrupt.
    pub fn fire(&self) {
        self.fired.send_modify(|count| *count += 1);
    }
}

impl Default for ManualInterrupt {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalSource for ManualInterrupt {
    fn register(&self) -> io::Result<BoxStream<'static, ()>> {
        let fired = self.fired.subscribe();

        let interrupts = stream::unfold((fired, 0u64), |(mut fired, delivered)| async move {
            loop {
                if *fired.borrow_and_update() > delivered {
                    return Some(((), (fired, delivered + 1)));
                }
                fired.changed().await.ok()?;
            }
        });
        Ok(interrupts.boxed())
    }
}

/// Source that never delivers, for servers stopped only through `stop()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSignals;

impl SignalSource for NoSignals {
    fn register(&self) -> io::Result<BoxStream<'static, ()>> {
        Ok(stream::pending().boxed())
    }
}
