//! Server options.

use std::sync::Arc;
use std::time::Duration;

use crate::lifecycle::{OsSignals, SignalSource};
use crate::observability::LogSink;

/// Grace period used unless [`Options::with_grace_period`] says otherwise.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Optional settings applied when constructing a [`Server`](super::Server).
#[derive(Clone)]
pub struct Options {
    pub(crate) log_sink: Option<Arc<dyn LogSink>>,
    pub(crate) grace_period: Duration,
    pub(crate) signals: Arc<dyn SignalSource>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also report every lifecycle transition as a line on `sink`.
    ///
    /// Without a sink those lines are dropped; tracing events are emitted
    /// either way.
    pub fn with_log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.log_sink = Some(sink);
        self
    }

    /// How long `shutdown()` lets in-flight requests finish before the
    /// remaining connections are closed.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Where interrupts come from. Defaults to [`OsSignals`].
    pub fn with_signal_source(mut self, signals: impl SignalSource) -> Self {
        self.signals = Arc::new(signals);
        self
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }
}

impl Default for Options {
    fn default() -> Self {
        Self {
            log_sink: None,
            grace_period: DEFAULT_GRACE_PERIOD,
            signals: Arc::new(OsSignals),
        }
    }
}

impl std::fmt::Debug for Options {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Options")
            .field("log_sink", &self.log_sink.is_some())
            .field("grace_period", &self.grace_period)
            .finish_non_exhaustive()
    }
}
