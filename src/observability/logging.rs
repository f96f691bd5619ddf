//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber
//! - Define the optional line-oriented [`LogSink`] a server can report to
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - JSON format for production, pretty format for development
//! - `RUST_LOG` overrides the configured filter

use std::io::Write;
use std::sync::Mutex;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::schema::LoggingConfig;

/// Destination for human-readable lifecycle lines.
pub trait LogSink: Send + Sync {
    /// Write one line. Failures are swallowed; logging never breaks serving.
    fn write_line(&self, line: &str);
}

impl<W: Write + Send> LogSink for Mutex<W> {
    fn write_line(&self, line: &str) {
        if let Ok(mut writer) = self.lock() {
            let _ = writeln!(writer, "{line}");
        }
    }
}

/// Install the global tracing subscriber.
///
/// Returns an error if a global subscriber is already set.
pub fn init(config: &LoggingConfig) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| config.filter.as_str().into());

    let registry = tracing_subscriber::registry().with(filter);
    if config.json {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    }
}
