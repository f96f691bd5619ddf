//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Server transitions (start, stop, drain, shutdown result)
//!     → tracing events (always)
//!     → LogSink lines (when one is configured)
//! ```

pub mod logging;

pub use logging::LogSink;
