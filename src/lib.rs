//! HTTP server lifecycle with graceful shutdown.
//!
//! Start serving, wait for an interrupt or an explicit stop, then drain
//! in-flight requests within a bounded grace period.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use config::ServerConfig;
pub use http::{AxumEngine, Engine, EngineError, Options, Server};
pub use net::listener::Accept;
pub use lifecycle::{ManualInterrupt, NoSignals, OsSignals, SignalSource, StopSignal};
pub use observability::LogSink;
