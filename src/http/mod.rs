//! HTTP serving subsystem.
//!
//! # Data Flow
//! ```text
//! Server::start()
//!     → engine.rs (bind, accept, serve connections with the router)
//! Server::shutdown()
//!     → engine.rs (stop accepting, drain, force-close after grace period)
//! options.rs configures the server (log sink, grace period, signal source)
//! ```

pub mod engine;
pub mod options;
pub mod server;

pub use engine::{AxumEngine, Engine, EngineError};
pub use options::{Options, DEFAULT_GRACE_PERIOD};
pub use server::Server;
