//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGINT/SIGTERM → SignalSource stream yields → first: stop fired
//!                                                   later: forced fired
//!
//! Shutdown (shutdown.rs):
//!     Interrupt | Stop() | failed Start() → StopSignal closes once → Wait() returns
//! ```
//!
//! # Design Decisions
//! - One stop signal per server, closed exactly once
//! - Signal delivery is injected so servers can be tested in isolation
//! - Shutdown has timeout: forced close after deadline

pub mod shutdown;
pub mod signals;

pub use shutdown::StopSignal;
pub use signals::{ManualInterrupt, NoSignals, OsSignals, SignalSource};
