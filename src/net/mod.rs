//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Configured address
//!     → listener.rs (normalise, bind, classify accept errors)
//!     → connection.rs (id + live-connection tracking)
//!     → Hand off to the HTTP engine
//!
//! Connection States:
//!     Active → Draining → Closed (or aborted once the grace period ends)
//! ```

pub mod connection;
pub mod listener;
