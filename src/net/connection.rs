//! Connection identity and lifecycle tracking.
//!
//! # Responsibilities
//! - Number connections per engine so log lines can be correlated
//! - Count live connections so draining can report progress

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Sequence number of a connection within one engine, starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Counts the connections currently being served.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    inner: Arc<Counters>,
}

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    active: AtomicU64,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new live connection. The returned guard un-records it on drop,
    /// including when the connection task is aborted.
    pub fn track(&self) -> ConnectionGuard {
        self.inner.active.fetch_add(1, Ordering::SeqCst);
        let seq = self.inner.accepted.fetch_add(1, Ordering::Relaxed) + 1;
        ConnectionGuard {
            counters: Arc::clone(&self.inner),
            id: ConnectionId(seq),
        }
    }

    /// Current live connection count.
    pub fn active_count(&self) -> u64 {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Connections tracked since the engine was created.
    pub fn accepted_count(&self) -> u64 {
        self.inner.accepted.load(Ordering::Relaxed)
    }
}

/// Live connection; dropping it un-records the connection.
#[derive(Debug)]
pub struct ConnectionGuard {
    counters: Arc<Counters>,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.counters.active.fetch_sub(1, Ordering::SeqCst);
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}
