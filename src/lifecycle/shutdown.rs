//! Exactly-once stop signal shared by every shutdown trigger.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;

/// Single-use stop channel.
///
/// Starts open and closes exactly once, whoever fires it first: an OS
/// interrupt, a manual stop, or a failed serve loop. Waiters that arrive after
/// the close return immediately.
#[derive(Debug)]
pub struct StopSignal {
    /// Guards the close so only one caller ever performs it.
    fired: AtomicBool,
    /// Carries the closed state to waiters.
    tx: watch::Sender<bool>,
}

impl StopSignal {
    /// Create an open stop signal.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            fired: AtomicBool::new(false),
            tx,
        }
    }

    /// Close the signal.
    ///
    /// Returns `true` for the one caller that performed the close and `false`
    /// for every later call.
    pub fn fire(&self) -> bool {
        if self
            .fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        self.tx.send_replace(true);
        true
    }

    /// Whether the signal has been closed.
    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Wait until the signal is closed.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only returns once closed.
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}
