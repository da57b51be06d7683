//! Debounced "connection problems" signal.
//!
//! A single slow poll must not flash a warning; only an attempt that is still
//! outstanding (or retrying) after the debounce window flips the signal. The
//! monitor keeps the pending transition as a deadline rather than a spawned
//! timer, so the owner decides when time is observed: the client driver waits
//! on [`ConnectionHealthMonitor::expired`] alongside the outstanding poll, and
//! tests advance a paused tokio clock.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

/// Debounce window before an outstanding attempt is reported as unhealthy.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(1);

pub struct ConnectionHealthMonitor {
    debounce: Duration,
    enabled: bool,
    pending: Option<Instant>,
    unhealthy: watch::Sender<bool>,
}

impl ConnectionHealthMonitor {
    pub fn new(debounce: Duration) -> Self {
        let (unhealthy, _) = watch::channel(false);
        Self {
            debounce,
            enabled: true,
            pending: None,
            unhealthy,
        }
    }

    /// Receiver that observes `true` while the connection is considered unhealthy.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.unhealthy.subscribe()
    }

    pub fn is_unhealthy(&self) -> bool {
        *self.unhealthy.borrow()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Deadline of the scheduled unhealthy transition, if any.
    pub fn pending_deadline(&self) -> Option<Instant> {
        self.pending
    }

    /// Schedules the unhealthy transition unless one is already pending.
    pub fn mark_attempt_pending(&mut self, now: Instant) {
        if !self.enabled {
            self.pending = None;
            return;
        }
        if self.pending.is_none() {
            self.pending = Some(now + self.debounce);
        }
    }

    /// Cancels any scheduled transition and clears the unhealthy flag.
    pub fn mark_healthy(&mut self) {
        self.pending = None;
        self.set(false);
    }

    /// Stops scheduling transitions for good and clears current state.
    pub fn disable(&mut self) {
        self.enabled = false;
        self.mark_healthy();
    }

    /// Applies the scheduled transition when its deadline has passed.
    ///
    /// Returns `true` when the signal flipped to unhealthy.
    pub fn fire_due(&mut self, now: Instant) -> bool {
        match self.pending {
            Some(deadline) if deadline <= now => {
                self.pending = None;
                if self.enabled {
                    debug!(debounce_ms = self.debounce.as_millis() as u64, "connection problems detected");
                    return self.set(true);
                }
                false
            }
            _ => false,
        }
    }

    /// Resolves once the scheduled transition has fired.
    ///
    /// Never resolves while nothing is scheduled, so it can sit in a
    /// `select!` next to an outstanding poll.
    pub async fn expired(&mut self) {
        loop {
            match self.pending {
                Some(deadline) => {
                    tokio::time::sleep_until(deadline).await;
                    if self.fire_due(Instant::now()) {
                        return;
                    }
                }
                None => futures::future::pending::<()>().await,
            }
        }
    }

    fn set(&self, unhealthy: bool) -> bool {
        self.unhealthy.send_if_modified(|current| {
            if *current == unhealthy {
                false
            } else {
                *current = unhealthy;
                true
            }
        })
    }
}

impl Default for ConnectionHealthMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}
