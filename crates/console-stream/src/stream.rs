use std::fmt;
use std::time::Duration;

use crate::errors::StreamError;

/// Lifecycle of one console stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamState {
    /// Not started yet.
    Idle,
    /// A fetch is outstanding (or waiting out its retry delay).
    Polling,
    /// A successful result is being processed.
    Delivering,
    /// A failed result is being classified.
    Backoff,
    /// Terminal; no further fetches.
    Closed,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamState::Idle => "idle",
            StreamState::Polling => "polling",
            StreamState::Delivering => "delivering",
            StreamState::Backoff => "backoff",
            StreamState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Why a stream reached [`StreamState::Closed`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// The server reported the console as closed.
    ServerClosed,
    /// A shutdown notice was received.
    Shutdown { clean: bool },
    /// The session is no longer valid (401/403/410/501).
    SessionInvalid(StreamError),
    /// Transient failures persisted past the retry ceiling.
    RetriesExhausted(StreamError),
    /// The caller closed the stream.
    Requested,
}

/// Observable events emitted by a running stream.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    StateChanged {
        from: StreamState,
        to: StreamState,
    },
    /// A transient failure was observed; the next fetch waits `delay`.
    RetryScheduled {
        delay: Duration,
        step: u32,
        code: i32,
    },
    /// The debounced connection-health signal changed.
    HealthChanged { unhealthy: bool },
    /// Terminal event.
    Closed { reason: CloseReason },
}
