//! Scripted collaborators shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::errors::StreamError;
use crate::rpc::{AppControl, ConsoleHooks, ConsoleRpc, PollOutcome};
use crate::session::SessionId;

/// Ordered log of everything the collaborators observed.
#[derive(Clone, Default)]
pub(crate) struct Journal {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Journal {
    pub(crate) fn push(&self, entry: impl Into<String>) {
        self.entries.lock().unwrap().push(entry.into());
    }

    pub(crate) fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }
}

/// RPC that replays a fixed list of outcomes, then reports an explicit close.
pub(crate) struct ScriptedRpc {
    script: Mutex<VecDeque<PollOutcome>>,
    latency: Duration,
    journal: Journal,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedRpc {
    pub(crate) fn new(script: Vec<PollOutcome>, journal: Journal) -> Arc<Self> {
        Self::with_latency(script, journal, Duration::ZERO)
    }

    pub(crate) fn with_latency(
        script: Vec<PollOutcome>,
        journal: Journal,
        latency: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            latency,
            journal,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ConsoleRpc for ScriptedRpc {
    async fn request_next_chunk(&self, session: &SessionId) -> PollOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.journal.push(format!("fetch:{session}"));
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        match next {
            Some(Err(err)) => {
                self.journal.push(format!("error:{}", err.code));
                Err(err)
            }
            Some(ok) => ok,
            None => Ok(None),
        }
    }
}

/// RPC whose calls never complete.
pub(crate) struct HangingRpc;

#[async_trait::async_trait]
impl ConsoleRpc for HangingRpc {
    async fn request_next_chunk(&self, _session: &SessionId) -> PollOutcome {
        futures::future::pending::<()>().await;
        Err(StreamError::transport("unreachable"))
    }
}

#[derive(Clone, Default)]
pub(crate) struct RecordingHooks {
    pub(crate) journal: Journal,
    closes: Arc<AtomicUsize>,
    suppressed: Arc<AtomicUsize>,
}

impl RecordingHooks {
    pub(crate) fn new(journal: Journal) -> Self {
        Self {
            journal,
            ..Self::default()
        }
    }

    pub(crate) fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub(crate) fn suppressed(&self) -> usize {
        self.suppressed.load(Ordering::SeqCst)
    }
}

impl ConsoleHooks for RecordingHooks {
    fn on_close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.journal.push("close");
    }

    fn suppress_stale_session_notice(&self) {
        self.suppressed.fetch_add(1, Ordering::SeqCst);
        self.journal.push("suppress-notice");
    }
}

#[derive(Clone, Default)]
pub(crate) struct RecordingAppControl {
    unloads: Arc<Mutex<Vec<SessionId>>>,
}

impl RecordingAppControl {
    pub(crate) fn unloads(&self) -> Vec<SessionId> {
        self.unloads.lock().unwrap().clone()
    }
}

impl AppControl for RecordingAppControl {
    fn notify_app_unload(&self, session: &SessionId) {
        self.unloads.lock().unwrap().push(session.clone());
    }
}
