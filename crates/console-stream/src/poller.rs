//! Fetch strategies.
//!
//! A stream polls either from its driver task ([`DirectPoller`]) or through a
//! background worker ([`OffloadPoller`]). Both produce the same results for
//! the same collaborator; only where the fetch runs differs.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, warn};

use crate::config::OffloadMode;
use crate::errors::{ConsoleError, StreamError};
use crate::offload::WorkerChannel;
use crate::rpc::{ConsoleRpc, PollOutcome, RpcConnector};
use crate::session::{Endpoint, SessionId};

/// How the driver performs one fetch.
#[async_trait::async_trait]
pub trait PollStrategy: Send {
    /// Waits `delay`, then fetches the next chunk.
    async fn poll_once(&mut self, delay: Duration) -> PollOutcome;

    /// Releases whatever execution context the strategy owns.
    async fn shutdown(&mut self) {}

    /// Whether fetches currently run on a background worker.
    fn is_offloaded(&self) -> bool {
        false
    }
}

/// Fetches from the driver task itself.
pub struct DirectPoller {
    rpc: Arc<dyn ConsoleRpc>,
    session: SessionId,
}

impl DirectPoller {
    /// Polls `rpc` for `session`.
    pub fn new(rpc: Arc<dyn ConsoleRpc>, session: SessionId) -> Self {
        Self { rpc, session }
    }
}

#[async_trait::async_trait]
impl PollStrategy for DirectPoller {
    async fn poll_once(&mut self, delay: Duration) -> PollOutcome {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.rpc.request_next_chunk(&self.session).await
    }
}

/// Fetches through the background worker, spawned on the first fetch.
///
/// If the worker cannot be started the poller keeps going as a
/// [`DirectPoller`].
pub struct OffloadPoller {
    worker: WorkerState,
}

enum WorkerState {
    NotStarted(WorkerSetup),
    Running(WorkerChannel),
    Fallback(DirectPoller),
    Stopped,
}

struct WorkerSetup {
    connector: Arc<dyn RpcConnector>,
    endpoint: Endpoint,
    session: SessionId,
    capacity: usize,
}

impl OffloadPoller {
    fn lazy(setup: WorkerSetup) -> Self {
        Self {
            worker: WorkerState::NotStarted(setup),
        }
    }

    fn ensure_started(&mut self) -> Result<(), StreamError> {
        let WorkerState::NotStarted(setup) = &self.worker else {
            return Ok(());
        };
        let next = match WorkerChannel::spawn(
            setup.connector.clone(),
            setup.endpoint.clone(),
            setup.session.clone(),
            setup.capacity,
        ) {
            Ok(channel) => {
                debug!(session = %setup.session, "offload worker started");
                WorkerState::Running(channel)
            }
            Err(err) => {
                warn!(session = %setup.session, error = %err, "offload worker unavailable; polling directly");
                let rpc = setup.connector.connect(&setup.endpoint)?;
                WorkerState::Fallback(DirectPoller::new(rpc, setup.session.clone()))
            }
        };
        self.worker = next;
        Ok(())
    }
}

#[async_trait::async_trait]
impl PollStrategy for OffloadPoller {
    async fn poll_once(&mut self, delay: Duration) -> PollOutcome {
        self.ensure_started()?;
        match &mut self.worker {
            WorkerState::Running(channel) => channel.request(delay).await,
            WorkerState::Fallback(direct) => direct.poll_once(delay).await,
            WorkerState::NotStarted(_) | WorkerState::Stopped => {
                Err(StreamError::transport("offload worker already shut down"))
            }
        }
    }

    async fn shutdown(&mut self) {
        let worker = std::mem::replace(&mut self.worker, WorkerState::Stopped);
        if let WorkerState::Running(channel) = worker {
            channel.shutdown().await;
        }
    }

    fn is_offloaded(&self) -> bool {
        !matches!(self.worker, WorkerState::Fallback(_))
    }
}

/// Everything needed to build a poll strategy for one stream.
pub(crate) struct StrategyParams<'a> {
    pub connector: Arc<dyn RpcConnector>,
    pub endpoint: &'a Endpoint,
    pub session: &'a SessionId,
    pub mode: OffloadMode,
    pub capacity: usize,
}

/// Picks direct or offloaded polling.
///
/// `Auto` offloads only when the runtime can actually run the worker in
/// parallel.
pub(crate) fn select_strategy(
    params: StrategyParams<'_>,
) -> Result<Box<dyn PollStrategy>, ConsoleError> {
    let offload = match params.mode {
        OffloadMode::Never => false,
        OffloadMode::Always => true,
        OffloadMode::Auto => Handle::try_current()
            .map(|handle| handle.runtime_flavor() == RuntimeFlavor::MultiThread)
            .unwrap_or(false),
    };

    if offload {
        debug!(session = %params.session, "polling through offload worker");
        return Ok(Box::new(OffloadPoller::lazy(WorkerSetup {
            connector: params.connector,
            endpoint: params.endpoint.clone(),
            session: params.session.clone(),
            capacity: params.capacity,
        })));
    }

    let rpc = params
        .connector
        .connect(params.endpoint)
        .map_err(ConsoleError::Connect)?;
    debug!(session = %params.session, "polling directly");
    Ok(Box::new(DirectPoller::new(rpc, params.session.clone())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Chunk;
    use crate::rpc::StaticConnector;
    use crate::testing::{Journal, ScriptedRpc};

    fn params<'a>(
        rpc: Arc<dyn ConsoleRpc>,
        endpoint: &'a Endpoint,
        session: &'a SessionId,
        mode: OffloadMode,
    ) -> StrategyParams<'a> {
        StrategyParams {
            connector: Arc::new(StaticConnector::new(rpc)),
            endpoint,
            session,
            mode,
            capacity: 1,
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn auto_polls_directly_on_single_threaded_runtime() {
        let rpc = ScriptedRpc::new(vec![Ok(Some(Chunk::Empty))], Journal::default());
        let (endpoint, session) = (Endpoint::new("e"), SessionId::new("s"));
        let mut strategy =
            select_strategy(params(rpc, &endpoint, &session, OffloadMode::Auto)).expect("strategy");
        assert!(!strategy.is_offloaded());
        assert_eq!(strategy.poll_once(Duration::ZERO).await, Ok(Some(Chunk::Empty)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn auto_offloads_on_multi_threaded_runtime() {
        let rpc = ScriptedRpc::new(vec![Ok(Some(Chunk::Text("x".into())))], Journal::default());
        let (endpoint, session) = (Endpoint::new("e"), SessionId::new("s"));
        let mut strategy =
            select_strategy(params(rpc, &endpoint, &session, OffloadMode::Auto)).expect("strategy");
        assert!(strategy.is_offloaded());
        assert_eq!(
            strategy.poll_once(Duration::ZERO).await,
            Ok(Some(Chunk::Text("x".into())))
        );
        strategy.shutdown().await;
        assert!(strategy.poll_once(Duration::ZERO).await.is_err());
    }

    #[tokio::test]
    async fn worker_that_cannot_start_falls_back_to_direct_polling() {
        let journal = Journal::default();
        let rpc = ScriptedRpc::new(vec![Ok(Some(Chunk::Text("x".into())))], journal.clone());
        let (endpoint, session) = (Endpoint::new("e"), SessionId::new("s"));
        let mut strategy = select_strategy(StrategyParams {
            capacity: 0,
            ..params(rpc, &endpoint, &session, OffloadMode::Always)
        })
        .expect("strategy");
        assert!(strategy.is_offloaded());
        assert_eq!(
            strategy.poll_once(Duration::ZERO).await,
            Ok(Some(Chunk::Text("x".into())))
        );
        assert!(!strategy.is_offloaded());
        assert_eq!(journal.entries(), vec!["fetch:s"]);
    }

    #[tokio::test(start_paused = true)]
    async fn direct_poller_honors_delay() {
        let rpc = ScriptedRpc::new(vec![Ok(Some(Chunk::Empty))], Journal::default());
        let mut poller = DirectPoller::new(rpc, SessionId::new("s"));
        let started = tokio::time::Instant::now();
        poller.poll_once(Duration::from_millis(256)).await.expect("chunk");
        assert_eq!(started.elapsed(), Duration::from_millis(256));
    }
}
