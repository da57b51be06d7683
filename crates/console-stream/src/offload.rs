//! Background worker that performs fetches on behalf of the driver.
//!
//! The exchange is strictly request driven: the driver sends `Next`, the
//! worker performs exactly one fetch and answers with exactly one event, so
//! there is never more than one fetch outstanding. Every result is relayed,
//! including empty chunks and closes, which keeps the driver's backoff and
//! health decisions identical to direct polling.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::chunk::Chunk;
use crate::errors::{ConsoleError, StreamError};
use crate::rpc::{ConsoleRpc, PollOutcome, RpcConnector};
use crate::session::{Endpoint, SessionId};

/// Driver to worker.
#[derive(Clone, Debug, PartialEq)]
pub enum WorkerCommand {
    /// Sent once, before any `Next`.
    Init {
        endpoint: Endpoint,
        session: SessionId,
    },
    /// Perform one fetch after waiting `delay`.
    Next { delay: Duration },
}

/// Worker to driver.
#[derive(Clone, Debug, PartialEq)]
pub enum WorkerEvent {
    /// One fetch result; `None` is an explicit close.
    Chunk(Option<Chunk>),
    Error(StreamError),
}

impl From<WorkerEvent> for PollOutcome {
    fn from(event: WorkerEvent) -> Self {
        match event {
            WorkerEvent::Chunk(chunk) => Ok(chunk),
            WorkerEvent::Error(err) => Err(err),
        }
    }
}

/// Driver-side end of a running worker.
pub struct WorkerChannel {
    commands: mpsc::Sender<WorkerCommand>,
    events: mpsc::Receiver<WorkerEvent>,
    task: JoinHandle<()>,
    outstanding: bool,
}

impl WorkerChannel {
    /// Spawns the worker on the current runtime and sends its `Init` command.
    pub fn spawn(
        connector: Arc<dyn RpcConnector>,
        endpoint: Endpoint,
        session: SessionId,
        capacity: usize,
    ) -> Result<Self, ConsoleError> {
        let handle =
            Handle::try_current().map_err(|e| ConsoleError::WorkerUnavailable(e.to_string()))?;
        if capacity == 0 {
            return Err(ConsoleError::Validation(
                "worker_channel_capacity must be greater than 0".into(),
            ));
        }

        let (commands, command_rx) = mpsc::channel(capacity);
        let (event_tx, events) = mpsc::channel(capacity);
        commands
            .try_send(WorkerCommand::Init { endpoint, session })
            .map_err(|e| ConsoleError::WorkerUnavailable(e.to_string()))?;
        let task = handle.spawn(worker_loop(connector, command_rx, event_tx));

        Ok(Self {
            commands,
            events,
            task,
            outstanding: false,
        })
    }

    /// Asks the worker for one fetch and waits for its answer.
    ///
    /// Cancel safe: if a previous call was dropped after its `Next` was sent,
    /// this call collects that answer instead of issuing a second fetch.
    pub async fn request(&mut self, delay: Duration) -> PollOutcome {
        if !self.outstanding {
            self.commands
                .send(WorkerCommand::Next { delay })
                .await
                .map_err(|_| StreamError::transport("offload worker stopped"))?;
            self.outstanding = true;
        }
        let event = self.events.recv().await;
        self.outstanding = false;
        match event {
            Some(event) => event.into(),
            None => Err(StreamError::transport("offload worker stopped")),
        }
    }

    /// Stops the worker and waits until it is gone, so no late result can
    /// surface after the stream has closed.
    pub async fn shutdown(self) {
        let Self {
            commands,
            mut events,
            task,
            ..
        } = self;
        drop(commands);
        events.close();
        task.abort();
        match task.await {
            Ok(()) => {}
            Err(err) if err.is_cancelled() => {}
            Err(err) => warn!(error = %err, "offload worker failed"),
        }
        debug!("offload worker stopped");
    }
}

async fn worker_loop(
    connector: Arc<dyn RpcConnector>,
    mut commands: mpsc::Receiver<WorkerCommand>,
    events: mpsc::Sender<WorkerEvent>,
) {
    let mut bound: Result<(Arc<dyn ConsoleRpc>, SessionId), StreamError> =
        Err(StreamError::transport("offload worker not initialized"));
    // Logging only; the driver decides every delay.
    let mut consecutive_failures: u32 = 0;

    while let Some(command) = commands.recv().await {
        match command {
            WorkerCommand::Init { endpoint, session } => {
                debug!(endpoint = %endpoint, session = %session, "offload worker initializing");
                bound = connector.connect(&endpoint).map(|rpc| (rpc, session));
                if let Err(err) = &bound {
                    warn!(endpoint = %endpoint, error = %err, "offload worker could not connect");
                }
            }
            WorkerCommand::Next { delay } => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let outcome = match &bound {
                    Ok((rpc, session)) => rpc.request_next_chunk(session).await,
                    Err(err) => Err(err.clone()),
                };
                let event = match outcome {
                    Ok(chunk) => {
                        consecutive_failures = 0;
                        WorkerEvent::Chunk(chunk)
                    }
                    Err(err) => {
                        consecutive_failures += 1;
                        debug!(code = err.code, consecutive_failures, "offload fetch failed");
                        WorkerEvent::Error(err)
                    }
                };
                if events.send(event).await.is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::StaticConnector;
    use crate::testing::{HangingRpc, Journal, ScriptedRpc};

    fn connector(rpc: Arc<dyn ConsoleRpc>) -> Arc<dyn RpcConnector> {
        Arc::new(StaticConnector::new(rpc))
    }

    #[tokio::test]
    async fn relays_every_result_in_order() {
        let journal = Journal::default();
        let rpc = ScriptedRpc::new(
            vec![
                Ok(Some(Chunk::Text("a".into()))),
                Ok(Some(Chunk::Empty)),
                Err(StreamError::new(503, "busy")),
                Ok(None),
            ],
            journal.clone(),
        );
        let mut channel = WorkerChannel::spawn(
            connector(rpc.clone()),
            Endpoint::new("http://console.test/rpc"),
            SessionId::new("s-1"),
            1,
        )
        .expect("runtime available");

        assert_eq!(channel.request(Duration::ZERO).await, Ok(Some(Chunk::Text("a".into()))));
        assert_eq!(channel.request(Duration::ZERO).await, Ok(Some(Chunk::Empty)));
        assert_eq!(
            channel.request(Duration::ZERO).await,
            Err(StreamError::new(503, "busy"))
        );
        assert_eq!(channel.request(Duration::ZERO).await, Ok(None));
        channel.shutdown().await;

        assert_eq!(rpc.calls(), 4);
        assert_eq!(rpc.max_in_flight(), 1);
        assert_eq!(journal.entries()[0], "fetch:s-1");
    }

    #[tokio::test(start_paused = true)]
    async fn next_waits_for_requested_delay() {
        let rpc = ScriptedRpc::new(vec![Ok(Some(Chunk::Empty))], Journal::default());
        let mut channel = WorkerChannel::spawn(
            connector(rpc),
            Endpoint::new("local"),
            SessionId::new("s"),
            1,
        )
        .expect("runtime available");
        let started = tokio::time::Instant::now();
        channel.request(Duration::from_millis(512)).await.expect("chunk");
        assert_eq!(started.elapsed(), Duration::from_millis(512));
        channel.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_aborts_an_outstanding_fetch() {
        let mut channel = WorkerChannel::spawn(
            connector(Arc::new(HangingRpc)),
            Endpoint::new("local"),
            SessionId::new("s"),
            1,
        )
        .expect("runtime available");
        let pending = tokio::time::timeout(Duration::from_millis(10), channel.request(Duration::ZERO)).await;
        assert!(pending.is_err());
        channel.shutdown().await;
    }

    #[test]
    fn spawn_without_runtime_is_unavailable() {
        let result = WorkerChannel::spawn(
            connector(Arc::new(HangingRpc)),
            Endpoint::new("local"),
            SessionId::new("s"),
            1,
        );
        assert!(matches!(result, Err(ConsoleError::WorkerUnavailable(_))));
    }

    #[tokio::test]
    async fn connect_failure_is_reported_per_fetch() {
        struct Refusing;
        impl RpcConnector for Refusing {
            fn connect(&self, _endpoint: &Endpoint) -> Result<Arc<dyn ConsoleRpc>, StreamError> {
                Err(StreamError::new(0, "refused"))
            }
        }
        let mut channel = WorkerChannel::spawn(
            Arc::new(Refusing),
            Endpoint::new("local"),
            SessionId::new("s"),
            1,
        )
        .expect("runtime available");
        assert_eq!(
            channel.request(Duration::ZERO).await,
            Err(StreamError::new(0, "refused"))
        );
        channel.shutdown().await;
    }
}
