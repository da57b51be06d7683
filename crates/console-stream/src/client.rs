//! Console client, its builder and the driver task.
//!
//! [`ConsoleClient::start`] spawns one driver per stream. The driver executes
//! the commands of a [`StreamMachine`]: it fetches through the selected
//! [`PollStrategy`], hands results to the [`ChunkProcessor`] and publishes
//! state, health and events to the returned [`ConsoleStream`].

use std::sync::Arc;

use tokio::sync::{broadcast, oneshot, watch};
use tokio::time::Instant;
use tracing::{Instrument as _, debug, info_span, warn};

use crate::config::StreamOptions;
use crate::converter::{ChunkConverter, DefaultConverter};
use crate::errors::ConsoleError;
use crate::machine::{Command, StreamMachine};
use crate::poller::{PollStrategy, StrategyParams, select_strategy};
use crate::processor::ChunkProcessor;
use crate::render::RenderTarget;
use crate::rpc::{
    AppControl, ConsoleHooks, ConsoleRpc, NoAppControl, NoHooks, RpcConnector, StaticConnector,
};
use crate::session::{Endpoint, SessionId};
use crate::stream::{CloseReason, StreamEvent, StreamState};

/// Endpoint label used when the RPC collaborator is injected directly.
const IN_PROCESS_ENDPOINT: &str = "in-process";

/// Handle used to request that a running console stream closes.
#[derive(Clone)]
pub struct CloseHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CloseHandle {
    /// Requests the close.
    ///
    /// The close runs through the same path as a server-side close and
    /// becomes visible as `CloseReason::Requested`.
    pub fn close(&self) {
        let _ = self.tx.send(true);
    }
}

/// A configured console: collaborators plus stream options.
///
/// Every call to [`ConsoleClient::start`] runs an independent stream.
#[derive(Clone)]
pub struct ConsoleClient {
    connector: Arc<dyn RpcConnector>,
    endpoint: Endpoint,
    session: SessionId,
    converter: Arc<dyn ChunkConverter>,
    target: Option<Arc<dyn RenderTarget>>,
    hooks: Arc<dyn ConsoleHooks>,
    app_control: Arc<dyn AppControl>,
    options: StreamOptions,
}

impl ConsoleClient {
    /// Starts configuring a client.
    pub fn builder() -> ConsoleClientBuilder {
        ConsoleClientBuilder::default()
    }

    /// Session every stream of this client polls for.
    pub fn session(&self) -> &SessionId {
        &self.session
    }

    /// Endpoint handed to the connector.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Starts polling.
    ///
    /// Connection errors of direct mode are reported here; everything after
    /// the first fetch is reported through the returned stream.
    pub async fn start(&self) -> Result<ConsoleStream, ConsoleError> {
        let strategy = select_strategy(StrategyParams {
            connector: self.connector.clone(),
            endpoint: &self.endpoint,
            session: &self.session,
            mode: self.options.offload,
            capacity: self.options.worker_channel_capacity,
        })?;

        let machine = StreamMachine::new(&self.options);
        let processor = ChunkProcessor::new(
            self.session.clone(),
            self.converter.clone(),
            self.target.clone(),
            self.hooks.clone(),
            self.app_control.clone(),
        );

        let (events_tx, events) = broadcast::channel(self.options.event_capacity);
        let (close_tx, close_rx) = watch::channel(false);
        let (final_tx, final_rx) = oneshot::channel();
        let state = machine.subscribe_state();
        let health = machine.subscribe_health();
        let offloaded = strategy.is_offloaded();

        let span = info_span!("console", session = %self.session, offloaded);
        tokio::spawn(
            drive(machine, strategy, processor, events_tx, close_rx, final_tx).instrument(span),
        );

        Ok(ConsoleStream {
            session: self.session.clone(),
            offloaded,
            events,
            state,
            health,
            close_handle: CloseHandle {
                tx: Arc::new(close_tx),
            },
            final_rx,
        })
    }
}

/// Builder for [`ConsoleClient`].
pub struct ConsoleClientBuilder {
    connector: Option<Arc<dyn RpcConnector>>,
    endpoint: Option<Endpoint>,
    session: Option<SessionId>,
    converter: Arc<dyn ChunkConverter>,
    target: Option<Arc<dyn RenderTarget>>,
    hooks: Arc<dyn ConsoleHooks>,
    app_control: Arc<dyn AppControl>,
    options: StreamOptions,
}

impl Default for ConsoleClientBuilder {
    fn default() -> Self {
        Self {
            connector: None,
            endpoint: None,
            session: None,
            converter: Arc::new(DefaultConverter),
            target: None,
            hooks: Arc::new(NoHooks),
            app_control: Arc::new(NoAppControl),
            options: StreamOptions::default(),
        }
    }
}

impl ConsoleClientBuilder {
    /// Uses `connector` to reach `endpoint`, from the driver or from the offload worker.
    pub fn connector(mut self, connector: Arc<dyn RpcConnector>, endpoint: impl Into<Endpoint>) -> Self {
        self.connector = Some(connector);
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Uses an already constructed RPC service.
    pub fn rpc(mut self, rpc: Arc<dyn ConsoleRpc>) -> Self {
        self.connector = Some(Arc::new(StaticConnector::new(rpc)));
        self.endpoint
            .get_or_insert_with(|| Endpoint::new(IN_PROCESS_ENDPOINT));
        self
    }

    /// Session to poll for; a random one is generated when unset.
    pub fn session(mut self, session: impl Into<SessionId>) -> Self {
        self.session = Some(session.into());
        self
    }

    /// Replaces the [`DefaultConverter`].
    pub fn converter(mut self, converter: Arc<dyn ChunkConverter>) -> Self {
        self.converter = converter;
        self
    }

    /// Display for converted chunks. Without one, chunks go to the tracing sink.
    pub fn render_target(mut self, target: Arc<dyn RenderTarget>) -> Self {
        self.target = Some(target);
        self
    }

    /// UI callbacks for close and clean shutdown.
    pub fn hooks(mut self, hooks: Arc<dyn ConsoleHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Receives the unload notice when the server shuts the console down.
    pub fn app_control(mut self, app_control: Arc<dyn AppControl>) -> Self {
        self.app_control = app_control;
        self
    }

    /// Stream options; validated by [`build`](Self::build).
    pub fn options(mut self, options: StreamOptions) -> Self {
        self.options = options;
        self
    }

    /// Validates the configuration.
    ///
    /// Fails with `Config` when no RPC collaborator was given and with
    /// `Validation` for blank identifiers or inconsistent options.
    pub fn build(self) -> Result<ConsoleClient, ConsoleError> {
        let connector = self
            .connector
            .ok_or_else(|| ConsoleError::Config("an RPC service or connector is required".into()))?;
        let endpoint = self
            .endpoint
            .ok_or_else(|| ConsoleError::Config("an endpoint is required".into()))?;
        if endpoint.as_str().trim().is_empty() {
            return Err(ConsoleError::Validation("endpoint must not be empty".into()));
        }
        let session = match self.session {
            Some(session) if session.as_str().trim().is_empty() => {
                return Err(ConsoleError::Validation("session must not be empty".into()));
            }
            Some(session) => session,
            None => {
                let session = SessionId::generate();
                debug!(session = %session, "no session given; generated one");
                session
            }
        };
        self.options.validate()?;

        Ok(ConsoleClient {
            connector,
            endpoint,
            session,
            converter: self.converter,
            target: self.target,
            hooks: self.hooks,
            app_control: self.app_control,
            options: self.options,
        })
    }
}

/// Handle to one running console stream.
///
/// Dropping every handle (the stream and all of its [`CloseHandle`]s) closes
/// the stream.
pub struct ConsoleStream {
    session: SessionId,
    offloaded: bool,
    events: broadcast::Receiver<StreamEvent>,
    state: watch::Receiver<StreamState>,
    health: watch::Receiver<bool>,
    close_handle: CloseHandle,
    final_rx: oneshot::Receiver<CloseReason>,
}

impl ConsoleStream {
    /// Session this stream polls for.
    pub fn session(&self) -> &SessionId {
        &self.session
    }

    /// Whether the stream was set up to fetch through the background worker.
    ///
    /// A worker that fails to start on the first fetch degrades to direct
    /// polling without changing this flag.
    pub fn is_offloaded(&self) -> bool {
        self.offloaded
    }

    /// A cloneable handle that can close the stream from elsewhere.
    pub fn close_handle(&self) -> CloseHandle {
        self.close_handle.clone()
    }

    /// Requests a close; see [`CloseHandle::close`].
    pub fn close(&self) {
        self.close_handle.close();
    }

    /// Current lifecycle state, updated as the stream runs.
    pub fn state(&self) -> watch::Receiver<StreamState> {
        self.state.clone()
    }

    /// Debounced connection-health signal; `true` while the connection looks broken.
    pub fn health(&self) -> watch::Receiver<bool> {
        self.health.clone()
    }

    /// An additional event receiver starting at the current position.
    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.events.resubscribe()
    }

    /// Waits for the next event.
    ///
    /// Returns `None` once the stream has closed and every event was consumed.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        loop {
            match self.events.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(session = %self.session, skipped, "event receiver lagged; events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Waits until the stream is closed and fully torn down.
    pub async fn closed(self) -> Result<CloseReason, ConsoleError> {
        let Self {
            session,
            close_handle,
            final_rx,
            ..
        } = self;
        // Keep the handle alive so waiting does not itself request a close.
        let _close_handle = close_handle;
        final_rx.await.map_err(|_| {
            ConsoleError::protocol_msg(format!("console driver ended without a close reason (session={session})"))
        })
    }
}

async fn drive(
    mut machine: StreamMachine,
    mut strategy: Box<dyn PollStrategy>,
    mut processor: ChunkProcessor,
    events: broadcast::Sender<StreamEvent>,
    mut close_rx: watch::Receiver<bool>,
    final_tx: oneshot::Sender<CloseReason>,
) {
    let mut close_watch_open = true;
    let mut command = machine.start(Instant::now());
    publish(&mut machine, &events);

    let reason = loop {
        command = match command {
            Command::Fetch { delay } => {
                let mut poll = strategy.poll_once(delay);
                loop {
                    tokio::select! {
                        biased;
                        changed = close_rx.changed(), if close_watch_open => {
                            if changed.is_err() {
                                close_watch_open = false;
                                debug!("all stream handles dropped; closing");
                                break machine.request_close();
                            }
                            if *close_rx.borrow_and_update() {
                                debug!("close requested");
                                break machine.request_close();
                            }
                        }
                        outcome = &mut poll => break machine.on_outcome(outcome, Instant::now()),
                        () = machine.health_expired() => publish(&mut machine, &events),
                    }
                }
            }
            Command::Deliver(chunk) => {
                let flow = processor.process(chunk, machine.health_mut());
                machine.on_delivered(flow, Instant::now())
            }
            Command::Close(reason) => break reason,
            // The driver never has a step in flight here, so waiting would stall.
            Command::Wait => {
                warn!(state = %machine.state(), "stream machine has nothing to do; closing");
                machine.request_close()
            }
        };
        publish(&mut machine, &events);
    };

    strategy.shutdown().await;
    debug!(reason = ?reason, "console stream closed");
    let _ = final_tx.send(reason);
}

fn publish(machine: &mut StreamMachine, events: &broadcast::Sender<StreamEvent>) {
    for event in machine.drain_events() {
        // No receivers is fine; the stream runs whether or not anyone watches.
        let _ = events.send(event);
    }
}
