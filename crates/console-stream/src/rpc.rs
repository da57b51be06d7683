//! Collaborator contracts the streaming client depends on.

use std::sync::Arc;

use crate::chunk::Chunk;
use crate::errors::StreamError;
use crate::session::{Endpoint, SessionId};

/// Result of one fetch attempt: a chunk, an explicit close (`Ok(None)`), or a failure.
pub type PollOutcome = Result<Option<Chunk>, StreamError>;

/// Remote console service.
///
/// Implementations decode the wire payload with
/// [`Chunk::from_wire`](crate::chunk::Chunk::from_wire) before returning it.
#[async_trait::async_trait]
pub trait ConsoleRpc: Send + Sync {
    async fn request_next_chunk(&self, session: &SessionId) -> PollOutcome;
}

/// Builds a [`ConsoleRpc`] bound to an endpoint.
///
/// The foreground uses it in direct mode; the offload worker uses it when it
/// receives its `Init` command.
pub trait RpcConnector: Send + Sync {
    fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn ConsoleRpc>, StreamError>;
}

/// Connector that hands out the same, already constructed service for any endpoint.
#[derive(Clone)]
pub struct StaticConnector {
    rpc: Arc<dyn ConsoleRpc>,
}

impl StaticConnector {
    pub fn new(rpc: Arc<dyn ConsoleRpc>) -> Self {
        Self { rpc }
    }
}

impl RpcConnector for StaticConnector {
    fn connect(&self, _endpoint: &Endpoint) -> Result<Arc<dyn ConsoleRpc>, StreamError> {
        Ok(self.rpc.clone())
    }
}

/// Application-control collaborator notified when the server shuts the console down.
pub trait AppControl: Send + Sync {
    /// Fire-and-forget; the result is never awaited.
    fn notify_app_unload(&self, session: &SessionId);
}

/// `AppControl` that does nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoAppControl;

impl AppControl for NoAppControl {
    fn notify_app_unload(&self, _session: &SessionId) {}
}

/// UI callbacks fired by the chunk processor.
pub trait ConsoleHooks: Send + Sync {
    /// The stream has closed, for whatever reason.
    fn on_close(&self) {}

    /// A clean shutdown was received; any "session no longer current" notice
    /// should not be presented.
    fn suppress_stale_session_notice(&self) {}
}

/// `ConsoleHooks` with every callback left as a no-op.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoHooks;

impl ConsoleHooks for NoHooks {}
