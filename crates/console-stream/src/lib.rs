//! Pull-based console streaming client.
//!
//! A [`ConsoleClient`] repeatedly asks a remote console service for the next
//! chunk of output and hands every chunk to a render target, in order, with
//! at most one request outstanding. Failed requests are retried with
//! exponential backoff; session errors and shutdown notices close the stream.
//! Fetches can run on a background worker task, which behaves exactly like
//! polling from the driver.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use console_stream::prelude::*;
//! use console_stream::transport::jsonrpc::{JsonRpcClient, JsonRpcConfig};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), ConsoleError> {
//! let config = JsonRpcConfig::new("http://localhost:8081/json").session("page-1");
//! let rpc = Arc::new(JsonRpcClient::new(&config)?);
//!
//! let client = ConsoleClient::builder()
//!     .rpc(rpc.clone())
//!     .app_control(rpc)
//!     .session("page-1")
//!     .render_target(Arc::new(WriterTarget::stdout()))
//!     .build()?;
//!
//! let stream = client.start().await?;
//! let reason = stream.closed().await?;
//! println!("console closed: {reason:?}");
//! # Ok(())
//! # }
//! ```

/// Retry delay computation.
pub mod backoff;
/// Wire-decoded chunk model.
pub mod chunk;
/// Client builder, driver task and stream handle.
pub mod client;
/// Stream options.
pub mod config;
/// Chunk-to-renderable conversion.
pub mod converter;
/// Public error types.
pub mod errors;
/// Debounced connection-health signal.
pub mod health;
/// Poll-loop state machine.
pub mod machine;
/// Process-wide tracing setup.
pub mod observability;
/// Background fetch worker.
pub mod offload;
/// Direct and offloaded fetch strategies.
pub mod poller;
/// Common imports for typical usage.
pub mod prelude;
/// Chunk classification and dispatch.
pub mod processor;
/// Render targets.
pub mod render;
/// Collaborator contracts.
pub mod rpc;
/// Session and endpoint identifiers.
pub mod session;
/// Stream states, close reasons and observable events.
pub mod stream;
/// Concrete RPC transports.
pub mod transport;

#[cfg(test)]
mod testing;

pub use backoff::{BackoffController, BackoffPolicy};
pub use chunk::{Chunk, ChunkKind};
pub use client::{CloseHandle, ConsoleClient, ConsoleClientBuilder, ConsoleStream};
pub use config::{HealthArming, HealthOptions, OffloadMode, StreamOptions};
pub use converter::{ChunkConverter, DefaultConverter, ExceptionInfo};
pub use errors::{ConsoleError, ConvertError, StreamError};
pub use health::ConnectionHealthMonitor;
pub use machine::{Command, StreamMachine};
pub use observability::init_observability;
pub use processor::{ChunkProcessor, Flow};
pub use render::{BufferTarget, RenderTarget, Renderable, WriterTarget};
pub use rpc::{
    AppControl, ConsoleHooks, ConsoleRpc, NoAppControl, NoHooks, PollOutcome, RpcConnector,
    StaticConnector,
};
pub use session::{Endpoint, SessionId};
pub use stream::{CloseReason, StreamEvent, StreamState};
