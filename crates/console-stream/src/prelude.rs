//! Common imports for typical console usage.
pub use crate::{
    BufferTarget, Chunk, CloseHandle, CloseReason, ConsoleClient, ConsoleError, ConsoleHooks,
    ConsoleStream, OffloadMode, RenderTarget, Renderable, SessionId, StreamEvent, StreamOptions,
    StreamState, WriterTarget,
};
