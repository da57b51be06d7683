/// Code used when the failure happened below the RPC layer (connection refused,
/// timeout, aborted request) and no server-side code is available.
pub const CODE_TRANSPORT: i32 = 0;
/// Code used when a response body could not be decoded.
pub const CODE_PARSE: i32 = 590;
/// Codes signalling that the remote session is no longer valid
/// (unauthorized, forbidden, gone, not implemented).
pub const TERMINAL_CODES: [i32; 4] = [401, 403, 410, 501];

/// Failure of a single `request_next_chunk` attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, serde::Serialize, serde::Deserialize)]
#[error("stream error (code {code}): {}", .message.as_deref().unwrap_or("no message"))]
pub struct StreamError {
    /// Server or HTTP status code; `0` for transport-level failures.
    pub code: i32,
    /// Optional human-readable detail.
    #[serde(default)]
    pub message: Option<String>,
}

impl StreamError {
    /// Creates an error with an explicit code.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
        }
    }

    /// Creates an error without a message.
    pub fn code(code: i32) -> Self {
        Self {
            code,
            message: None,
        }
    }

    /// Creates a transport-level error (`code == 0`).
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(CODE_TRANSPORT, message)
    }

    /// Creates a response-decoding error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(CODE_PARSE, message)
    }

    /// Returns `true` when the session can no longer be used and retrying is pointless.
    pub fn is_terminal(&self) -> bool {
        TERMINAL_CODES.contains(&self.code)
    }

    /// Returns `true` for failures that carry no server-side code.
    pub fn is_transport(&self) -> bool {
        self.code == CODE_TRANSPORT
    }
}

/// Failure raised by a [`ChunkConverter`](crate::converter::ChunkConverter).
///
/// Converter failures are contained at the dispatch boundary: they are logged
/// and the stream continues with the next chunk.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("chunk conversion failed: {message}")]
pub struct ConvertError {
    pub message: String,
}

impl ConvertError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Top-level error type for the public client API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsoleError {
    /// Invalid client or transport configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid input to the builder API.
    #[error("validation error: {0}")]
    Validation(String),
    /// The RPC collaborator could not be reached when the stream was started.
    #[error("connect failed: {0}")]
    Connect(StreamError),
    /// The background worker could not be started or went away unexpectedly.
    #[error("worker unavailable: {0}")]
    WorkerUnavailable(String),
    /// Internal protocol misuse or invariant violation.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ConsoleError {
    pub(crate) fn protocol_msg(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }
}

impl From<StreamError> for ConsoleError {
    fn from(value: StreamError) -> Self {
        ConsoleError::Connect(value)
    }
}
