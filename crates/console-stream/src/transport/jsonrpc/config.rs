use std::time::Duration;

use crate::errors::ConsoleError;
use crate::session::{Endpoint, SessionId};

/// Configuration for the JSON-RPC console transport.
#[derive(Clone, Debug)]
pub struct JsonRpcConfig {
    /// JSON-RPC URL, for example `http://localhost:8081/json`.
    pub endpoint: Endpoint,
    /// Session to poll, when known up front.
    pub session: Option<SessionId>,
    /// Per-request HTTP timeout. Must exceed the server's long-poll wait.
    pub timeout: Duration,
}

impl JsonRpcConfig {
    pub fn new(endpoint: impl Into<Endpoint>) -> Self {
        Self {
            endpoint: endpoint.into(),
            session: None,
            timeout: Duration::from_secs(120),
        }
    }

    /// Builds a config from `CONSOLE_STREAM_ENDPOINT` and the optional
    /// `CONSOLE_STREAM_SESSION`.
    pub fn from_env() -> Result<Self, ConsoleError> {
        let endpoint = std::env::var("CONSOLE_STREAM_ENDPOINT").unwrap_or_default();
        if endpoint.trim().is_empty() {
            return Err(ConsoleError::Config(
                "missing CONSOLE_STREAM_ENDPOINT for the JSON-RPC transport".into(),
            ));
        }
        let mut config = Self::new(endpoint.trim());
        if let Ok(session) = std::env::var("CONSOLE_STREAM_SESSION")
            && !session.trim().is_empty()
        {
            config.session = Some(SessionId::new(session.trim()));
        }
        Ok(config)
    }

    pub fn session(mut self, session: impl Into<SessionId>) -> Self {
        self.session = Some(session.into());
        self
    }

    /// Overrides the default HTTP timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}
