use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::chunk::Chunk;
use crate::errors::{ConsoleError, StreamError};
use crate::rpc::{AppControl, ConsoleRpc, PollOutcome, RpcConnector};
use crate::session::{Endpoint, SessionId};

use super::config::JsonRpcConfig;
use super::wire::{APP_UNLOAD_METHOD, NEXT_CHUNK_METHOD, RpcRequest, SESSION_PARAM, parse_response};

/// JSON-RPC over HTTP client for the console and app-control services.
#[derive(Clone)]
pub struct JsonRpcClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    http: reqwest::Client,
    endpoint: Endpoint,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(config: &JsonRpcConfig) -> Result<Self, ConsoleError> {
        let http = build_http(config.timeout)?;
        Ok(Self::with_http(http, config.endpoint.clone()))
    }

    /// Creates a client from `CONSOLE_STREAM_ENDPOINT`.
    pub fn from_env() -> Result<Self, ConsoleError> {
        Self::new(&JsonRpcConfig::from_env()?)
    }

    fn with_http(http: reqwest::Client, endpoint: Endpoint) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                http,
                endpoint,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    /// Performs one call and returns its raw `result`.
    pub async fn call(
        &self,
        session: &SessionId,
        method: &str,
        params: Vec<Value>,
    ) -> Result<Value, StreamError> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(id, method, session = %session, "json-rpc call");
        let request = RpcRequest { id, method, params };

        let response = self
            .inner
            .http
            .post(self.inner.endpoint.as_str())
            .query(&[(SESSION_PARAM, session.as_str())])
            .json(&request)
            .send()
            .await
            .map_err(|e| StreamError::transport(format!("{method} request failed: {e}")))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| StreamError::transport(format!("failed to read {method} response: {e}")))?;
        parse_response(status, &body)
    }
}

#[async_trait::async_trait]
impl ConsoleRpc for JsonRpcClient {
    async fn request_next_chunk(&self, session: &SessionId) -> PollOutcome {
        let result = self.call(session, NEXT_CHUNK_METHOD, Vec::new()).await?;
        Ok(Chunk::from_wire(result))
    }
}

impl AppControl for JsonRpcClient {
    fn notify_app_unload(&self, session: &SessionId) {
        let Ok(handle) = Handle::try_current() else {
            warn!(session = %session, "no runtime available; app unload notification dropped");
            return;
        };
        let client = self.clone();
        let session = session.clone();
        handle.spawn(async move {
            let params = vec![Value::String(session.as_str().to_owned())];
            if let Err(err) = client.call(&session, APP_UNLOAD_METHOD, params).await {
                debug!(session = %session, error = %err, "app unload notification failed");
            }
        });
    }
}

/// Connector that opens a [`JsonRpcClient`] per endpoint, sharing one HTTP pool.
#[derive(Clone)]
pub struct JsonRpcConnector {
    http: reqwest::Client,
}

impl JsonRpcConnector {
    pub fn new(timeout: Duration) -> Result<Self, ConsoleError> {
        Ok(Self {
            http: build_http(timeout)?,
        })
    }

    pub fn from_config(config: &JsonRpcConfig) -> Result<Self, ConsoleError> {
        Self::new(config.timeout)
    }
}

impl RpcConnector for JsonRpcConnector {
    fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn ConsoleRpc>, StreamError> {
        if reqwest::Url::parse(endpoint.as_str()).is_err() {
            return Err(StreamError::transport(format!("invalid endpoint URL: {endpoint}")));
        }
        Ok(Arc::new(JsonRpcClient::with_http(
            self.http.clone(),
            endpoint.clone(),
        )))
    }
}

fn build_http(timeout: Duration) -> Result<reqwest::Client, ConsoleError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ConsoleError::Config(format!("failed to build JSON-RPC client: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connector_rejects_malformed_urls() {
        let connector = JsonRpcConnector::new(Duration::from_secs(1)).expect("connector");
        let err = connector
            .connect(&Endpoint::new("not a url"))
            .err()
            .expect("invalid url");
        assert!(err.is_transport());
        assert!(connector.connect(&Endpoint::new("http://127.0.0.1:9/json")).is_ok());
    }

    fn closed_local_endpoint() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("local addr").port();
        drop(listener);
        format!("http://127.0.0.1:{port}/json")
    }

    #[tokio::test]
    async fn unreachable_server_is_a_transport_error() {
        let client = JsonRpcClient::new(
            &JsonRpcConfig::new(closed_local_endpoint()).timeout(Duration::from_secs(2)),
        )
        .expect("client");
        let err = client
            .request_next_chunk(&SessionId::new("page-1"))
            .await
            .expect_err("the port was released before the call");
        assert!(err.is_transport());
        assert!(!err.is_terminal());
    }
}
