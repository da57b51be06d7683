use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use console_stream::init_observability;
use console_stream::prelude::*;
use console_stream::transport::jsonrpc::{JsonRpcClient, JsonRpcConfig, JsonRpcConnector};

/// Tail a remote console over JSON-RPC and print its output.
#[derive(Parser)]
struct Args {
    /// JSON-RPC endpoint; falls back to CONSOLE_STREAM_ENDPOINT.
    #[arg(long)]
    endpoint: Option<String>,
    /// Session to follow; falls back to CONSOLE_STREAM_SESSION.
    #[arg(long)]
    session: Option<String>,
    #[arg(long, value_enum)]
    offload: Option<Offload>,
    /// HTTP timeout per request, in seconds.
    #[arg(long, default_value_t = 120)]
    timeout_secs: u64,
}

#[derive(Clone, Copy, ValueEnum)]
enum Offload {
    Auto,
    Never,
    Always,
}

impl From<Offload> for OffloadMode {
    fn from(value: Offload) -> Self {
        match value {
            Offload::Auto => OffloadMode::Auto,
            Offload::Never => OffloadMode::Never,
            Offload::Always => OffloadMode::Always,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), ConsoleError> {
    dotenvy::dotenv().ok();
    init_observability();
    let args = Args::parse();

    let mut config = match args.endpoint {
        Some(endpoint) => JsonRpcConfig::new(endpoint),
        None => JsonRpcConfig::from_env()?,
    };
    if let Some(session) = args.session {
        config = config.session(session);
    }
    config = config.timeout(Duration::from_secs(args.timeout_secs));
    let session = config.session.clone().unwrap_or_else(SessionId::generate);

    let mut options = StreamOptions::from_env()?;
    if let Some(offload) = args.offload {
        options.offload = offload.into();
    }

    let client = ConsoleClient::builder()
        .connector(
            Arc::new(JsonRpcConnector::from_config(&config)?),
            config.endpoint.clone(),
        )
        .app_control(Arc::new(JsonRpcClient::new(&config)?))
        .session(session)
        .render_target(Arc::new(WriterTarget::stdout()))
        .options(options)
        .build()?;

    let mut stream = client.start().await?;
    while let Some(event) = stream.next_event().await {
        match event {
            StreamEvent::HealthChanged { unhealthy: true } => eprintln!("[connection problems]"),
            StreamEvent::HealthChanged { unhealthy: false } => eprintln!("[connection restored]"),
            StreamEvent::Closed { reason } => eprintln!("[console closed: {reason:?}]"),
            _ => {}
        }
    }

    stream.closed().await?;
    Ok(())
}
