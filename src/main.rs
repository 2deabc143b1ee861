//! Frame server binary.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client bytes
//!     ─────────────▶ net::listener ──▶ AcceptQueue ──▶ [TLS handshake]
//!                                                        │
//!                                                        ▼
//!                    dispatch::Coordinator ◀── ConnectionEvent ── drive_connection
//!                        │
//!                        ├─ ConnectionRegistry (lazy per-connection decoder state)
//!                        ├─ Dispatcher (complete frames, delivered once)
//!                        └─ ListenerSet ──▶ on_request_received / on_response_received
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use frame_server::config::validation::validate_config;
use frame_server::config::{load_config, ConfigError};
use frame_server::lifecycle::{signals, startup};
use frame_server::observability::{logging, metrics};
use frame_server::{
    CallbackError, ClientConnection, ClientEventListener, HttpFrame, HttpFrameSource, ServerConfig,
    Shutdown,
};

#[derive(Parser, Debug)]
#[command(name = "frame-server", version, about = "Socket-level frame server")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind.
    #[arg(long)]
    address: Option<String>,

    /// Port to bind.
    #[arg(short, long)]
    port: Option<u16>,

    /// Require a TLS handshake on every connection.
    #[arg(long)]
    tls: bool,

    /// Local certificate (PEM).
    #[arg(long)]
    cert: Option<String>,

    /// Private key (PEM).
    #[arg(long)]
    key: Option<String>,

    /// Trusted CA certificates (PEM).
    #[arg(long)]
    ca: Option<String>,
}

impl Cli {
    fn apply(self, config: &mut ServerConfig) {
        if let Some(address) = self.address {
            config.listener.address = address;
        }
        if let Some(port) = self.port {
            config.listener.port = port;
        }
        if self.tls {
            config.tls.enabled = true;
        }
        if self.cert.is_some() {
            config.tls.cert_path = self.cert;
        }
        if self.key.is_some() {
            config.tls.key_path = self.key;
        }
        if self.ca.is_some() {
            config.tls.ca_path = self.ca;
        }
    }
}

/// Logs every frame and answers requests with an empty `200 OK`.
struct LoggingResponder;

const OK_RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

impl ClientEventListener<HttpFrame> for LoggingResponder {
    fn on_request_received(
        &self,
        client: &ClientConnection,
        frame: &HttpFrame,
    ) -> Result<(), CallbackError> {
        tracing::info!(
            connection_id = %client.id(),
            peer_addr = %client.peer_addr(),
            method = frame.method(),
            uri = frame.uri(),
            body_bytes = frame.body().len(),
            "Request received"
        );
        client.write(OK_RESPONSE).map_err(CallbackError::new)
    }

    fn on_response_received(
        &self,
        client: &ClientConnection,
        frame: &HttpFrame,
    ) -> Result<(), CallbackError> {
        tracing::info!(
            connection_id = %client.id(),
            status = frame.status_code(),
            reason = frame.reason(),
            "Response received"
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    cli.apply(&mut config);
    validate_config(&config).map_err(ConfigError::Validation)?;

    logging::init_logging(&config.observability.log_level);
    tracing::info!("frame-server v{} starting", env!("CARGO_PKG_VERSION"));

    tracing::info!(
        address = %config.listener.address,
        port = config.listener.port,
        max_connections = config.listener.max_connections,
        tls = config.tls.enabled,
        idle_secs = config.timeouts.idle_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let address = config.listener.address.clone();
    let port = config.listener.port;

    let mut server = startup::build_server(config, Arc::new(HttpFrameSource::new))?;
    server.add_client_event_listener(Arc::new(LoggingResponder));

    if !server.listen(&address, port) {
        return Err(format!("could not listen on {address}:{port}").into());
    }

    let shutdown = Shutdown::new();
    let receiver = shutdown.subscribe();
    signals::trigger_on_signal(shutdown);

    server.run(receiver).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
