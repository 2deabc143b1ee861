//! Frame server: binding, acceptance and per-connection task setup.
//!
//! # Responsibilities
//! - Bind the listening socket (`listen` / `bind`)
//! - Hold TLS credentials and the TLS on/off switch
//! - Accept connections into the acceptance queue and claim them in order
//! - Run the optional server-side handshake per connection
//! - Spawn the coordinator that owns the registry and the listener fan-out
//! - Graceful shutdown: stop accepting, drain, then abort stragglers
//!
//! # Data Flow
//! ```text
//! Listener::accept → AcceptQueue → serve_connection (task per connection)
//!     → [TLS handshake] → ConnectionEvent::Connected
//!     → drive_connection → ConnectionEvent::* → Coordinator
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;

use crate::config::ServerConfig;
use crate::dispatch::{ClientEventListener, Coordinator, ListenerSet, SourceFactory};
use crate::frame::{FrameSource, HttpFrameSource};
use crate::net::connection::{drive_connection, ConnectionGuard};
use crate::net::listener::ConnectionPermit;
use crate::net::{
    AcceptQueue, ClientConnection, ConnectionEvent, ConnectionId, ConnectionTracker, Listener,
    ListenerError, TlsError, TlsHandshakeManager, TransportHandle,
};
use crate::observability::metrics;

/// Error type for server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error("server is not listening; call listen() first")]
    NotListening,

    #[error("server is already listening on {0}")]
    AlreadyListening(SocketAddr),
}

type Accepted = (TcpStream, SocketAddr, ConnectionPermit);

/// Socket-level server that decodes frames per connection and fans them out
/// to registered listeners.
pub struct FrameServer<S: FrameSource> {
    config: ServerConfig,
    listeners: ListenerSet<S::Frame>,
    new_source: SourceFactory<S>,
    tls_enabled: bool,
    tls: TlsHandshakeManager,
    listener: Option<Listener>,
    tracker: ConnectionTracker,
}

impl FrameServer<HttpFrameSource> {
    /// Server decoding HTTP/1.x messages.
    pub fn http(config: ServerConfig) -> Self {
        Self::new(config, Arc::new(HttpFrameSource::new))
    }
}

impl<S: FrameSource> FrameServer<S> {
    pub fn new(config: ServerConfig, new_source: SourceFactory<S>) -> Self {
        let tls_enabled = config.tls.enabled;
        Self {
            config,
            listeners: ListenerSet::new(),
            new_source,
            tls_enabled,
            tls: TlsHandshakeManager::new(),
            listener: None,
            tracker: ConnectionTracker::new(),
        }
    }

    /// Register a listener. Listeners are notified in registration order.
    pub fn add_client_event_listener(
        &mut self,
        listener: Arc<dyn ClientEventListener<S::Frame>>,
    ) {
        self.listeners.register(listener);
    }

    pub fn enable_tls(&mut self, enabled: bool) {
        self.tls_enabled = enabled;
    }

    pub fn tls_enabled(&self) -> bool {
        self.tls_enabled
    }

    pub fn set_local_certificate(
        &mut self,
        cert: CertificateDer<'static>,
    ) -> Result<(), TlsError> {
        self.tls.set_local_certificate(cert)
    }

    /// Leaf certificate first, then the intermediates presented to clients.
    pub fn set_local_certificate_chain(
        &mut self,
        chain: Vec<CertificateDer<'static>>,
    ) -> Result<(), TlsError> {
        self.tls.set_local_certificate_chain(chain)
    }

    pub fn set_private_key(&mut self, key: PrivateKeyDer<'static>) -> Result<(), TlsError> {
        self.tls.set_private_key(key)
    }

    pub fn set_trusted_ca_certificates(
        &mut self,
        certs: Vec<CertificateDer<'static>>,
    ) -> Result<(), TlsError> {
        self.tls.set_trusted_ca_certificates(certs)
    }

    /// Bind `address:port`. Returns false (and logs) when the bind fails or the
    /// server is already listening; an existing binding stays active.
    pub fn listen(&mut self, address: &str, port: u16) -> bool {
        match self.bind(address, port) {
            Ok(_) => true,
            Err(error) => {
                tracing::error!(
                    address,
                    port,
                    error = %error,
                    "Failed to listen, maybe another instance is already running"
                );
                false
            }
        }
    }

    /// Bind `address:port` and return the bound address.
    pub fn bind(&mut self, address: &str, port: u16) -> Result<SocketAddr, ServerError> {
        if let Some(current) = self.local_addr() {
            return Err(ServerError::AlreadyListening(current));
        }
        let listener = Listener::bind(address, port, self.config.listener.max_connections)?;
        let local_addr = listener.local_addr().map_err(ListenerError::Bind)?;
        self.listener = Some(listener);
        Ok(local_addr)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Serve connections until `shutdown` fires (or its sender is dropped).
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<(), ServerError> {
        let listener = self.listener.ok_or(ServerError::NotListening)?;
        let idle_timeout = self.config.timeouts.idle();
        let tls = self.tls_enabled.then(|| Arc::new(self.tls));
        let tracker = self.tracker;

        tracing::info!(
            address = %listener.local_addr().map_err(ListenerError::Bind)?,
            tls = tls.is_some(),
            listeners = self.listeners.len(),
            "Frame server starting"
        );

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let coordinator = Coordinator::new(self.listeners, self.new_source);
        let coordinator_task = tokio::spawn(coordinator.run(events_rx));

        let mut pending: AcceptQueue<Accepted> = AcceptQueue::new();
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown requested, no longer accepting connections");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok(connection) => pending.enqueue(connection),
                    Err(ListenerError::LimiterClosed) => break,
                    Err(error) => {
                        tracing::warn!(error = %error, "Accept failed");
                        continue;
                    }
                },
                Some(_) = tasks.join_next(), if !tasks.is_empty() => continue,
            }

            while let Some((stream, peer_addr, permit)) = pending.claim_next() {
                let guard = tracker.track();
                tasks.spawn(serve_connection(
                    stream,
                    peer_addr,
                    permit,
                    guard,
                    tls.clone(),
                    events_tx.clone(),
                    idle_timeout,
                ));
            }
        }

        drop(listener);

        let deadline = self.config.timeouts.shutdown();
        if !tracker.wait_for_drain(deadline).await {
            tracing::warn!(
                remaining = tracker.active_count(),
                shutdown_secs = deadline.as_secs(),
                "Connections did not drain in time, aborting"
            );
            tasks.abort_all();
        }
        while tasks.join_next().await.is_some() {}

        drop(events_tx);
        if let Err(error) = coordinator_task.await {
            tracing::error!(error = %error, "Coordinator task failed");
        }

        tracing::info!("Frame server stopped");
        Ok(())
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    _permit: ConnectionPermit,
    guard: ConnectionGuard,
    tls: Option<Arc<TlsHandshakeManager>>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    idle_timeout: Duration,
) {
    let id = guard.id();
    metrics::record_connection_accepted();
    tracing::debug!(connection_id = %id, peer_addr = %peer_addr, "Incoming connection");

    if let Err(error) = stream.set_nodelay(true) {
        tracing::trace!(connection_id = %id, error = %error, "Failed to set TCP_NODELAY");
    }

    let Some(manager) = tls else {
        run_transport(id, peer_addr, stream, events, idle_timeout).await;
        return;
    };

    let acceptor = match manager.begin_handshake(id) {
        Ok(acceptor) => acceptor,
        Err(_) => {
            metrics::record_tls_rejected();
            return;
        }
    };

    let handshake = tokio::time::timeout(idle_timeout, acceptor.accept(stream)).await;
    match handshake {
        Ok(Ok(tls_stream)) => {
            let _ = events.send(ConnectionEvent::HandshakeEstablished { id });
            run_transport(id, peer_addr, tls_stream, events, idle_timeout).await;
        }
        Ok(Err(error)) => {
            let _ = events.send(ConnectionEvent::HandshakeFailed { id, error });
        }
        Err(_) => {
            let error =
                std::io::Error::new(std::io::ErrorKind::TimedOut, "TLS handshake timed out");
            let _ = events.send(ConnectionEvent::HandshakeFailed { id, error });
        }
    }
}

async fn run_transport<IO>(
    id: ConnectionId,
    peer_addr: SocketAddr,
    io: IO,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    idle_timeout: Duration,
) where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (handle, end) = TransportHandle::channel();
    let client = ClientConnection::new(id, peer_addr, handle);
    if events.send(ConnectionEvent::Connected { client }).is_err() {
        return;
    }
    drive_connection(id, io, end, events, idle_timeout).await;
}
