//! Connection identity, lifetime tracking and the per-connection I/O task.
//!
//! # Responsibilities
//! - Generate unique connection IDs (the handle the registry is keyed by)
//! - Track live connections for graceful shutdown
//! - Run the read/write loop of one socket and report events to the coordinator
//!
//! # Design Decisions
//! - The I/O task is the only owner of the socket
//! - Reads are bounded by an idle timeout; a stalled partial frame cannot pin a connection
//! - `Disconnected` is always the last event a task reports

use bytes::{Bytes, BytesMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::timeout;

use super::transport::{ClientConnection, Connectivity, TransportCommand, TransportEnd};
use crate::observability::metrics;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Notifications raised by connection tasks, consumed in order by the coordinator.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// Transport is ready for data handling (after the handshake when TLS is on).
    Connected { client: ClientConnection },
    /// Bytes read from the socket.
    Readable { id: ConnectionId, data: Bytes },
    /// Peer finished sending.
    ReadClosed { id: ConnectionId },
    /// Socket-level failure. A `Disconnected` follows.
    Error { id: ConnectionId, error: std::io::Error },
    HandshakeEstablished { id: ConnectionId },
    HandshakeFailed { id: ConnectionId, error: std::io::Error },
    /// Transport fully closed.
    Disconnected { id: ConnectionId },
}

impl ConnectionEvent {
    pub fn id(&self) -> ConnectionId {
        match self {
            ConnectionEvent::Connected { client } => client.id(),
            ConnectionEvent::Readable { id, .. }
            | ConnectionEvent::ReadClosed { id }
            | ConnectionEvent::Error { id, .. }
            | ConnectionEvent::HandshakeEstablished { id }
            | ConnectionEvent::HandshakeFailed { id, .. }
            | ConnectionEvent::Disconnected { id } => *id,
        }
    }
}

/// Tracks active connections for graceful shutdown.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    /// Current count of active connections.
    active_count: Arc<AtomicU64>,
}

impl ConnectionTracker {
    /// Create a new connection tracker.
    pub fn new() -> Self {
        Self {
            active_count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Record a new active connection. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        let active = self.active_count.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_active_connections(active);
        ConnectionGuard {
            active_count: Arc::clone(&self.active_count),
            id: ConnectionId::new(),
        }
    }

    /// Get current active connection count.
    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Wait until all connections are closed or the deadline passes.
    /// Returns false on timeout.
    pub async fn wait_for_drain(&self, deadline: Duration) -> bool {
        timeout(deadline, async {
            while self.active_count.load(Ordering::SeqCst) > 0 {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        })
        .await
        .is_ok()
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that tracks a connection's lifetime.
/// Decrements active count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    active_count: Arc<AtomicU64>,
    id: ConnectionId,
}

impl ConnectionGuard {
    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let active = self.active_count.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        metrics::set_active_connections(active);
        tracing::trace!(connection_id = %self.id, "Connection released");
    }
}

/// Run the I/O loop for one connection until it closes.
///
/// Reads are forwarded as `Readable` events; writes and the close request arrive
/// through `end.commands` and are executed in order.
pub async fn drive_connection<IO>(
    id: ConnectionId,
    mut io: IO,
    end: TransportEnd,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    idle_timeout: Duration,
) where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
{
    let TransportEnd { mut commands, status } = end;
    let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
    let mut reading = true;

    loop {
        buf.reserve(READ_BUFFER_SIZE);

        tokio::select! {
            biased;

            command = commands.recv() => match command {
                Some(TransportCommand::Write(data)) => {
                    if let Err(error) = io.write_all(&data).await {
                        tracing::debug!(connection_id = %id, error = %error, "Write failed");
                        let _ = events.send(ConnectionEvent::Error { id, error });
                        break;
                    }
                }
                Some(TransportCommand::Close) | None => {
                    status.set(Connectivity::Closing);
                    let _ = io.flush().await;
                    let _ = io.shutdown().await;
                    break;
                }
            },

            read = timeout(idle_timeout, io.read_buf(&mut buf)), if reading => match read {
                Err(_) => {
                    tracing::debug!(
                        connection_id = %id,
                        idle_secs = idle_timeout.as_secs(),
                        "Idle timeout, closing connection"
                    );
                    metrics::record_idle_timeout();
                    status.set(Connectivity::Closing);
                    let _ = io.shutdown().await;
                    break;
                }
                Ok(Ok(0)) => {
                    tracing::trace!(connection_id = %id, "Peer closed its write side");
                    reading = false;
                    let _ = events.send(ConnectionEvent::ReadClosed { id });
                }
                Ok(Ok(n)) => {
                    tracing::trace!(connection_id = %id, bytes = n, "Read");
                    let data = buf.split().freeze();
                    let _ = events.send(ConnectionEvent::Readable { id, data });
                }
                Ok(Err(error)) => {
                    tracing::debug!(connection_id = %id, error = %error, "Read failed");
                    let _ = events.send(ConnectionEvent::Error { id, error });
                    break;
                }
            },
        }
    }

    status.set(Connectivity::Unconnected);
    let _ = events.send(ConnectionEvent::Disconnected { id });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::transport::{Transport, TransportHandle};
    use tokio::io::duplex;

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn connection_tracker_counts() {
        let tracker = ConnectionTracker::new();
        assert_eq!(tracker.active_count(), 0);

        let guard1 = tracker.track();
        assert_eq!(tracker.active_count(), 1);

        let guard2 = tracker.track();
        assert_eq!(tracker.active_count(), 2);
        assert_ne!(guard1.id(), guard2.id());

        drop(guard1);
        assert_eq!(tracker.active_count(), 1);

        drop(guard2);
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test]
    async fn drain_times_out_with_live_connection() {
        let tracker = ConnectionTracker::new();
        let _guard = tracker.track();
        assert!(!tracker.wait_for_drain(Duration::from_millis(150)).await);
    }

    #[tokio::test]
    async fn reads_become_events_and_close_flushes_writes() {
        let (client, server) = duplex(1024);
        let (handle, end) = TransportHandle::channel();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = ConnectionId::new();

        let task = tokio::spawn(drive_connection(id, server, end, tx, Duration::from_secs(5)));

        let (mut client_read, mut client_write) = tokio::io::split(client);
        client_write.write_all(b"ping").await.unwrap();

        match rx.recv().await.unwrap() {
            ConnectionEvent::Readable { id: got, data } => {
                assert_eq!(got, id);
                assert_eq!(&data[..], b"ping");
            }
            other => panic!("unexpected event {other:?}"),
        }

        handle.write(Bytes::from_static(b"pong")).unwrap();
        handle.close();
        task.await.unwrap();

        let mut reply = Vec::new();
        client_read.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, b"pong");
        assert_eq!(handle.connectivity(), Connectivity::Unconnected);
        assert!(matches!(rx.recv().await, Some(ConnectionEvent::Disconnected { .. })));
    }

    #[tokio::test]
    async fn idle_timeout_disconnects() {
        let (_client, server) = duplex(64);
        let (handle, end) = TransportHandle::channel();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = ConnectionId::new();

        drive_connection(id, server, end, tx, Duration::from_millis(50)).await;

        assert_eq!(handle.connectivity(), Connectivity::Unconnected);
        assert!(matches!(
            rx.recv().await,
            Some(ConnectionEvent::Disconnected { id: got }) if got == id
        ));
    }
}
