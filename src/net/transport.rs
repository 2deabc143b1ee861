//! Transport boundary between connection I/O tasks and the coordinator.
//!
//! # Responsibilities
//! - Carry write/close commands to the task that owns the socket
//! - Publish the socket's connectivity so teardown can decide on release
//! - Give listeners a cloneable handle for writing responses
//!
//! # Design Decisions
//! - Writes and close share one ordered channel: queued writes flush before shutdown
//! - Connectivity is a single atomic written only by the I/O task (and by `close`)

use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::connection::ConnectionId;

/// Connectivity reported by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    /// Socket is open for reads and writes.
    Connected,
    /// Close requested; pending writes are flushing or the peer has not finished.
    Closing,
    /// Fully closed. Resources may be released.
    Unconnected,
}

impl Connectivity {
    fn to_u8(self) -> u8 {
        match self {
            Connectivity::Connected => 0,
            Connectivity::Closing => 1,
            Connectivity::Unconnected => 2,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => Connectivity::Connected,
            1 => Connectivity::Closing,
            _ => Connectivity::Unconnected,
        }
    }
}

/// What teardown needs from a transport.
pub trait Transport {
    /// True while neither side has asked for a close.
    fn is_open(&self) -> bool;

    /// Ask the transport to close its read and write channels.
    fn close(&self);

    fn connectivity(&self) -> Connectivity;
}

/// Command executed in order by a connection's I/O task.
#[derive(Debug)]
pub enum TransportCommand {
    Write(Bytes),
    Close,
}

/// Shared connectivity cell.
#[derive(Debug, Clone)]
pub struct TransportStatus(Arc<AtomicU8>);

impl TransportStatus {
    fn new() -> Self {
        Self(Arc::new(AtomicU8::new(Connectivity::Connected.to_u8())))
    }

    pub fn get(&self) -> Connectivity {
        Connectivity::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: Connectivity) {
        self.0.store(state.to_u8(), Ordering::Release);
    }

    /// Connected → Closing. Returns false if the transport was already closing or closed.
    fn begin_close(&self) -> bool {
        self.0
            .compare_exchange(
                Connectivity::Connected.to_u8(),
                Connectivity::Closing.to_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

/// Coordinator-side handle to a connection's transport.
#[derive(Debug, Clone)]
pub struct TransportHandle {
    commands: mpsc::UnboundedSender<TransportCommand>,
    status: TransportStatus,
}

/// I/O-task side of a transport: the command stream and the status cell it updates.
#[derive(Debug)]
pub struct TransportEnd {
    pub commands: mpsc::UnboundedReceiver<TransportCommand>,
    pub status: TransportStatus,
}

impl TransportHandle {
    /// Create a connected handle and the matching I/O-task end.
    pub fn channel() -> (Self, TransportEnd) {
        let (tx, rx) = mpsc::unbounded_channel();
        let status = TransportStatus::new();
        (
            Self {
                commands: tx,
                status: status.clone(),
            },
            TransportEnd {
                commands: rx,
                status,
            },
        )
    }

    /// Queue bytes for the peer.
    pub fn write(&self, data: Bytes) -> Result<(), TransportClosed> {
        if !self.is_open() {
            return Err(TransportClosed);
        }
        self.commands
            .send(TransportCommand::Write(data))
            .map_err(|_| TransportClosed)
    }
}

impl Transport for TransportHandle {
    fn is_open(&self) -> bool {
        self.status.get() == Connectivity::Connected
    }

    fn close(&self) {
        if self.status.begin_close() && self.commands.send(TransportCommand::Close).is_err() {
            // I/O task already gone.
            self.status.set(Connectivity::Unconnected);
        }
    }

    fn connectivity(&self) -> Connectivity {
        self.status.get()
    }
}

/// Returned when writing to a connection that is closing or closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("connection is closed")]
pub struct TransportClosed;

/// The connection as seen by application listeners.
#[derive(Debug, Clone)]
pub struct ClientConnection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    transport: TransportHandle,
}

impl ClientConnection {
    pub fn new(id: ConnectionId, peer_addr: SocketAddr, transport: TransportHandle) -> Self {
        Self {
            id,
            peer_addr,
            transport,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Queue a reply. Flushed before the server closes the connection.
    pub fn write(&self, data: impl Into<Bytes>) -> Result<(), TransportClosed> {
        self.transport.write(data.into())
    }

    pub fn close(&self) {
        self.transport.close();
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    pub fn transport(&self) -> &TransportHandle {
        &self.transport
    }
}
