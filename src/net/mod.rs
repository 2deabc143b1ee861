//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept, connection limits)
//!     → accept_queue.rs (pending until claimed)
//!     → tls.rs (optional TLS handshake)
//!     → connection.rs (I/O task, events to the coordinator)
//!     → transport.rs (write/close commands back to the I/O task)
//!
//! Connectivity:
//!     Connected → Closing → Unconnected
//! ```
//!
//! # Design Decisions
//! - Each connection tracked for graceful shutdown
//! - TLS is optional and invisible to frame dispatch

pub mod accept_queue;
pub mod connection;
pub mod listener;
pub mod tls;
pub mod transport;

pub use accept_queue::AcceptQueue;
pub use connection::{ConnectionEvent, ConnectionId, ConnectionTracker};
pub use listener::{Listener, ListenerError};
pub use tls::{TlsError, TlsHandshakeManager};
pub use transport::{ClientConnection, Connectivity, Transport, TransportHandle};
