//! Socket-level frame server.
//!
//! Accepts TCP connections (optionally upgraded with a server-side TLS
//! handshake), feeds incoming bytes to a per-connection frame decoder and
//! hands every completed frame to the registered listeners exactly once.

pub mod config;
pub mod dispatch;
pub mod frame;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod server;

pub use config::schema::ServerConfig;
pub use dispatch::{CallbackError, ClientEventListener};
pub use frame::{Frame, FrameSource, HttpFrame, HttpFrameSource};
pub use lifecycle::Shutdown;
pub use net::ClientConnection;
pub use server::{FrameServer, ServerError};
