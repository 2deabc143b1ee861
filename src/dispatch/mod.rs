//! Frame dispatch subsystem.
//!
//! # Data Flow
//! ```text
//! ConnectionEvent (from connection tasks)
//!     → coordinator.rs (single consumer, event order preserved)
//!     → registry.rs (lazy per-connection state)
//!     → dispatcher.rs (feed, deliver complete frames, teardown check)
//!     → listener.rs (ordered fan-out to the application)
//! ```

pub mod coordinator;
pub mod dispatcher;
pub mod listener;
pub mod registry;

pub use coordinator::{Coordinator, SourceFactory};
pub use dispatcher::{evaluate_teardown, DispatchOutcome, Dispatcher};
pub use listener::{CallbackError, ClientEventListener, ListenerSet};
pub use registry::{ConnectionRegistry, ConnectionState};
