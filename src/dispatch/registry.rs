//! Per-connection state and the registry that owns it.
//!
//! # Responsibilities
//! - Create a connection's state lazily on its first data event
//! - Return the same state for every later lookup until removal
//! - Forget the state when the connection is gone
//!
//! # Design Decisions
//! - Owned by the coordinator; no other task touches it, so no locking
//! - Removal is final: a reconnect arrives with a new `ConnectionId`

use std::collections::HashMap;

use crate::frame::FrameSource;
use crate::net::{ClientConnection, ConnectionId};

/// Decoder plus the application-facing connection wrapper.
#[derive(Debug)]
pub struct ConnectionState<S> {
    source: S,
    client: ClientConnection,
}

impl<S: FrameSource> ConnectionState<S> {
    pub fn new(source: S, client: ClientConnection) -> Self {
        Self { source, client }
    }

    pub fn client(&self) -> &ClientConnection {
        &self.client
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Frames decoded but not yet delivered, in arrival order.
    pub fn frames(&self) -> &[S::Frame] {
        self.source.frames()
    }

    pub(crate) fn parts_mut(&mut self) -> (&mut S, &ClientConnection) {
        (&mut self.source, &self.client)
    }
}

/// Map from live connection handle to its state.
#[derive(Debug)]
pub struct ConnectionRegistry<T> {
    states: HashMap<ConnectionId, T>,
}

impl<T> ConnectionRegistry<T> {
    pub fn new() -> Self {
        Self {
            states: HashMap::new(),
        }
    }

    /// Existing state for `id`, or a new one built by `init`.
    pub fn state_for(&mut self, id: ConnectionId, init: impl FnOnce() -> T) -> &mut T {
        self.states.entry(id).or_insert_with(|| {
            tracing::trace!(connection_id = %id, "Creating connection state");
            init()
        })
    }

    pub fn get(&self, id: ConnectionId) -> Option<&T> {
        self.states.get(&id)
    }

    /// Drop the state for `id`. Returns it if one existed.
    pub fn remove(&mut self, id: ConnectionId) -> Option<T> {
        self.states.remove(&id)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.states.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

impl<T> Default for ConnectionRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
