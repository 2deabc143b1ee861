//! Single owner of connection state; processes connection events in order.
//!
//! # Responsibilities
//! - Remember each connection's transport from `Connected` until `Disconnected`
//! - Route `Readable` events through the dispatcher
//! - Run the teardown check after each dispatch pass
//! - Log handshake and socket errors without changing control flow
//!
//! # Design Decisions
//! - One task, one event at a time: no locks around the registry
//! - Connection state is created on the first `Readable`, not on `Connected`
//! - A registry entry never outlives the transport entry backing it

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::frame::FrameSource;
use crate::net::{ClientConnection, ConnectionEvent, ConnectionId, Transport};
use crate::observability::metrics;

use super::dispatcher::{evaluate_teardown, DispatchOutcome, Dispatcher};
use super::listener::ListenerSet;
use super::registry::{ConnectionRegistry, ConnectionState};

/// Builds a fresh frame source for a new connection.
pub type SourceFactory<S> = Arc<dyn Fn() -> S + Send + Sync>;

pub struct Coordinator<S: FrameSource> {
    registry: ConnectionRegistry<ConnectionState<S>>,
    clients: HashMap<ConnectionId, ClientConnection>,
    dispatcher: Dispatcher<S::Frame>,
    new_source: SourceFactory<S>,
}

impl<S: FrameSource> Coordinator<S> {
    pub fn new(listeners: ListenerSet<S::Frame>, new_source: SourceFactory<S>) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            clients: HashMap::new(),
            dispatcher: Dispatcher::new(listeners),
            new_source,
        }
    }

    /// Process events until every sender is dropped.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<ConnectionEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(event);
        }
        tracing::debug!(
            remaining_states = self.registry.len(),
            "Coordinator stopped"
        );
    }

    pub fn handle(&mut self, event: ConnectionEvent) {
        tracing::trace!(connection_id = %event.id(), "Connection event");
        match event {
            ConnectionEvent::Connected { client } => {
                tracing::debug!(
                    connection_id = %client.id(),
                    peer_addr = %client.peer_addr(),
                    "Connection ready"
                );
                self.clients.insert(client.id(), client);
            }
            ConnectionEvent::Readable { id, data } => self.on_readable(id, &data),
            ConnectionEvent::ReadClosed { id } => {
                tracing::debug!(connection_id = %id, "Peer closed, tearing down");
                self.teardown(id);
            }
            ConnectionEvent::Error { id, error } => {
                tracing::warn!(connection_id = %id, error = %error, "Socket error");
            }
            ConnectionEvent::HandshakeEstablished { id } => {
                metrics::record_tls_handshake(true);
                tracing::debug!(connection_id = %id, "Encrypted session established");
            }
            ConnectionEvent::HandshakeFailed { id, error } => {
                metrics::record_tls_handshake(false);
                tracing::warn!(connection_id = %id, error = %error, "TLS handshake failed");
            }
            ConnectionEvent::Disconnected { id } => self.release(id),
        }
    }

    fn on_readable(&mut self, id: ConnectionId, chunk: &[u8]) {
        let Some(client) = self.clients.get(&id) else {
            tracing::warn!(connection_id = %id, "Data for unknown connection dropped");
            return;
        };
        // Teardown closed the read side; chunks already queued are discarded.
        if !client.is_open() {
            tracing::trace!(
                connection_id = %id,
                bytes = chunk.len(),
                "Data after teardown dropped"
            );
            return;
        }

        let new_source = &self.new_source;
        let state = self
            .registry
            .state_for(id, || ConnectionState::new(new_source(), client.clone()));

        match self.dispatcher.dispatch(state, chunk) {
            Ok(outcome) if outcome.requires_teardown() => self.teardown(id),
            Ok(DispatchOutcome::Pending { in_progress }) => {
                tracing::trace!(connection_id = %id, in_progress, "Awaiting more data");
            }
            Ok(_) => {}
            Err(error) => {
                metrics::record_malformed_stream();
                tracing::warn!(
                    connection_id = %id,
                    error = %error,
                    "Undecodable stream, closing connection"
                );
                self.teardown(id);
            }
        }
    }

    /// Close the transport and release state if it already reports unconnected.
    fn teardown(&mut self, id: ConnectionId) {
        let Some(client) = self.clients.get(&id) else {
            return;
        };
        if evaluate_teardown(client.transport()) {
            self.release(id);
        } else {
            tracing::trace!(
                connection_id = %id,
                connectivity = ?client.transport().connectivity(),
                "Transport still closing"
            );
        }
    }

    fn release(&mut self, id: ConnectionId) {
        let had_state = self.registry.remove(id).is_some();
        if self.clients.remove(&id).is_some() {
            tracing::debug!(connection_id = %id, had_state, "Connection released");
        }
    }

    /// Number of connections holding decoder state.
    pub fn state_count(&self) -> usize {
        self.registry.len()
    }

    pub fn has_state(&self, id: ConnectionId) -> bool {
        self.registry.contains(id)
    }

    /// Number of connections with a live transport.
    pub fn connection_count(&self) -> usize {
        self.clients.len()
    }
}
