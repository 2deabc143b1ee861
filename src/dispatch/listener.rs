//! Application listeners and ordered fan-out.
//!
//! # Responsibilities
//! - Keep registered listeners in registration order
//! - Notify every listener of each delivered request or response frame
//! - Isolate listeners from each other's failures
//!
//! # Design Decisions
//! - Append-only for the server's lifetime
//! - Calls are synchronous on the coordinator task
//! - An `Err` or a panic is logged and counted; the next listener still runs

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::frame::FrameKind;
use crate::net::ClientConnection;
use crate::observability::metrics;

/// Failure reported by a listener callback.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct CallbackError(String);

impl CallbackError {
    pub fn new(message: impl std::fmt::Display) -> Self {
        Self(message.to_string())
    }
}

/// Receives completed frames.
///
/// Both callbacks default to doing nothing, so a listener only implements the
/// direction it cares about.
pub trait ClientEventListener<F>: Send + Sync {
    fn on_request_received(
        &self,
        client: &ClientConnection,
        frame: &F,
    ) -> Result<(), CallbackError> {
        let _ = (client, frame);
        Ok(())
    }

    fn on_response_received(
        &self,
        client: &ClientConnection,
        frame: &F,
    ) -> Result<(), CallbackError> {
        let _ = (client, frame);
        Ok(())
    }
}

/// Ordered set of listeners.
pub struct ListenerSet<F> {
    listeners: Vec<Arc<dyn ClientEventListener<F>>>,
}

impl<F> ListenerSet<F> {
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    /// Append a listener. Notification order follows registration order.
    pub fn register(&mut self, listener: Arc<dyn ClientEventListener<F>>) {
        self.listeners.push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Notify every listener of a request frame. Returns the number of listeners that failed.
    pub fn notify_request(&self, client: &ClientConnection, frame: &F) -> usize {
        self.notify(FrameKind::Request, client, frame)
    }

    /// Notify every listener of a response frame. Returns the number of listeners that failed.
    pub fn notify_response(&self, client: &ClientConnection, frame: &F) -> usize {
        self.notify(FrameKind::Response, client, frame)
    }

    fn notify(&self, kind: FrameKind, client: &ClientConnection, frame: &F) -> usize {
        let mut failures = 0;

        for (index, listener) in self.listeners.iter().enumerate() {
            let outcome = catch_unwind(AssertUnwindSafe(|| match kind {
                FrameKind::Request => listener.on_request_received(client, frame),
                FrameKind::Response => listener.on_response_received(client, frame),
            }));

            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    failures += 1;
                    metrics::record_listener_failure(kind);
                    tracing::warn!(
                        connection_id = %client.id(),
                        listener = index,
                        kind = %kind,
                        error = %error,
                        "Listener returned an error"
                    );
                }
                Err(_) => {
                    failures += 1;
                    metrics::record_listener_failure(kind);
                    tracing::error!(
                        connection_id = %client.id(),
                        listener = index,
                        kind = %kind,
                        "Listener panicked"
                    );
                }
            }
        }

        failures
    }
}

impl<F> Default for ListenerSet<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F> Clone for ListenerSet<F> {
    fn clone(&self) -> Self {
        Self {
            listeners: self.listeners.clone(),
        }
    }
}

impl<F> std::fmt::Debug for ListenerSet<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerSet")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{ConnectionId, TransportHandle};
    use std::sync::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    struct Named {
        name: &'static str,
        log: Log,
    }

    impl ClientEventListener<&'static str> for Named {
        fn on_request_received(
            &self,
            _: &ClientConnection,
            frame: &&'static str,
        ) -> Result<(), CallbackError> {
            self.log.lock().unwrap().push(format!("{}:request:{}", self.name, frame));
            Ok(())
        }

        fn on_response_received(
            &self,
            _: &ClientConnection,
            frame: &&'static str,
        ) -> Result<(), CallbackError> {
            self.log.lock().unwrap().push(format!("{}:response:{}", self.name, frame));
            Ok(())
        }
    }

    struct Failing;

    impl ClientEventListener<&'static str> for Failing {
        fn on_request_received(
            &self,
            _: &ClientConnection,
            _: &&'static str,
        ) -> Result<(), CallbackError> {
            Err(CallbackError::new("rejected"))
        }
    }

    struct Panicking;

    impl ClientEventListener<&'static str> for Panicking {
        fn on_request_received(
            &self,
            _: &ClientConnection,
            _: &&'static str,
        ) -> Result<(), CallbackError> {
            panic!("listener bug");
        }
    }

    fn client() -> ClientConnection {
        let (handle, _end) = TransportHandle::channel();
        ClientConnection::new(ConnectionId::new(), "127.0.0.1:9".parse().unwrap(), handle)
    }

    #[test]
    fn notifies_in_registration_order() {
        let log: Log = Arc::default();
        let mut set: ListenerSet<&'static str> = ListenerSet::new();
        set.register(Arc::new(Named { name: "first", log: log.clone() }));
        set.register(Arc::new(Named { name: "second", log: log.clone() }));

        let client = client();
        assert_eq!(set.notify_request(&client, &"GET"), 0);
        assert_eq!(set.notify_response(&client, &"200"), 0);

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "first:request:GET",
                "second:request:GET",
                "first:response:200",
                "second:response:200",
            ]
        );
    }

    #[test]
    fn failing_listeners_do_not_stop_the_rest() {
        let log: Log = Arc::default();
        let mut set: ListenerSet<&'static str> = ListenerSet::new();
        set.register(Arc::new(Failing));
        set.register(Arc::new(Panicking));
        set.register(Arc::new(Named { name: "last", log: log.clone() }));
        assert_eq!(set.len(), 3);

        let failures = set.notify_request(&client(), &"GET");

        assert_eq!(failures, 2);
        assert_eq!(*log.lock().unwrap(), vec!["last:request:GET"]);
    }

    #[test]
    fn default_callbacks_are_no_ops() {
        struct Silent;
        impl ClientEventListener<&'static str> for Silent {}

        let mut set: ListenerSet<&'static str> = ListenerSet::default();
        set.register(Arc::new(Silent));
        assert_eq!(set.notify_response(&client(), &"200"), 0);
    }
}
