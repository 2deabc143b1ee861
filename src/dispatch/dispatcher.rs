//! Decode-and-deliver pass for one readable-data event.
//!
//! # Algorithm
//! ```text
//! chunk empty?                      → NoData
//! feed chunk to the frame source
//! no complete frame in sequence?    → Pending (no delivery, no teardown)
//! forward pass over the sequence:
//!     incomplete → keep, try again on a later event
//!     complete   → classify, notify listeners in order, remove
//!                                   → Dispatched (caller runs one teardown check)
//! ```
//!
//! # Design Decisions
//! - Delivery follows sequence position, oldest first
//! - An older complete frame is delivered even when a newer one is still incomplete
//! - Removal from the sequence is the delivered mark: nothing is delivered twice

use crate::frame::{Frame, FrameError, FrameKind, FrameSource};
use crate::net::{Connectivity, Transport};
use crate::observability::metrics;

use super::listener::ListenerSet;
use super::registry::ConnectionState;

/// Result of one dispatch pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Zero-byte read; nothing happened.
    NoData,
    /// No frame is complete yet; waiting for more bytes.
    Pending { in_progress: usize },
    /// At least one frame was delivered.
    Dispatched { delivered: usize, remaining: usize },
}

impl DispatchOutcome {
    /// Whether the caller must evaluate teardown after this pass.
    pub fn requires_teardown(&self) -> bool {
        matches!(self, DispatchOutcome::Dispatched { .. })
    }
}

/// Delivers completed frames to the listener set.
#[derive(Debug)]
pub struct Dispatcher<F> {
    listeners: ListenerSet<F>,
}

impl<F: Frame> Dispatcher<F> {
    pub fn new(listeners: ListenerSet<F>) -> Self {
        Self { listeners }
    }

    pub fn listeners(&self) -> &ListenerSet<F> {
        &self.listeners
    }

    /// Run one pass for `chunk` against `state`.
    ///
    /// A `FrameError` means the byte stream can no longer be decoded; the
    /// caller closes the connection.
    pub fn dispatch<S>(
        &self,
        state: &mut ConnectionState<S>,
        chunk: &[u8],
    ) -> Result<DispatchOutcome, FrameError>
    where
        S: FrameSource<Frame = F>,
    {
        if chunk.is_empty() {
            return Ok(DispatchOutcome::NoData);
        }

        let (source, client) = state.parts_mut();
        source.feed(chunk)?;

        if !source.frames().iter().any(Frame::is_complete) {
            tracing::trace!(
                connection_id = %client.id(),
                in_progress = source.frames().len(),
                "No complete frame yet"
            );
            return Ok(DispatchOutcome::Pending {
                in_progress: source.frames().len(),
            });
        }

        let mut delivered = 0;
        source.frames_mut().retain(|frame| {
            if !frame.is_complete() {
                tracing::trace!(connection_id = %client.id(), "Frame not ready");
                return true;
            }

            let kind = frame.kind();
            match kind {
                FrameKind::Request => self.listeners.notify_request(client, frame),
                FrameKind::Response => self.listeners.notify_response(client, frame),
            };
            metrics::record_frame_delivered(kind);
            delivered += 1;
            false
        });

        let remaining = source.frames().len();
        tracing::debug!(
            connection_id = %client.id(),
            delivered,
            remaining,
            "Frames dispatched"
        );

        Ok(DispatchOutcome::Dispatched { delivered, remaining })
    }
}

/// Close the transport if still open, then report whether it is fully unconnected
/// and its connection state may be released.
pub fn evaluate_teardown<T: Transport + ?Sized>(transport: &T) -> bool {
    if transport.is_open() {
        transport.close();
    }
    transport.connectivity() == Connectivity::Unconnected
}
