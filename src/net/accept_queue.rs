//! FIFO of accepted sockets waiting to be claimed by the server loop.
//!
//! Accept notifications and claims are decoupled: the accept loop enqueues
//! everything the listener hands over, then drains the queue with
//! `claim_next` until it reports empty.

use std::collections::VecDeque;

#[derive(Debug)]
pub struct AcceptQueue<T> {
    pending: VecDeque<T>,
}

impl<T> AcceptQueue<T> {
    pub fn new() -> Self {
        Self {
            pending: VecDeque::new(),
        }
    }

    /// Append to the tail. Never fails.
    pub fn enqueue(&mut self, socket: T) {
        self.pending.push_back(socket);
    }

    /// Remove and return the head, or `None` when nothing is pending.
    pub fn claim_next(&mut self) -> Option<T> {
        self.pending.pop_front()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl<T> Default for AcceptQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
