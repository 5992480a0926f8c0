//! Front-reinsertable queue of pending work orders.

use parking_lot::Mutex;
use std::collections::VecDeque;

use crate::protocol::Transmission;

pub struct WorkQueue {
    entries: Mutex<VecDeque<Transmission>>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Appends an order to the tail.
    pub fn offer(&self, transmission: Transmission) {
        self.entries.lock().push_back(transmission);
    }

    /// Pushes an order to the head (re-delivery path).
    pub fn offer_first(&self, transmission: Transmission) {
        self.entries.lock().push_front(transmission);
    }

    pub fn pop_first(&self) -> Option<Transmission> {
        self.entries.lock().pop_front()
    }

    /// Restores buffered skip-overs to the head, preserving their original
    /// relative order.
    pub fn restore_first(&self, buffered: Vec<Transmission>) {
        let mut entries = self.entries.lock();
        for transmission in buffered.into_iter().rev() {
            entries.push_front(transmission);
        }
    }

    pub fn queued_for_source(&self, source_id: i64) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|t| t.source_id() == Some(source_id))
            .count()
    }

    /// Removes and returns every queued order for a source (run
    /// cancellation).
    pub fn drain_for_source(&self, source_id: i64) -> Vec<Transmission> {
        let mut entries = self.entries.lock();
        let mut drained = Vec::new();
        let mut kept = VecDeque::with_capacity(entries.len());
        for transmission in entries.drain(..) {
            if transmission.source_id() == Some(source_id) {
                drained.push(transmission);
            } else {
                kept.push_back(transmission);
            }
        }
        *entries = kept;
        drained
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Head-to-tail snapshot for the console.
    pub fn snapshot(&self) -> Vec<Transmission> {
        self.entries.lock().iter().cloned().collect()
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}
