//! Fan-out of values to any number of channel subscribers.

use std::sync::{Arc, Mutex};

use crossbeam_channel::{Receiver, Sender};

/// Subscriber list. Cloning shares the same list.
pub struct Observers<T> {
    senders: Arc<Mutex<Vec<Sender<T>>>>,
}

impl<T> Clone for Observers<T> {
    fn clone(&self) -> Self {
        Self {
            senders: self.senders.clone(),
        }
    }
}

impl<T> Default for Observers<T> {
    fn default() -> Self {
        Self {
            senders: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T: Clone> Observers<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber. Values published before this call are not replayed.
    pub fn subscribe(&self) -> Receiver<T> {
        let (tx, rx) = crossbeam_channel::unbounded();
        if let Ok(mut senders) = self.senders.lock() {
            senders.push(tx);
        }
        rx
    }

    /// Send `value` to every live subscriber, dropping the ones whose receiver is gone.
    pub fn publish(&self, value: T) {
        if let Ok(mut senders) = self.senders.lock() {
            senders.retain(|tx| tx.send(value.clone()).is_ok());
        }
    }

    /// Number of registered subscribers (including ones not yet pruned).
    pub fn len(&self) -> usize {
        self.senders.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
