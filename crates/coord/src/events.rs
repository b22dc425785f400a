// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed lifecycle event fan-out
//!
//! Each primitive owns an [`EventHub`] for its own event enum. Subscribers get
//! an unbounded receiver; closed receivers are pruned on the next publish.

use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Receiver for lifecycle events
pub type EventReceiver<E> = mpsc::UnboundedReceiver<E>;

/// An event with a stable, externally visible name
pub trait NamedEvent: Clone + Send + 'static {
    fn name(&self) -> &'static str;
}

/// Routes events from a primitive to all of its subscribers
pub struct EventHub<E> {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<E>>>>,
}

impl<E: NamedEvent> EventHub<E> {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Subscribe to every event published after this call
    pub fn subscribe(&self) -> EventReceiver<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }

    /// Publish an event to all live subscribers
    pub fn publish(&self, event: E) {
        tracing::trace!(event = event.name(), "publish");
        let mut subs = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subs.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Get count of live subscribers
    pub fn subscriber_count(&self) -> usize {
        let mut subs = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subs.retain(|tx| !tx.is_closed());
        subs.len()
    }
}

impl<E: NamedEvent> Default for EventHub<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for EventHub<E> {
    fn clone(&self) -> Self {
        Self {
            subscribers: Arc::clone(&self.subscribers),
        }
    }
}

impl<E> std::fmt::Debug for EventHub<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len();
        f.debug_struct("EventHub")
            .field("subscribers", &count)
            .finish()
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
