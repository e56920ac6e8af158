//! Broadcast of button events to a dynamic set of subscribers.
//!
//! Publishers read an `ArcSwap` snapshot of the subscriber list and never take
//! a lock. Subscribe, unsubscribe and close serialise on a mutex and replace
//! the snapshot wholesale. Each subscriber owns an unbounded queue, so a slow
//! consumer never holds up the publisher or other subscribers.

use crate::error::{DeviceError, Result};
use crate::event::Event;
use arc_swap::ArcSwap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::mpsc;
use tracing::debug;

/// Identifies one live subscription inside a [`FanoutRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Clone)]
struct Slot {
    id: SubscriptionId,
    tx: mpsc::UnboundedSender<Event>,
}

#[derive(Default)]
struct Bookkeeping {
    next_id: u64,
    closed: bool,
}

/// Live set of event subscribers.
pub struct FanoutRegistry {
    slots: ArcSwap<Vec<Slot>>,
    writer: Mutex<Bookkeeping>,
}

impl FanoutRegistry {
    pub fn new() -> Self {
        Self {
            slots: ArcSwap::from_pointee(Vec::new()),
            writer: Mutex::new(Bookkeeping::default()),
        }
    }

    /// Register a new subscriber with an empty queue.
    ///
    /// # Errors
    /// Returns `DeviceError::Unavailable` once the registry has been closed.
    pub fn subscribe(self: &Arc<Self>) -> Result<Subscription> {
        let mut book = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if book.closed {
            return Err(DeviceError::Unavailable(
                "event stream is shutting down".into(),
            ));
        }

        let id = SubscriptionId(book.next_id);
        book.next_id += 1;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut next = Vec::clone(&self.slots.load());
        next.push(Slot { id, tx });
        self.slots.store(Arc::new(next));
        debug!("subscriber {} registered", id.0);

        Ok(Subscription {
            id,
            rx,
            registry: Arc::downgrade(self),
            active: true,
        })
    }

    /// Queue `event` for every current subscriber. Returns how many were reached.
    pub fn publish(&self, event: Event) -> usize {
        let slots = self.slots.load();
        slots
            .iter()
            .filter(|slot| slot.tx.send(event).is_ok())
            .count()
    }

    /// Remove a subscriber. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let _book = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.slots.load();
        if !current.iter().any(|slot| slot.id == id) {
            return false;
        }

        let next: Vec<Slot> = current
            .iter()
            .filter(|slot| slot.id != id)
            .cloned()
            .collect();
        self.slots.store(Arc::new(next));
        debug!("subscriber {} removed", id.0);
        true
    }

    /// Drop every subscriber and refuse new ones.
    ///
    /// Subscribers see the end of their queue once they drain it.
    pub fn close(&self) {
        let mut book = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        book.closed = true;
        self.slots.store(Arc::new(Vec::new()));
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .closed
    }

    pub fn subscriber_count(&self) -> usize {
        self.slots.load().len()
    }
}

impl Default for FanoutRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving end of one subscriber's queue.
///
/// Dropping the subscription removes it from the registry.
pub struct Subscription {
    id: SubscriptionId,
    rx: mpsc::UnboundedReceiver<Event>,
    registry: Weak<FanoutRegistry>,
    active: bool,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next event. `None` once unsubscribed or the registry closed.
    ///
    /// Cancel safe.
    pub async fn recv(&mut self) -> Option<Event> {
        if !self.active {
            return None;
        }
        self.rx.recv().await
    }

    /// Take the next queued event without waiting.
    #[cfg(test)]
    pub fn try_recv(&mut self) -> Option<Event> {
        if !self.active {
            return None;
        }
        self.rx.try_recv().ok()
    }

    /// Leave the registry and discard anything still queued. Idempotent.
    pub fn unsubscribe(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;

        if let Some(registry) = self.registry.upgrade() {
            registry.unsubscribe(self.id);
        }
        // A publisher holding an older snapshot may still send; closing makes
        // those sends fail and the drain drops anything that slipped in.
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
