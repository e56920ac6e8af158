use super::{ButtonEventSource, ButtonListener, ListenerId};
use crate::protocol::ButtonPosition;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Ready-made [`ButtonEventSource`] for device front ends.
///
/// Front ends call [`button_down`](Self::button_down) and friends from their
/// input thread; the hub forwards to every registered listener. Listeners are
/// invoked outside the lock, so a listener may add or remove listeners.
#[derive(Default)]
pub struct ButtonEventHub {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<u64, Arc<dyn ButtonListener>>>,
}

impl ButtonEventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listener_count(&self) -> usize {
        self.lock().len()
    }

    pub fn button_down(&self, button: ButtonPosition) {
        debug!("button {button} down");
        for listener in self.snapshot() {
            listener.on_button_down(button);
        }
    }

    pub fn button_up(&self, button: ButtonPosition) {
        debug!("button {button} up");
        for listener in self.snapshot() {
            listener.on_button_up(button);
        }
    }

    pub fn button_click(&self, button: ButtonPosition) {
        debug!("button {button} click");
        for listener in self.snapshot() {
            listener.on_button_click(button);
        }
    }

    fn snapshot(&self) -> Vec<Arc<dyn ButtonListener>> {
        self.lock().values().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Arc<dyn ButtonListener>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ButtonEventSource for ButtonEventHub {
    fn add_listener(&self, listener: Arc<dyn ButtonListener>) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(id, listener);
        ListenerId(id)
    }

    fn remove_listener(&self, id: ListenerId) {
        self.lock().remove(&id.0);
    }
}
