//! Listener bookkeeping for a single channel.

use crate::error::ConnectorError;
use crate::message::{AckResult, ChannelMessage};
use std::collections::HashMap;
use std::sync::Arc;

/// Callback for a single event on a channel.
pub type EventCallback = Arc<dyn Fn(&ChannelMessage) + Send + Sync>;

/// Callback for every event on a channel. Receives the display event name.
pub type GlobalCallback = Arc<dyn Fn(&str, &ChannelMessage) + Send + Sync>;

/// Callback for a successful group join.
pub type SubscribedCallback = Arc<dyn Fn(&AckResult) + Send + Sync>;

/// Callback for a failed group join.
pub type ErrorCallback = Arc<dyn Fn(&ConnectorError) + Send + Sync>;

/// Callback identity ignores vtables, only the allocation counts.
pub(crate) fn same_callback<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Per-event and global listeners of a channel.
///
/// The per-event map doubles as the dispatch table: an entry exists exactly
/// while at least one callback is registered for that event name.
#[derive(Default)]
pub struct ListenerTable {
    listeners: HashMap<String, Vec<EventCallback>>,
    global: Vec<GlobalCallback>,
}

impl ListenerTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a callback for an event name.
    pub fn bind(&mut self, event: &str, callback: EventCallback) {
        self.listeners
            .entry(event.to_string())
            .or_default()
            .push(callback);
    }

    /// Remove one callback, or every callback when `callback` is `None`.
    ///
    /// Returns true if the event's dispatch entry was removed.
    pub fn unbind(&mut self, event: &str, callback: Option<&EventCallback>) -> bool {
        let Some(callbacks) = self.listeners.get_mut(event) else {
            return false;
        };

        if let Some(callback) = callback {
            callbacks.retain(|cb| !same_callback(cb, callback));
            if !callbacks.is_empty() {
                return false;
            }
        }

        self.listeners.remove(event);
        true
    }

    /// Drop every per-event binding.
    pub fn unbind_all_events(&mut self) {
        self.listeners.clear();
    }

    /// Append a global callback.
    pub fn bind_global(&mut self, callback: GlobalCallback) {
        self.global.push(callback);
    }

    /// Remove one global callback, or all of them when `callback` is `None`.
    pub fn unbind_global(&mut self, callback: Option<&GlobalCallback>) {
        match callback {
            Some(callback) => self.global.retain(|cb| !same_callback(cb, callback)),
            None => self.global.clear(),
        }
    }

    /// Whether a dispatch entry exists for the event name.
    pub fn is_bound(&self, event: &str) -> bool {
        self.listeners.contains_key(event)
    }

    /// Number of callbacks bound to the event name.
    pub fn count(&self, event: &str) -> usize {
        self.listeners.get(event).map_or(0, Vec::len)
    }

    /// Number of global callbacks.
    pub fn global_count(&self) -> usize {
        self.global.len()
    }

    /// Snapshot of the callbacks for an event, in registration order.
    pub fn snapshot(&self, event: &str) -> Vec<EventCallback> {
        self.listeners.get(event).cloned().unwrap_or_default()
    }

    /// Snapshot of the global callbacks, in registration order.
    pub fn global_snapshot(&self) -> Vec<GlobalCallback> {
        self.global.clone()
    }
}

impl std::fmt::Debug for ListenerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: HashMap<&str, usize> = self
            .listeners
            .iter()
            .map(|(event, callbacks)| (event.as_str(), callbacks.len()))
            .collect();
        f.debug_struct("ListenerTable")
            .field("listeners", &counts)
            .field("global", &self.global.len())
            .finish()
    }
}
