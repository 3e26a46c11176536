//! Subscriber broadcast list of a user service record.
//!
//! Each [`UserServiceRecord`](super::UserServiceRecord) owns one
//! [`CallbackList`]. The list has its own lock, independent of the broker's
//! coarse lock, so subscribers can be added while the record is being torn
//! down and a slow subscriber never stalls registry mutation.
//!
//! # Broadcast
//!
//! ```text
//! broadcast(f) = deliver_to(snapshot(), f)
//!   │ snapshot subscribers under the list lock
//!   ▼
//!   for each: f(subscriber)   (no lock held)
//!     ├─ Ok            → next
//!     ├─ DeadObject    → log, prune, next
//!     └─ other error   → log, next
//! ```

use aegis_types::{Handle, HandleId, TransportError};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Client endpoint subscribed to a user service.
pub trait ServiceConnection: Send + Sync + fmt::Debug {
    /// Transport identity of the endpoint.
    fn id(&self) -> HandleId;

    /// The service is up; `service` is its handle.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the subscriber cannot be reached.
    fn connected(&self, service: &Handle) -> Result<(), TransportError>;

    /// The broker dropped the service.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the subscriber cannot be reached.
    fn died(&self) -> Result<(), TransportError>;
}

#[derive(Default)]
struct ListState {
    subscribers: Vec<Arc<dyn ServiceConnection>>,
    killed: bool,
}

/// Thread-safe set of subscribers, de-duplicated by [`HandleId`].
#[derive(Default)]
pub struct CallbackList {
    state: Mutex<ListState>,
}

impl fmt::Debug for CallbackList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CallbackList")
            .field("subscribers", &state.subscribers.len())
            .field("killed", &state.killed)
            .finish()
    }
}

impl CallbackList {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a subscriber.
    ///
    /// Returns `false` if the list was killed. Registering the same
    /// endpoint twice replaces the earlier entry.
    pub fn register(&self, subscriber: Arc<dyn ServiceConnection>) -> bool {
        let mut state = self.state.lock();
        if state.killed {
            return false;
        }
        let id = subscriber.id();
        state.subscribers.retain(|s| s.id() != id);
        state.subscribers.push(subscriber);
        true
    }

    /// Removes a subscriber. Returns `true` if it was registered.
    pub fn unregister(&self, id: HandleId) -> bool {
        let mut state = self.state.lock();
        let before = state.subscribers.len();
        state.subscribers.retain(|s| s.id() != id);
        state.subscribers.len() != before
    }

    /// Current subscribers.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<dyn ServiceConnection>> {
        self.state.lock().subscribers.clone()
    }

    /// Calls `deliver` on every subscriber, isolating failures.
    ///
    /// Returns the number of successful deliveries.
    pub fn broadcast<F>(&self, event: &str, deliver: F) -> usize
    where
        F: Fn(&dyn ServiceConnection) -> Result<(), TransportError>,
    {
        self.deliver_to(&self.snapshot(), event, deliver)
    }

    /// Calls `deliver` on each of `subscribers`, taken earlier with
    /// [`snapshot`](Self::snapshot). Dead subscribers are pruned from the
    /// list.
    pub fn deliver_to<F>(&self, subscribers: &[Arc<dyn ServiceConnection>], event: &str, deliver: F) -> usize
    where
        F: Fn(&dyn ServiceConnection) -> Result<(), TransportError>,
    {
        let mut delivered = 0;
        for subscriber in subscribers {
            match deliver(subscriber.as_ref()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(subscriber = %subscriber.id(), event, "failed to notify subscriber: {e}");
                    if e.is_dead_object() {
                        self.unregister(subscriber.id());
                    }
                }
            }
        }
        delivered
    }

    /// Drops every subscriber and refuses new ones.
    pub fn kill(&self) {
        let mut state = self.state.lock();
        state.subscribers.clear();
        state.killed = true;
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    /// Returns `true` if there are no subscribers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` once [`kill`](Self::kill) has run.
    #[must_use]
    pub fn is_killed(&self) -> bool {
        self.state.lock().killed
    }
}
