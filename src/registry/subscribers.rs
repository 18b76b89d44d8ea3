//! Listener lists and unsubscribe handles.
//!
//! [`SubscriberList`] stores callbacks in registration order. Emission
//! copies the list first and calls each callback with no lock held, so a
//! callback may register, unsubscribe, or tear the connection down without
//! corrupting the iteration that invoked it.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::domain::SubscriptionId;

/// Shared listener callback.
pub type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Ordered list of listeners for events of type `E`.
pub struct SubscriberList<E> {
    entries: Mutex<Vec<(SubscriptionId, Callback<E>)>>,
}

impl<E: 'static> fmt::Debug for SubscriberList<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberList")
            .field("len", &self.len())
            .finish()
    }
}

impl<E> Default for SubscriberList<E> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }
}

impl<E: 'static> SubscriberList<E> {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a listener and returns its id.
    pub fn insert(&self, callback: Callback<E>) -> SubscriptionId {
        let id = SubscriptionId::generate();
        self.entries.lock().push((id, callback));
        id
    }

    /// Removes the listener with `id`. Returns `false` if it was not
    /// registered.
    pub fn remove(&self, id: SubscriptionId) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        let removed = entries.len() != before;
        if removed {
            tracing::trace!(subscription = %id, "listener removed");
        }
        removed
    }

    /// Calls every listener registered at the time of the call, in
    /// registration order. Returns the number of listeners called.
    pub fn emit(&self, event: &E) -> usize {
        let listeners: Vec<Callback<E>> = self
            .entries
            .lock()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for listener in &listeners {
            listener(event);
        }
        listeners.len()
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` if no listener is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Handle returned by every registration.
///
/// [`Subscription::unsubscribe`] removes exactly the callback it was
/// created for and is safe to call any number of times. Dropping the
/// handle leaves the callback registered.
#[must_use = "keep the Subscription to be able to unsubscribe later"]
pub struct Subscription {
    id: SubscriptionId,
    remover: Mutex<Option<Box<dyn FnOnce(SubscriptionId) + Send>>>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

impl Subscription {
    /// Creates a handle that removes `id` from `list` on unsubscribe.
    /// Holds only a weak reference, so it never keeps the list alive.
    pub fn new<E: Send + 'static>(list: &Arc<SubscriberList<E>>, id: SubscriptionId) -> Self {
        let weak: Weak<SubscriberList<E>> = Arc::downgrade(list);
        Self {
            id,
            remover: Mutex::new(Some(Box::new(move |id| {
                if let Some(list) = weak.upgrade() {
                    list.remove(id);
                }
            }))),
        }
    }

    /// Identifier of the registered callback.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Returns `true` until the first call to [`Self::unsubscribe`].
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.remover.lock().is_some()
    }

    /// Removes the callback. Later calls do nothing.
    pub fn unsubscribe(&self) {
        let remover = self.remover.lock().take();
        if let Some(remover) = remover {
            remover(self.id);
        }
    }
}
