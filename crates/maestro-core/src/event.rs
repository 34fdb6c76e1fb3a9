//! Change and destroy notification for controls.
//!
//! A [`Signal`] is a subscriber list: callers connect a callback and get back
//! a [`Subscription`] that disconnects on drop. Master records store their
//! subscriptions inline, so detaching a master (for any reason) silently
//! stops delivery of that master's events.
//!
//! Emission snapshots the callback list before invoking anything, so a
//! handler may connect, disconnect, or mutate control topology without
//! deadlocking against the list lock. The snapshot allocates, which keeps
//! `emit` off the per-sample path; block-rate emission from the audio thread
//! (one edge per aggregation pass) is accepted, matching the original
//! engine's behavior.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct SubEntry<T> {
    id: u64,
    callback: Callback<T>,
}

struct SignalInner<T> {
    subscribers: Mutex<Vec<SubEntry<T>>>,
    next_id: AtomicU64,
}

/// A subscribable event carrying payloads of type `T`.
pub struct Signal<T> {
    inner: Arc<SignalInner<T>>,
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Signal<T> {
    /// Create a signal with no subscribers.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SignalInner {
                subscribers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Connect a callback. Delivery stops when the returned handle drops.
    pub fn connect(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> Subscription
    where
        T: 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.subscribers.lock().push(SubEntry {
            id,
            callback: Arc::new(callback),
        });

        let weak: Weak<SignalInner<T>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.subscribers.lock().retain(|entry| entry.id != id);
            }
        })
    }

    /// Invoke every connected callback with `payload`.
    pub fn emit(&self, payload: &T) {
        // Snapshot under the lock, call outside it. A callback that drops a
        // Subscription (detaching a master detaches its record, and with it
        // its subscriptions) would otherwise re-enter the list lock.
        let snapshot: Vec<Callback<T>> = self
            .inner
            .subscribers
            .lock()
            .iter()
            .map(|entry| entry.callback.clone())
            .collect();
        for callback in snapshot {
            callback(payload);
        }
    }

    /// Number of currently connected callbacks.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }
}

impl<T> std::fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// RAII handle for a [`Signal`] connection; disconnects when dropped.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Disconnect now instead of at drop time.
    pub fn disconnect(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("connected", &self.cancel.is_some())
            .finish()
    }
}
