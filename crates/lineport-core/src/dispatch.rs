//! Multi-subscriber event delivery.
//!
//! [`EventDispatch`] keeps an ordered list of listeners and delivers each
//! event synchronously on the thread that fired it. Delivery runs in reverse
//! subscription order: the most recently subscribed listener hears about an
//! event first. This ordering is part of the contract.
//!
//! The listener list is snapshotted before delivery and no lock is held while
//! callbacks run. A callback may therefore subscribe or unsubscribe (itself
//! included) without deadlocking; the change takes effect from the next
//! event.

use std::{
    fmt,
    marker::PhantomData,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::event::ConnectionEvent;

/// Receives connection events from a source of type `S`.
///
/// All callbacks default to doing nothing, so implementors only override
/// what they care about. Callbacks run on the source's background task and
/// should not block for long: the source cannot read its next line until
/// every listener has returned.
pub trait Listener<S: ?Sized>: Send + Sync {
    /// A message arrived.
    fn message_received(&self, _source: &S, _text: &str) {}

    /// The connection is established.
    fn connected(&self, _source: &S) {}

    /// The connection ended.
    fn ended(&self, _source: &S) {}

    /// A connection attempt failed.
    fn failed(&self, _source: &S, _message: &str) {}
}

/// Adapts a closure over [`ConnectionEvent`] into a [`Listener`].
pub struct FnListener<F> {
    callback: F,
}

impl<F> FnListener<F> {
    /// Wrap a closure.
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<S: ?Sized, F> Listener<S> for FnListener<F>
where
    F: Fn(&S, &ConnectionEvent) + Send + Sync,
{
    fn message_received(&self, source: &S, text: &str) {
        (self.callback)(source, &ConnectionEvent::MessageReceived(text.to_string()));
    }

    fn connected(&self, source: &S) {
        (self.callback)(source, &ConnectionEvent::Connected);
    }

    fn ended(&self, source: &S) {
        (self.callback)(source, &ConnectionEvent::Ended);
    }

    fn failed(&self, source: &S, message: &str) {
        (self.callback)(source, &ConnectionEvent::Failed(message.to_string()));
    }
}

/// Handle returned by [`EventDispatch::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscribers<S: ?Sized + 'static> {
    next_id: u64,
    entries: Vec<(SubscriptionId, Arc<dyn Listener<S>>)>,
}

/// Ordered listener list for events originating from `S`.
pub struct EventDispatch<S: ?Sized + 'static> {
    subscribers: Mutex<Subscribers<S>>,
    _source: PhantomData<fn(&S)>,
}

impl<S: ?Sized + 'static> EventDispatch<S> {
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Subscribers { next_id: 0, entries: Vec::new() }),
            _source: PhantomData,
        }
    }

    /// Add a listener. It receives every event fired after this call.
    pub fn subscribe(&self, listener: Arc<dyn Listener<S>>) -> SubscriptionId {
        let mut subscribers = self.lock();
        let id = SubscriptionId(subscribers.next_id);
        subscribers.next_id += 1;
        subscribers.entries.push((id, listener));
        id
    }

    /// Remove a listener. Returns `false` if it was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.lock();
        let before = subscribers.entries.len();
        subscribers.entries.retain(|(entry_id, _)| *entry_id != id);
        subscribers.entries.len() != before
    }

    fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Deliver `event` to every listener, newest subscription first.
    pub fn fire(&self, source: &S, event: &ConnectionEvent) {
        let snapshot: Vec<Arc<dyn Listener<S>>> =
            self.lock().entries.iter().rev().map(|(_, listener)| Arc::clone(listener)).collect();

        for listener in snapshot {
            event.deliver(listener.as_ref(), source);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Subscribers<S>> {
        // A panicking listener never runs under this lock, so the list is
        // consistent even if poisoned.
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S: ?Sized + 'static> Default for EventDispatch<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: ?Sized + 'static> fmt::Debug for EventDispatch<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatch").field("listeners", &self.len()).finish()
    }
}
