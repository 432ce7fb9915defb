//! The base reactive cell shared by leaf and computed signals.
//!
//! A [`SignalCore`] owns the current value, the dirty and alive flags, the
//! observer registry, and the notification channels every signal exposes:
//!
//! - **dirtied**: a write has begun and the value may be stale.
//! - **changed**: a write completed; observers can read the new value.
//! - **settled**: a dirty computed signal recomputed to the same value.
//! - **died**: fired exactly once, when the signal is disposed.
//!
//! # Invariants
//!
//! 1. `alive` only ever goes from true to false.
//! 2. Once dead, a signal delivers no further notifications.
//! 3. A write fires dirtied, then changed, then dispatches to the registry.

use crate::observer::{Observer, ObserverId, ObserverRegistry};
use crate::storage::{SlotKey, SlotList};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

thread_local! {
    static NEXT_ID: Cell<u64> = const { Cell::new(1) };
}

/// Identity of a signal. Never reused on the thread that owns the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SignalId(u64);

impl SignalId {
    pub(crate) fn next() -> Self {
        NEXT_ID.with(|next| {
            let id = next.get();
            next.set(id + 1);
            Self(id)
        })
    }
}

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One of the notification channels of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Dirtied,
    Changed,
    /// A dirtied signal finished without a change; dependents may be clean again.
    Settled,
    Died,
}

/// Handle returned by a channel subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId {
    channel: Channel,
    key: SlotKey,
}

impl ListenerId {
    pub fn channel(&self) -> Channel {
        self.channel
    }
}

/// Channel subscriber. Receives the signal that emitted.
pub type Listener = Rc<dyn Fn(&dyn AnySignal)>;

/// The capability every signal has, independent of its value type.
///
/// Computed signals only see their dependencies through this trait.
pub trait AnySignal {
    fn id(&self) -> SignalId;

    fn is_dead(&self) -> bool;

    fn is_dirty(&self) -> bool;

    /// True while the signal is delivering a change to its subscribers.
    fn is_notifying(&self) -> bool;

    /// Longest dependency path below this signal. Leaf signals are 0.
    fn height(&self) -> usize;

    /// Subscribe to one of the signal's channels.
    fn listen(&self, channel: Channel, listener: Listener) -> ListenerId;

    /// Remove a channel subscription. Unknown ids are ignored.
    fn unlisten(&self, id: ListenerId) -> bool;
}

/// A signal node with a typed core.
pub(crate) trait Node<T>: AnySignal {
    fn core(&self) -> &SignalCore<T>;
}

pub(crate) struct SignalCore<T> {
    id: SignalId,
    value: RefCell<T>,
    equal: fn(&T, &T) -> bool,
    dirty: Cell<bool>,
    alive: Cell<bool>,
    /// Nesting of in-flight `notify` calls.
    notifying: Cell<usize>,
    dirtied: RefCell<SlotList<Listener>>,
    changed: RefCell<SlotList<Listener>>,
    settled: RefCell<SlotList<Listener>>,
    died: RefCell<SlotList<Listener>>,
    observers: RefCell<ObserverRegistry<T>>,
}

impl<T> SignalCore<T> {
    pub fn new(id: SignalId, value: T, equal: fn(&T, &T) -> bool) -> Self {
        Self {
            id,
            value: RefCell::new(value),
            equal,
            dirty: Cell::new(false),
            alive: Cell::new(true),
            notifying: Cell::new(0),
            dirtied: RefCell::new(SlotList::new()),
            changed: RefCell::new(SlotList::new()),
            settled: RefCell::new(SlotList::new()),
            died: RefCell::new(SlotList::new()),
            observers: RefCell::new(ObserverRegistry::new()),
        }
    }

    pub fn id(&self) -> SignalId {
        self.id
    }

    pub fn is_dead(&self) -> bool {
        !self.alive.get()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.get()
    }

    pub fn is_notifying(&self) -> bool {
        self.notifying.get() > 0
    }

    pub fn set_dirty(&self, dirty: bool) {
        self.dirty.set(dirty);
    }

    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.value.borrow().clone()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let value = self.value.borrow();
        f(&*value)
    }

    pub fn equal(&self, a: &T, b: &T) -> bool {
        (self.equal)(a, b)
    }

    /// Store `value` if it differs from the current one and return the old value.
    pub fn replace(&self, value: T) -> Option<T> {
        let mut current = self.value.borrow_mut();
        if (self.equal)(&*current, &value) {
            return None;
        }
        Some(std::mem::replace(&mut *current, value))
    }

    /// Fire dirtied and changed, then dispatch to the registry.
    pub fn notify(&self, sender: &dyn AnySignal, old: &T, new: &T) {
        if self.is_dead() {
            return;
        }
        self.notifying.set(self.notifying.get() + 1);
        self.emit(Channel::Dirtied, sender);
        self.emit(Channel::Changed, sender);
        ObserverRegistry::dispatch(&self.observers, sender, old, new);
        self.notifying.set(self.notifying.get() - 1);
    }

    fn channel(&self, channel: Channel) -> &RefCell<SlotList<Listener>> {
        match channel {
            Channel::Dirtied => &self.dirtied,
            Channel::Changed => &self.changed,
            Channel::Settled => &self.settled,
            Channel::Died => &self.died,
        }
    }

    pub fn emit(&self, channel: Channel, sender: &dyn AnySignal) {
        let list = self.channel(channel);
        let listeners = list.borrow_mut().begin_pass();
        for listener in &listeners {
            listener(sender);
        }
        list.borrow_mut().end_pass();
    }

    pub fn listen(&self, channel: Channel, listener: Listener) -> ListenerId {
        let key = self.channel(channel).borrow_mut().insert(listener);
        ListenerId { channel, key }
    }

    pub fn unlisten(&self, id: ListenerId) -> bool {
        self.channel(id.channel).borrow_mut().remove(id.key)
    }

    #[cfg(test)]
    pub fn listener_count(&self, channel: Channel) -> usize {
        self.channel(channel).borrow().len()
    }

    pub fn add_observer(&self, observer: Observer<T>) -> ObserverId {
        self.observers.borrow_mut().add(observer)
    }

    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.observers.borrow_mut().remove(id)
    }

    pub fn unobserve(&self, observer: &Observer<T>) -> bool {
        self.observers.borrow_mut().remove_observer(observer)
    }

    pub fn has_observer(&self, id: ObserverId) -> bool {
        self.observers.borrow().contains(id)
    }

    pub fn clear_observers(&self) {
        self.observers.borrow_mut().clear();
    }

    pub fn observer_count(&self) -> usize {
        self.observers.borrow().len()
    }

    /// Mark the signal dead and fire died. Returns false if it already was.
    pub fn mark_dead(&self, sender: &dyn AnySignal) -> bool {
        if !self.alive.replace(false) {
            return false;
        }
        self.emit(Channel::Died, sender);
        true
    }

    /// Idempotent disposal: fire died once, then drop every subscriber.
    pub fn dispose(&self, sender: &dyn AnySignal) {
        if self.mark_dead(sender) {
            tracing::debug!(signal = %self.id, "signal disposed");
        }
        self.clear_observers();
        self.dirtied.borrow_mut().clear();
        self.changed.borrow_mut().clear();
        self.settled.borrow_mut().clear();
        self.died.borrow_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_ids_are_unique_per_thread() {
        let first = SignalId::next();
        let second = SignalId::next();
        assert!(second > first);

        // Each thread owns its own graph and its own id sequence.
        let (a, b) = thread::spawn(|| (SignalId::next(), SignalId::next()))
            .join()
            .unwrap();
        assert_eq!(a, SignalId(1));
        assert_eq!(b, SignalId(2));
        assert!(SignalId::next() > second);
    }
}
