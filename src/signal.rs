//! Leaf signals: settable cells written by callers.

use crate::base::{AnySignal, Channel, Listener, ListenerId, Node, SignalCore, SignalId};
use crate::context;
use crate::observer::{Observer, ObserverId, SignalObserver};
use crate::stream::Changes;
use crate::transaction::Transactable;
use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};

pub(crate) struct ValueInner<T> {
    core: SignalCore<T>,
    /// Value before the first silent write of a pending transaction.
    pending_old: RefCell<Option<T>>,
}

impl<T> AnySignal for ValueInner<T> {
    fn id(&self) -> SignalId {
        self.core.id()
    }

    fn is_dead(&self) -> bool {
        self.core.is_dead()
    }

    fn is_dirty(&self) -> bool {
        self.core.is_dirty()
    }

    fn is_notifying(&self) -> bool {
        self.core.is_notifying()
    }

    fn height(&self) -> usize {
        0
    }

    fn listen(&self, channel: Channel, listener: Listener) -> ListenerId {
        self.core.listen(channel, listener)
    }

    fn unlisten(&self, id: ListenerId) -> bool {
        self.core.unlisten(id)
    }
}

impl<T> Node<T> for ValueInner<T> {
    fn core(&self) -> &SignalCore<T> {
        &self.core
    }
}

impl<T: Clone> ValueInner<T> {
    fn set(&self, value: T) {
        if self.core.is_dead() {
            tracing::debug!(signal = %self.core.id(), "write to a disposed signal ignored");
            return;
        }
        if let Some(old) = self.core.replace(value) {
            let new = self.core.get();
            self.core.notify(self, &old, &new);
        }
    }

    /// Write without notifying. Returns true if the value changed.
    fn set_silently(&self, value: T) -> bool {
        if self.core.is_dead() {
            return false;
        }
        let Some(old) = self.core.replace(value) else {
            return false;
        };
        let mut pending = self.pending_old.borrow_mut();
        if pending.is_none() {
            *pending = Some(old);
        }
        self.core.set_dirty(true);
        true
    }
}

impl<T: Clone> Transactable for ValueInner<T> {
    fn signal_id(&self) -> SignalId {
        self.core.id()
    }

    fn flush_notifications(&self) {
        let Some(old) = self.pending_old.borrow_mut().take() else {
            return;
        };
        self.core.set_dirty(false);
        let new = self.core.get();
        if self.core.equal(&old, &new) {
            self.core.emit(Channel::Settled, self);
        } else {
            self.core.notify(self, &old, &new);
        }
    }
}

impl<T> Drop for ValueInner<T> {
    fn drop(&mut self) {
        let this: &Self = self;
        this.core.dispose(this);
    }
}

/// A reactive cell holding a value of type `T`.
///
/// Signals are cheap to clone; clones are handles to the same cell. Writing a
/// value equal to the current one is a no-op. Any other write commits the new
/// value and synchronously notifies, in order, the dirtied channel, the changed
/// channel, and the registered observers.
///
/// Dropping the last handle disposes the signal.
///
/// # Examples
///
/// ```rust,no_run
/// use signal_graph::prelude::*;
///
/// let count = Signal::new(0);
/// count.observe_change(|_, old, new| println!("{old} -> {new}"));
/// count.set(1);
/// count.update(|n| *n += 1);
/// assert_eq!(count.get(), 2);
/// ```
pub struct Signal<T> {
    inner: Rc<ValueInner<T>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> PartialEq for Signal<T> {
    fn eq(&self, other: &Self) -> bool {
        self.inner.core.id() == other.inner.core.id()
    }
}

impl<T> Eq for Signal<T> {}

impl<T> Hash for Signal<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.core.id().hash(state);
    }
}

impl Signal<bool> {
    /// Toggle the boolean value of the signal.
    pub fn toggle(&self) {
        self.update(|v| *v = !*v);
    }
}

impl<U: ?Sized + 'static> Signal<Rc<U>> {
    /// Create a signal that compares values by pointer identity.
    pub fn by_identity(value: Rc<U>) -> Self {
        Self::with_equality(value, |a, b| Rc::ptr_eq(a, b))
    }
}

impl<T: Clone + PartialEq + 'static> Signal<T> {
    /// Create a new signal with the given initial value.
    pub fn new(value: T) -> Self {
        Self::with_equality(value, <T as PartialEq>::eq)
    }
}

impl<T: Clone + 'static> Signal<T> {
    /// Create a signal that decides "changed" with `equal` instead of `PartialEq`.
    pub fn with_equality(value: T, equal: fn(&T, &T) -> bool) -> Self {
        Self {
            inner: Rc::new(ValueInner {
                core: SignalCore::new(SignalId::next(), value, equal),
                pending_old: RefCell::new(None),
            }),
        }
    }

    fn track(&self) {
        context::record_read(self.id(), || {
            let weak = Rc::downgrade(&self.inner);
            weak as Weak<dyn AnySignal>
        });
    }

    /// Get the current value of the signal.
    ///
    /// This will track the read if called while a computed signal is evaluating.
    pub fn get(&self) -> T {
        self.track();
        self.inner.core.get()
    }

    /// Get a clone of the current value without tracking the read.
    pub fn get_untracked(&self) -> T {
        self.inner.core.get()
    }

    /// Read the signal's value with a closure.
    ///
    /// # Panics
    ///
    /// Panics if the closure writes this signal.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.track();
        self.inner.core.with(f)
    }

    /// Read the signal's value with a closure without tracking.
    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.inner.core.with(f)
    }

    /// Set the signal to a new value.
    ///
    /// Observers are notified only if the value changed.
    pub fn set(&self, value: T) {
        self.inner.set(value);
    }

    /// Update the signal's value with a closure.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        let mut next = self.get_untracked();
        f(&mut next);
        self.set(next);
    }

    /// Update the signal's value with a closure and return a result.
    pub fn update_with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut next = self.get_untracked();
        let result = f(&mut next);
        self.set(next);
        result
    }

    /// Notify observers even though the stored value was not replaced.
    ///
    /// For values whose contents changed behind the signal's back. Observers
    /// receive the current value as both old and new.
    pub fn notify(&self) {
        let value = self.get_untracked();
        self.inner.core.notify(&*self.inner, &value, &value);
    }

    pub(crate) fn set_silently(&self, value: T) -> bool {
        self.inner.set_silently(value)
    }

    pub(crate) fn transactable(&self) -> Rc<dyn Transactable> {
        self.inner.clone()
    }

    /// Add an observer. Adding an observer that is already registered is a no-op.
    pub fn add_observer(&self, observer: Observer<T>) -> ObserverId {
        self.inner.core.add_observer(observer)
    }

    /// Observe with a callback that only receives the signal that changed.
    pub fn observe(&self, f: impl Fn(&dyn AnySignal) + 'static) -> ObserverId {
        self.add_observer(Observer::sender(f))
    }

    /// Observe with a stateful observer object.
    pub fn observe_object<O: SignalObserver<T> + 'static>(&self, observer: Rc<O>) -> ObserverId {
        self.add_observer(Observer::object(observer))
    }

    /// Observe with a callback receiving the old and new values.
    pub fn observe_change(&self, f: impl Fn(&dyn AnySignal, &T, &T) + 'static) -> ObserverId {
        self.add_observer(Observer::change(f))
    }

    /// Observe with a callback receiving only the new value.
    pub fn observe_value(&self, f: impl Fn(&T) + 'static) -> ObserverId {
        self.add_observer(Observer::value(f))
    }

    /// Remove an observer by id. Returns false if it was not registered.
    ///
    /// Inside a notification pass the observer still receives that pass.
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.inner.core.remove_observer(id)
    }

    /// Remove an observer by identity. Returns false if it was not registered.
    pub fn unobserve(&self, observer: &Observer<T>) -> bool {
        self.inner.core.unobserve(observer)
    }

    pub fn has_observer(&self, id: ObserverId) -> bool {
        self.inner.core.has_observer(id)
    }

    pub fn clear_observers(&self) {
        self.inner.core.clear_observers();
    }

    pub fn observer_count(&self) -> usize {
        self.inner.core.observer_count()
    }

    pub fn on_dirtied(&self, f: impl Fn(&dyn AnySignal) + 'static) -> ListenerId {
        self.inner.core.listen(Channel::Dirtied, Rc::new(f))
    }

    pub fn on_changed(&self, f: impl Fn(&dyn AnySignal) + 'static) -> ListenerId {
        self.inner.core.listen(Channel::Changed, Rc::new(f))
    }

    pub fn on_settled(&self, f: impl Fn(&dyn AnySignal) + 'static) -> ListenerId {
        self.inner.core.listen(Channel::Settled, Rc::new(f))
    }

    pub fn on_died(&self, f: impl Fn(&dyn AnySignal) + 'static) -> ListenerId {
        self.inner.core.listen(Channel::Died, Rc::new(f))
    }

    pub fn unlisten(&self, id: ListenerId) -> bool {
        self.inner.core.unlisten(id)
    }

    /// Stream of changes, ending when the signal dies.
    pub fn changes(&self) -> Changes<T> {
        let node: Rc<dyn Node<T>> = self.inner.clone();
        Changes::attach(&node)
    }

    /// Dispose the signal: fire died once, then drop every observer.
    ///
    /// Computed signals depending on it die too. Idempotent.
    pub fn dispose(&self) {
        self.inner.core.dispose(&*self.inner);
    }

    pub fn is_dead(&self) -> bool {
        self.inner.core.is_dead()
    }

    /// True while a transaction holds an unflushed write to this signal.
    pub fn is_dirty(&self) -> bool {
        self.inner.core.is_dirty()
    }

    /// Convert this signal to a read-only signal.
    pub fn read_only(&self) -> ReadOnlySignal<T> {
        ReadOnlySignal {
            inner: self.clone(),
        }
    }

    pub fn as_any(&self) -> Rc<dyn AnySignal> {
        self.inner.clone()
    }

    /// Get the underlying signal ID.
    pub fn id(&self) -> SignalId {
        self.inner.core.id()
    }

    #[cfg(test)]
    pub(crate) fn listener_count(&self, channel: Channel) -> usize {
        self.inner.core.listener_count(channel)
    }
}

impl<T: Clone + PartialEq + Default + 'static> Default for Signal<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Clone + fmt::Debug + 'static> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.id())
            .field("value", &self.get_untracked())
            .field("dead", &self.is_dead())
            .finish()
    }
}

// Compound assignment goes through update(), so it notifies like set().
impl<T: Clone + 'static + std::ops::AddAssign<T>> std::ops::AddAssign<T> for Signal<T> {
    fn add_assign(&mut self, rhs: T) {
        self.update(|v| *v += rhs);
    }
}

impl<T: Clone + 'static + std::ops::SubAssign<T>> std::ops::SubAssign<T> for Signal<T> {
    fn sub_assign(&mut self, rhs: T) {
        self.update(|v| *v -= rhs);
    }
}

impl<T: Clone + 'static + std::ops::MulAssign<T>> std::ops::MulAssign<T> for Signal<T> {
    fn mul_assign(&mut self, rhs: T) {
        self.update(|v| *v *= rhs);
    }
}

impl<T: Clone + 'static + std::ops::DivAssign<T>> std::ops::DivAssign<T> for Signal<T> {
    fn div_assign(&mut self, rhs: T) {
        self.update(|v| *v /= rhs);
    }
}

/// A read-only view of a signal.
///
/// This prevents accidental mutations while still allowing reads and observers.
pub struct ReadOnlySignal<T> {
    inner: Signal<T>,
}

impl<T> Clone for ReadOnlySignal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> PartialEq for ReadOnlySignal<T> {
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}

impl<T> Eq for ReadOnlySignal<T> {}

impl<T> Hash for ReadOnlySignal<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.hash(state);
    }
}

impl<T: Clone + 'static> ReadOnlySignal<T> {
    pub fn get(&self) -> T {
        self.inner.get()
    }

    pub fn get_untracked(&self) -> T {
        self.inner.get_untracked()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.inner.with(f)
    }

    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.inner.with_untracked(f)
    }

    pub fn add_observer(&self, observer: Observer<T>) -> ObserverId {
        self.inner.add_observer(observer)
    }

    pub fn observe_change(&self, f: impl Fn(&dyn AnySignal, &T, &T) + 'static) -> ObserverId {
        self.inner.observe_change(f)
    }

    pub fn observe_value(&self, f: impl Fn(&T) + 'static) -> ObserverId {
        self.inner.observe_value(f)
    }

    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.inner.remove_observer(id)
    }

    pub fn changes(&self) -> Changes<T> {
        self.inner.changes()
    }

    pub fn is_dead(&self) -> bool {
        self.inner.is_dead()
    }

    pub fn id(&self) -> SignalId {
        self.inner.id()
    }
}

impl<T: Clone + fmt::Debug + 'static> fmt::Debug for ReadOnlySignal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadOnlySignal")
            .field("value", &self.get_untracked())
            .finish()
    }
}
