//! Observer registry owned by each signal.
//!
//! Four observer shapes are supported. Every shape receives every change, with
//! a different payload, and shapes are dispatched in a fixed order: sender-only
//! callbacks, observer objects, full old/new callbacks, then value callbacks.
//! Within a shape, observers are called in the order they were added.

use crate::base::AnySignal;
use crate::storage::{SlotKey, SlotList};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// A stateful observer object.
pub trait SignalObserver<T> {
    fn signal_value_changed(&self, sender: &dyn AnySignal, old: &T, new: &T);
}

type SenderFn = Rc<dyn Fn(&dyn AnySignal)>;
type ObjectRef<T> = Rc<dyn SignalObserver<T>>;
type ChangeFn<T> = Rc<dyn Fn(&dyn AnySignal, &T, &T)>;
type ValueFn<T> = Rc<dyn Fn(&T)>;

/// An observer of a signal's changes.
///
/// Identity is the identity of the wrapped `Rc`: cloning an `Observer` and adding
/// the clone to a signal that already holds it is a no-op.
pub enum Observer<T> {
    /// Receives only the signal that changed.
    Sender(SenderFn),
    /// A stateful object receiving the sender and both values.
    Object(ObjectRef<T>),
    /// Receives the sender and both values.
    Change(ChangeFn<T>),
    /// Receives only the new value.
    Value(ValueFn<T>),
}

impl<T> Observer<T> {
    pub fn sender(f: impl Fn(&dyn AnySignal) + 'static) -> Self {
        Observer::Sender(Rc::new(f))
    }

    pub fn object<O: SignalObserver<T> + 'static>(object: Rc<O>) -> Self {
        Observer::Object(object)
    }

    pub fn change(f: impl Fn(&dyn AnySignal, &T, &T) + 'static) -> Self {
        Observer::Change(Rc::new(f))
    }

    pub fn value(f: impl Fn(&T) + 'static) -> Self {
        Observer::Value(Rc::new(f))
    }

    fn shape(&self) -> Shape {
        match self {
            Observer::Sender(_) => Shape::Sender,
            Observer::Object(_) => Shape::Object,
            Observer::Change(_) => Shape::Change,
            Observer::Value(_) => Shape::Value,
        }
    }
}

impl<T> Clone for Observer<T> {
    fn clone(&self) -> Self {
        match self {
            Observer::Sender(f) => Observer::Sender(f.clone()),
            Observer::Object(o) => Observer::Object(o.clone()),
            Observer::Change(f) => Observer::Change(f.clone()),
            Observer::Value(f) => Observer::Value(f.clone()),
        }
    }
}

impl<T> fmt::Debug for Observer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Observer").field(&self.shape()).finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Shape {
    Sender,
    Object,
    Change,
    Value,
}

/// Handle returned when an observer is added; used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId {
    shape: Shape,
    key: SlotKey,
}

/// Who gets called during one notification pass.
struct Snapshot<T> {
    senders: Vec<SenderFn>,
    objects: Vec<ObjectRef<T>>,
    changes: Vec<ChangeFn<T>>,
    values: Vec<ValueFn<T>>,
}

pub(crate) struct ObserverRegistry<T> {
    senders: SlotList<SenderFn>,
    objects: SlotList<ObjectRef<T>>,
    changes: SlotList<ChangeFn<T>>,
    values: SlotList<ValueFn<T>>,
}

impl<T> ObserverRegistry<T> {
    pub fn new() -> Self {
        Self {
            senders: SlotList::new(),
            objects: SlotList::new(),
            changes: SlotList::new(),
            values: SlotList::new(),
        }
    }

    /// Add an observer, or return the id it is already registered under.
    pub fn add(&mut self, observer: Observer<T>) -> ObserverId {
        let shape = observer.shape();
        let key = match observer {
            Observer::Sender(f) => add_unique(&mut self.senders, f),
            Observer::Object(o) => add_unique(&mut self.objects, o),
            Observer::Change(f) => add_unique(&mut self.changes, f),
            Observer::Value(f) => add_unique(&mut self.values, f),
        };
        ObserverId { shape, key }
    }

    pub fn remove(&mut self, id: ObserverId) -> bool {
        match id.shape {
            Shape::Sender => self.senders.remove(id.key),
            Shape::Object => self.objects.remove(id.key),
            Shape::Change => self.changes.remove(id.key),
            Shape::Value => self.values.remove(id.key),
        }
    }

    /// Remove an observer by identity. Unknown observers are ignored.
    pub fn remove_observer(&mut self, observer: &Observer<T>) -> bool {
        let key = match observer {
            Observer::Sender(f) => self.senders.find_or_revive(|e| Rc::ptr_eq(e, f)),
            Observer::Object(o) => self.objects.find_or_revive(|e| Rc::ptr_eq(e, o)),
            Observer::Change(f) => self.changes.find_or_revive(|e| Rc::ptr_eq(e, f)),
            Observer::Value(f) => self.values.find_or_revive(|e| Rc::ptr_eq(e, f)),
        };
        match key {
            Some(key) => self.remove(ObserverId {
                shape: observer.shape(),
                key,
            }),
            None => false,
        }
    }

    pub fn contains(&self, id: ObserverId) -> bool {
        match id.shape {
            Shape::Sender => self.senders.contains(id.key),
            Shape::Object => self.objects.contains(id.key),
            Shape::Change => self.changes.contains(id.key),
            Shape::Value => self.values.contains(id.key),
        }
    }

    pub fn clear(&mut self) {
        self.senders.clear();
        self.objects.clear();
        self.changes.clear();
        self.values.clear();
    }

    pub fn len(&self) -> usize {
        self.senders.len() + self.objects.len() + self.changes.len() + self.values.len()
    }

    fn begin_pass(&mut self) -> Snapshot<T> {
        Snapshot {
            senders: self.senders.begin_pass(),
            objects: self.objects.begin_pass(),
            changes: self.changes.begin_pass(),
            values: self.values.begin_pass(),
        }
    }

    fn end_pass(&mut self) {
        self.senders.end_pass();
        self.objects.end_pass();
        self.changes.end_pass();
        self.values.end_pass();
    }

    /// Run one notification pass.
    ///
    /// The registry is not borrowed while observers run, so observers may add
    /// or remove observers (including themselves) on the same signal.
    pub fn dispatch(registry: &RefCell<Self>, sender: &dyn AnySignal, old: &T, new: &T) {
        let snapshot = registry.borrow_mut().begin_pass();

        for observer in &snapshot.senders {
            observer(sender);
        }
        for observer in &snapshot.objects {
            observer.signal_value_changed(sender, old, new);
        }
        for observer in &snapshot.changes {
            observer(sender, old, new);
        }
        for observer in &snapshot.values {
            observer(new);
        }

        registry.borrow_mut().end_pass();
    }
}

fn add_unique<F: ?Sized>(list: &mut SlotList<Rc<F>>, entry: Rc<F>) -> SlotKey {
    match list.find_or_revive(|e| Rc::ptr_eq(e, &entry)) {
        Some(key) => key,
        None => list.insert(entry),
    }
}
