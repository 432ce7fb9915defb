//! A list that behaves as a signal.

use crate::base::{AnySignal, SignalId};
use crate::observer::ObserverId;
use crate::signal::{ReadOnlySignal, Signal};
use std::fmt;

/// A `Vec<T>` held in a [`Signal`].
///
/// Every mutation that changes the contents emits the usual dirtied and changed
/// notifications, so computed signals that read the list recompute like they
/// would for any other signal. Observers receive the whole list before and
/// after the mutation.
pub struct ObservableList<T> {
    items: Signal<Vec<T>>,
}

impl<T> Clone for ObservableList<T> {
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
        }
    }
}

impl<T: Clone + PartialEq + 'static> ObservableList<T> {
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }

    pub fn from_vec(items: Vec<T>) -> Self {
        Self {
            items: Signal::new(items),
        }
    }

    pub fn push(&self, item: T) {
        self.items.update(|items| items.push(item));
    }

    /// Insert at `index`, clamped to the end of the list.
    pub fn insert(&self, index: usize, item: T) {
        self.items.update(|items| {
            let index = index.min(items.len());
            items.insert(index, item);
        });
    }

    /// Remove and return the item at `index`, or `None` if out of range.
    pub fn remove(&self, index: usize) -> Option<T> {
        if index >= self.len_untracked() {
            return None;
        }
        self.items.update_with(|items| Some(items.remove(index)))
    }

    /// Remove the first item equal to `item`. Returns false if there was none.
    pub fn remove_item(&self, item: &T) -> bool {
        match self.items.with_untracked(|items| items.iter().position(|i| i == item)) {
            Some(index) => self.remove(index).is_some(),
            None => false,
        }
    }

    /// Replace the item at `index`. Returns false if out of range.
    pub fn set(&self, index: usize, item: T) -> bool {
        if index >= self.len_untracked() {
            return false;
        }
        self.items.update(|items| items[index] = item);
        true
    }

    pub fn clear(&self) {
        self.items.set(Vec::new());
    }

    /// Tracked read of the item at `index`.
    pub fn get(&self, index: usize) -> Option<T> {
        self.items.with(|items| items.get(index).cloned())
    }

    /// Tracked length.
    pub fn len(&self) -> usize {
        self.items.with(Vec::len)
    }

    fn len_untracked(&self) -> usize {
        self.items.with_untracked(Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, item: &T) -> bool {
        self.items.with(|items| items.contains(item))
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.items.get()
    }

    pub fn observe_change(&self, f: impl Fn(&dyn AnySignal, &Vec<T>, &Vec<T>) + 'static) -> ObserverId {
        self.items.observe_change(f)
    }

    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.items.remove_observer(id)
    }

    /// The signal holding the items.
    pub fn as_signal(&self) -> &Signal<Vec<T>> {
        &self.items
    }

    pub fn read_only(&self) -> ReadOnlySignal<Vec<T>> {
        self.items.read_only()
    }

    pub fn id(&self) -> SignalId {
        self.items.id()
    }
}

impl<T: Clone + PartialEq + 'static> Default for ObservableList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + PartialEq + 'static> From<Vec<T>> for ObservableList<T> {
    fn from(items: Vec<T>) -> Self {
        Self::from_vec(items)
    }
}

impl<T: Clone + fmt::Debug + 'static> fmt::Debug for ObservableList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableList")
            .field("id", &self.items.id())
            .field("items", &self.items.get_untracked())
            .finish()
    }
}
