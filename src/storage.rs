//! Slot storage for subscribers.
//!
//! Uses a slot map with generational keys so that a subscriber handed out to a
//! caller keeps a stable identity even after other subscribers are removed and
//! their slots are reused. Dispatch order is the insertion order, kept in a
//! separate key list that is compacted lazily (removed keys are tombstones until
//! enough of them accumulate).
//!
//! Removal while a notification pass is in flight is deferred: the entry stays
//! in place until the outermost pass ends, but it is excluded from any pass that
//! begins after the removal was requested.

use slotmap::{new_key_type, SlotMap};

new_key_type! {
    /// Unique identifier for an entry in a [`SlotList`].
    pub struct SlotKey;
}

pub(crate) struct SlotList<E> {
    /// Live entries indexed by key.
    entries: SlotMap<SlotKey, E>,
    /// Insertion order. May contain keys that are no longer in `entries`.
    order: Vec<SlotKey>,
    /// Number of stale keys in `order`.
    tombstones: usize,
    /// Removals requested while a pass was in flight.
    pending_removals: Vec<SlotKey>,
    /// Number of passes currently in flight (passes nest on reentrant writes).
    passes: usize,
}

impl<E> SlotList<E> {
    pub fn new() -> Self {
        Self {
            entries: SlotMap::with_key(),
            order: Vec::new(),
            tombstones: 0,
            pending_removals: Vec::new(),
            passes: 0,
        }
    }

    /// Append an entry. It is visible to the next pass, not to one in flight.
    pub fn insert(&mut self, entry: E) -> SlotKey {
        let key = self.entries.insert(entry);
        self.order.push(key);
        key
    }

    /// Find the first entry matching `pred`, in insertion order.
    ///
    /// An entry that was pending removal is revived: it stays registered after
    /// the current pass.
    pub fn find_or_revive(&mut self, pred: impl Fn(&E) -> bool) -> Option<SlotKey> {
        let entries = &self.entries;
        let key = self
            .order
            .iter()
            .copied()
            .find(|key| entries.get(*key).is_some_and(&pred))?;
        self.pending_removals.retain(|pending| *pending != key);
        Some(key)
    }

    /// Remove an entry. Returns false if the key is unknown.
    ///
    /// While a pass is in flight the removal is deferred until the outermost
    /// pass ends. Removing the same key several times is idempotent.
    pub fn remove(&mut self, key: SlotKey) -> bool {
        if !self.entries.contains_key(key) {
            return false;
        }
        if self.passes > 0 {
            if !self.pending_removals.contains(&key) {
                self.pending_removals.push(key);
            }
            return true;
        }
        self.remove_now(key);
        true
    }

    fn remove_now(&mut self, key: SlotKey) {
        if self.entries.remove(key).is_some() {
            self.tombstones += 1;
        }
        if self.tombstones * 2 > self.order.len() {
            let entries = &self.entries;
            self.order.retain(|key| entries.contains_key(*key));
            self.tombstones = 0;
        }
    }

    /// Drop every entry and every pending removal immediately.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
        self.pending_removals.clear();
        self.tombstones = 0;
    }

    pub fn contains(&self, key: SlotKey) -> bool {
        self.entries.contains_key(key) && !self.pending_removals.contains(&key)
    }

    pub fn len(&self) -> usize {
        self.entries.len() - self.pending_removals.len()
    }

    /// Start a pass and return who gets called this round.
    ///
    /// Every call must be paired with [`SlotList::end_pass`].
    pub fn begin_pass(&mut self) -> Vec<E>
    where
        E: Clone,
    {
        self.passes += 1;
        self.order
            .iter()
            .filter(|key| !self.pending_removals.contains(key))
            .filter_map(|key| self.entries.get(*key))
            .cloned()
            .collect()
    }

    /// Finish a pass. Deferred removals are applied once no pass is in flight.
    pub fn end_pass(&mut self) {
        self.passes = self.passes.saturating_sub(1);
        if self.passes == 0 && !self.pending_removals.is_empty() {
            for key in std::mem::take(&mut self.pending_removals) {
                self.remove_now(key);
            }
        }
    }
}

impl<E> Default for SlotList<E> {
    fn default() -> Self {
        Self::new()
    }
}
