//! Async consumption of signal changes.
//!
//! [`Changes`] bridges the synchronous observer registry to a
//! [`futures::Stream`]: an observer forwards every change over an unbounded
//! channel, and the stream ends once the signal dies and drops that observer.

use crate::base::Node;
use crate::observer::{Observer, ObserverId};
use futures::channel::mpsc;
use futures::{Stream, StreamExt};
use std::fmt;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};

/// One committed change of a signal's value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change<T> {
    pub old: T,
    pub new: T,
}

/// Stream of a signal's changes. Dropping it unregisters its observer.
pub struct Changes<T> {
    receiver: mpsc::UnboundedReceiver<Change<T>>,
    source: Weak<dyn Node<T>>,
    observer: Option<ObserverId>,
}

impl<T: Clone + 'static> Changes<T> {
    pub(crate) fn attach(node: &Rc<dyn Node<T>>) -> Self {
        let (tx, receiver) = mpsc::unbounded::<Change<T>>();
        let source = Rc::downgrade(node);

        // A dead signal never notifies again; dropping `tx` ends the stream.
        if node.is_dead() {
            return Self {
                receiver,
                source,
                observer: None,
            };
        }

        let observer = node.core().add_observer(Observer::change(move |_, old: &T, new: &T| {
            // The receiver is gone once the stream is dropped.
            let _ = tx.unbounded_send(Change {
                old: old.clone(),
                new: new.clone(),
            });
        }));

        Self {
            receiver,
            source,
            observer: Some(observer),
        }
    }
}

impl<T> Stream for Changes<T> {
    type Item = Change<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_next_unpin(cx)
    }
}

impl<T> Drop for Changes<T> {
    fn drop(&mut self) {
        if let (Some(id), Some(source)) = (self.observer.take(), self.source.upgrade()) {
            source.core().remove_observer(id);
        }
    }
}

impl<T> fmt::Debug for Changes<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Changes")
            .field("attached", &self.observer.is_some())
            .finish_non_exhaustive()
    }
}
